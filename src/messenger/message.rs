use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Severity/kind of a message, used for echo colouring and verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    General,
    Start,
    End,
    Info,
    Warning,
    Error,
    Internal,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::General => "general",
            MessageKind::Start => "start",
            MessageKind::End => "end",
            MessageKind::Info => "info",
            MessageKind::Warning => "warning",
            MessageKind::Error => "error",
            MessageKind::Internal => "internal",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque payload shared between the sender and every recipient.
pub type Payload = Rc<dyn Any>;

/// A tagged message travelling through the [`Messenger`](super::Messenger).
///
/// Tags and tickstamp are fixed at construction. Only the description
/// (trimmed when queued) and the processed flag change afterwards.
#[derive(Clone)]
pub struct Message {
    tick: u64,
    tags: Vec<String>,
    kind: MessageKind,
    descr: String,
    data: Option<Payload>,
    processed: bool,
}

impl Message {
    pub fn new<I, S>(tick: u64, tags: I, kind: MessageKind, descr: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tick,
            tags: tags.into_iter().map(Into::into).collect(),
            kind,
            descr: descr.into(),
            data: None,
            processed: false,
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = Some(data);
        self
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The tags as an order-insensitive set, used for strict matching.
    pub fn tag_set(&self) -> BTreeSet<&str> {
        self.tags.iter().map(String::as_str).collect()
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn descr(&self) -> &str {
        &self.descr
    }

    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    /// Downcast the payload to a concrete type.
    pub fn data_as<T: 'static>(&self) -> Option<&T> {
        self.data.as_ref().and_then(|d| d.downcast_ref::<T>())
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = true;
    }

    pub(crate) fn trim_descr(&mut self) {
        let trimmed = self.descr.trim();
        if trimmed.len() != self.descr.len() {
            self.descr = trimmed.to_string();
        }
    }

    pub fn joined_tags(&self) -> String {
        self.tags.join(",")
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tick", &self.tick)
            .field("tags", &self.tags)
            .field("kind", &self.kind)
            .field("descr", &self.descr)
            .field("has_data", &self.data.is_some())
            .field("processed", &self.processed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_set_ignores_order_and_duplicates() {
        let a = Message::new(0, ["room", "load"], MessageKind::General, "");
        let b = Message::new(0, ["load", "room", "room"], MessageKind::General, "");
        assert_eq!(a.tag_set(), b.tag_set());
    }

    #[test]
    fn payload_downcasts_to_its_type() {
        let msg = Message::new(5, ["net"], MessageKind::Info, "packet").with_data(Rc::new(42u32));
        assert_eq!(msg.data_as::<u32>(), Some(&42));
        assert!(msg.data_as::<String>().is_none());
    }

    #[test]
    fn trim_only_touches_surrounding_whitespace() {
        let mut msg = Message::new(0, ["log"], MessageKind::Info, "  two words \n");
        msg.trim_descr();
        assert_eq!(msg.descr(), "two words");
    }
}
