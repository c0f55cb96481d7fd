//! Tagged publish/subscribe message bus.
//!
//! Subsystems queue [`Message`]s with [`Messenger::send`]; once per frame
//! [`Messenger::handle_messages`] delivers every due message to the
//! recipients registered under its tags. Non-strict recipients receive any
//! message sharing a tag, strict recipients only messages whose tag set
//! equals their own. Tags in the protected set can only be claimed through
//! the `*_protected` calls, which are reserved for engine subsystems.

mod message;
mod output;
mod recipient;

use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::Result;

use crate::engine::clock::TickSource;
use crate::error::RegistryError;

pub use message::{Message, MessageKind, Payload};
pub use output::{MessageOutput, OutputLevel};
pub use recipient::{Recipient, RecipientFn, RecipientId};

use recipient::Registry;

pub const DEFAULT_PROTECTED_TAGS: [&str; 2] = ["engine", "console"];

pub struct Messenger {
    clock: Rc<dyn TickSource>,
    registry: Registry,
    protected: BTreeSet<String>,
    queue: Vec<Message>,
    output: MessageOutput,
}

impl Messenger {
    pub fn new(clock: Rc<dyn TickSource>) -> Self {
        Self {
            clock,
            registry: Registry::default(),
            protected: DEFAULT_PROTECTED_TAGS.iter().map(|t| t.to_string()).collect(),
            queue: Vec::new(),
            output: MessageOutput::default(),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    pub fn clock(&self) -> Rc<dyn TickSource> {
        Rc::clone(&self.clock)
    }

    pub fn output(&self) -> &MessageOutput {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut MessageOutput {
        &mut self.output
    }

    /// Adds a tag to the protected set. The set only grows.
    pub fn protect_tag(&mut self, tag: impl Into<String>) {
        self.protected.insert(tag.into());
    }

    pub fn is_protected(&self, tag: &str) -> bool {
        self.protected.contains(tag)
    }

    fn protected_among<'a>(&self, tags: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        tags.into_iter()
            .filter(|t| self.is_protected(t))
            .cloned()
            .collect()
    }

    /// Registers a recipient under `tags`.
    ///
    /// Refused as a whole when any requested tag is protected; the error
    /// reports how many tags were refused and the registry is left as it was.
    pub fn register<I, S, F>(
        &mut self,
        name: impl Into<String>,
        tags: I,
        is_strict: bool,
        func: F,
    ) -> Result<RecipientId, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&mut Messenger, &Message) -> Result<()> + 'static,
    {
        let recipient = Recipient::new(name, tags, is_strict, Box::new(func));
        let refused = self.protected_among(recipient.tags());
        if !refused.is_empty() {
            tracing::warn!(
                target: "messenger",
                recipient = recipient.name(),
                tags = %refused.join(","),
                "refused to register recipient with protected tags"
            );
            return Err(RegistryError::Protected {
                name: recipient.name().to_string(),
                tags: refused,
            });
        }
        Ok(self.registry.insert(recipient))
    }

    /// Registers without the protected-tag check. Engine subsystems only.
    pub fn register_protected<I, S, F>(
        &mut self,
        name: impl Into<String>,
        tags: I,
        is_strict: bool,
        func: F,
    ) -> RecipientId
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&mut Messenger, &Message) -> Result<()> + 'static,
    {
        self.registry
            .insert(Recipient::new(name, tags, is_strict, Box::new(func)))
    }

    /// Removes a recipient from every tag it holds. Nothing is removed if
    /// any of those tags is protected.
    pub fn unregister(&mut self, id: RecipientId) -> Result<(), RegistryError> {
        let recipient = self
            .registry
            .get(id)
            .ok_or(RegistryError::UnknownRecipient(id))?;
        let refused = self.protected_among(recipient.tags());
        if !refused.is_empty() {
            tracing::warn!(
                target: "messenger",
                recipient = recipient.name(),
                tags = %refused.join(","),
                "refused to unregister recipient holding protected tags"
            );
            return Err(RegistryError::Protected {
                name: recipient.name().to_string(),
                tags: refused,
            });
        }
        self.registry.remove(id);
        Ok(())
    }

    pub fn unregister_protected(&mut self, id: RecipientId) -> bool {
        self.registry.remove(id).is_some()
    }

    pub fn unregister_by_name(&mut self, name: &str) -> Result<(), RegistryError> {
        let id = self
            .registry
            .find_by_name(name)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))?;
        self.unregister(id)
    }

    /// Drops every recipient that holds no protected tag. Returns how many
    /// protected tags kept their recipients.
    pub fn unregister_all(&mut self) -> usize {
        for id in self.registry.ids() {
            let keep = self
                .registry
                .get(id)
                .is_some_and(|r| r.tags().iter().any(|t| self.is_protected(t)));
            if !keep {
                self.registry.remove(id);
            }
        }

        self.registry
            .tags()
            .iter()
            .filter(|t| self.is_protected(t))
            .count()
    }

    pub fn recipient(&self, id: RecipientId) -> Option<&Recipient> {
        self.registry.get(id)
    }

    pub fn recipient_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of recipients listening on `tag`.
    pub fn recipients_for(&self, tag: &str) -> usize {
        self.registry.bucket_len(tag)
    }

    /// Queues a message stamped with the current tick.
    pub fn send<I, S>(&mut self, tags: I, kind: MessageKind, descr: impl Into<String>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let msg = Message::new(self.ticks(), tags, kind, descr);
        self.post(msg);
    }

    pub fn send_data<I, S>(
        &mut self,
        tags: I,
        kind: MessageKind,
        descr: impl Into<String>,
        data: Payload,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let msg = Message::new(self.ticks(), tags, kind, descr).with_data(data);
        self.post(msg);
    }

    /// Queues a pre-built message. A tickstamp in the future holds the
    /// message back until the clock reaches it.
    pub fn post(&mut self, mut msg: Message) {
        msg.trim_descr();
        self.queue.push(msg);
    }

    pub fn log(&mut self, descr: impl Into<String>) {
        self.send(["log"], MessageKind::Info, descr);
    }

    /// Delivers a message immediately, bypassing the queue.
    ///
    /// Every matching recipient runs even if an earlier one fails; the last
    /// failure is returned afterwards.
    pub fn send_urgent(&mut self, mut msg: Message) -> Result<()> {
        msg.trim_descr();
        self.output.output(&msg);

        let failure = self.call_recipients(&msg);
        msg.mark_processed();

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Delivers every queued message whose tick has been reached and purges
    /// it. Messages queued while this runs wait for the next call.
    pub fn handle_messages(&mut self) -> Result<()> {
        let now = self.ticks();
        let mut queue = std::mem::take(&mut self.queue);

        for msg in queue.iter().filter(|m| m.tick() <= now) {
            self.output.output(msg);
        }

        let mut failure = None;
        for msg in queue.iter_mut().filter(|m| m.tick() <= now) {
            if let Some(err) = self.call_recipients(msg) {
                failure = Some(err);
            }
            msg.mark_processed();
        }

        queue.retain(|m| !m.is_processed());
        queue.append(&mut self.queue);
        self.queue = queue;

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn call_recipients(&mut self, msg: &Message) -> Option<anyhow::Error> {
        let mut invoked = BTreeSet::new();
        let mut failure = None;

        for tag in msg.tags() {
            for id in self.registry.bucket(tag) {
                if invoked.contains(&id) {
                    continue;
                }
                let name = match self.registry.get(id) {
                    Some(r) if r.accepts(msg) => r.name().to_string(),
                    _ => continue,
                };
                invoked.insert(id);

                let Some(mut func) = self.registry.take_func(id) else {
                    tracing::trace!(target: "messenger", recipient = %name, "skipping re-entrant recipient");
                    continue;
                };
                let result = func(self, msg);
                self.registry.restore_func(id, func);

                if let Err(err) = result {
                    let tick = self.ticks();
                    tracing::error!(
                        target: "messenger",
                        tick,
                        recipient = %name,
                        "recipient failed: {err:#}"
                    );
                    failure = Some(err.context(format!(
                        "recipient \"{name}\" failed at {tick}ms"
                    )));
                }
            }
        }

        failure
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> &[Message] {
        &self.queue
    }

    pub fn remove_messages(&mut self, mut predicate: impl FnMut(&Message) -> bool) -> usize {
        let before = self.queue.len();
        self.queue.retain(|m| !predicate(m));
        before - self.queue.len()
    }

    /// Drops every recipient and message, warning about undelivered ones.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            let warning = Message::new(
                self.ticks(),
                ["engine", "close"],
                MessageKind::Warning,
                format!(
                    "Messenger closing with {} messages left in the queue",
                    self.queue.len()
                ),
            );
            if let Err(err) = self.send_urgent(warning) {
                tracing::error!(target: "messenger", "close warning failed: {err:#}");
            }
        }

        self.registry.clear();
        self.queue.clear();
    }
}
