use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::{Message, Messenger};

/// Callback invoked for every message a recipient matches.
///
/// The bus itself is the engine context: a recipient may send, register
/// or unregister while it runs.
pub type RecipientFn = Box<dyn FnMut(&mut Messenger, &Message) -> anyhow::Result<()>>;

/// Generational handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecipientId {
    index: u32,
    generation: u32,
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

pub struct Recipient {
    name: String,
    tags: Vec<String>,
    tag_set: BTreeSet<String>,
    is_strict: bool,
    func: Option<RecipientFn>,
}

impl Recipient {
    pub fn new<I, S>(name: impl Into<String>, tags: I, is_strict: bool, func: RecipientFn) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut tag_set = BTreeSet::new();
        for tag in tags {
            let tag = tag.into();
            if tag_set.insert(tag.clone()) {
                ordered.push(tag);
            }
        }
        Self {
            name: name.into(),
            tags: ordered,
            tag_set,
            is_strict,
            func: Some(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_strict(&self) -> bool {
        self.is_strict
    }

    /// Whether this recipient wants `msg`: any shared tag for a non-strict
    /// recipient, identical tag sets for a strict one.
    pub fn accepts(&self, msg: &Message) -> bool {
        if self.is_strict {
            let msg_tags = msg.tag_set();
            msg_tags.len() == self.tag_set.len()
                && msg_tags.iter().all(|t| self.tag_set.contains(*t))
        } else {
            msg.tags().iter().any(|t| self.tag_set.contains(t))
        }
    }
}

impl fmt::Debug for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recipient")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("is_strict", &self.is_strict)
            .finish()
    }
}

struct Slot {
    generation: u32,
    recipient: Option<Recipient>,
}

/// Arena of recipients plus the tag → recipients index.
#[derive(Default)]
pub(crate) struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    buckets: HashMap<String, BTreeSet<RecipientId>>,
}

impl Registry {
    pub(crate) fn insert(&mut self, recipient: Recipient) -> RecipientId {
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                RecipientId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    recipient: None,
                });
                RecipientId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };

        for tag in recipient.tags() {
            self.buckets.entry(tag.clone()).or_default().insert(id);
        }
        self.slots[id.index as usize].recipient = Some(recipient);
        id
    }

    pub(crate) fn remove(&mut self, id: RecipientId) -> Option<Recipient> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let recipient = slot.recipient.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        for tag in recipient.tags() {
            if let Some(bucket) = self.buckets.get_mut(tag) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(tag);
                }
            }
        }
        Some(recipient)
    }

    pub(crate) fn get(&self, id: RecipientId) -> Option<&Recipient> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.recipient.as_ref())
    }

    fn get_mut(&mut self, id: RecipientId) -> Option<&mut Recipient> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.recipient.as_mut())
    }

    /// Moves the callback out so it can run with `&mut Messenger`.
    pub(crate) fn take_func(&mut self, id: RecipientId) -> Option<RecipientFn> {
        self.get_mut(id).and_then(|r| r.func.take())
    }

    /// Puts a callback back; dropped if the recipient went away meanwhile.
    pub(crate) fn restore_func(&mut self, id: RecipientId, func: RecipientFn) {
        if let Some(recipient) = self.get_mut(id) {
            recipient.func = Some(func);
        }
    }

    pub(crate) fn bucket(&self, tag: &str) -> Vec<RecipientId> {
        self.buckets
            .get(tag)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn bucket_len(&self, tag: &str) -> usize {
        self.buckets.get(tag).map_or(0, BTreeSet::len)
    }

    pub(crate) fn tags(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub(crate) fn ids(&self) -> Vec<RecipientId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.recipient.is_some())
            .map(|(index, slot)| RecipientId {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }

    pub(crate) fn find_by_name(&self, name: &str) -> Option<RecipientId> {
        self.ids()
            .into_iter()
            .find(|id| self.get(*id).is_some_and(|r| r.name() == name))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn clear(&mut self) {
        for id in self.ids() {
            self.remove(id);
        }
    }
}
