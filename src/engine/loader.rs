use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;

use super::resources::{Resource, ResourceHandle};
use crate::messenger::{Message, MessageKind, Messenger, RecipientId};

/// Tags of the message that re-arms lazy loading every tick.
pub const LAZY_SIGNAL_TAGS: [&str; 2] = ["engine", "loader"];

pub type CustomLoadFn = Box<dyn FnMut(&mut dyn Resource) -> Result<()>>;

/// Outcome of loading a single queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Loaded,
    Exhausted,
    Failed,
}

/// Payload of a lazy signal: which loader sent it and for which run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LazySignal {
    owner: usize,
    run: u64,
}

struct Entry {
    resource: ResourceHandle,
    custom: Option<CustomLoadFn>,
}

#[derive(Default)]
struct LoaderState {
    queue: Vec<Entry>,
    cursor: usize,
    amount_loaded: usize,
    total: usize,
    failed: usize,
    lazy_amount: usize,
    lazy_run: u64,
    lazy_recipient: Option<RecipientId>,
}

/// FIFO queue of resources loaded either at once or a few per tick.
///
/// Cloning yields another handle to the same queue; the lazy recipient
/// holds one of these. No borrow of the queue is held while a resource
/// loads, so load functions may queue more work or read progress.
#[derive(Clone, Default)]
pub struct Loader {
    state: Rc<RefCell<LoaderState>>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> usize {
        Rc::as_ptr(&self.state) as usize
    }

    fn is_own_signal(&self, msg: &Message) -> bool {
        msg.kind() == MessageKind::Internal
            && msg.tags().iter().eq(LAZY_SIGNAL_TAGS.iter())
            && msg
                .data_as::<LazySignal>()
                .is_some_and(|s| s.owner == self.owner())
    }

    pub fn queue(&self, resource: ResourceHandle) {
        let mut state = self.state.borrow_mut();
        state.queue.push(Entry {
            resource,
            custom: None,
        });
        state.total += 1;
    }

    pub fn queue_with<F>(&self, resource: ResourceHandle, custom: F)
    where
        F: FnMut(&mut dyn Resource) -> Result<()> + 'static,
    {
        let mut state = self.state.borrow_mut();
        state.queue.push(Entry {
            resource,
            custom: Some(Box::new(custom)),
        });
        state.total += 1;
    }

    /// Empties the queue. Lazy signals still in flight go stale.
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.queue.clear();
        state.cursor = 0;
        state.amount_loaded = 0;
        state.total = 0;
        state.failed = 0;
        state.lazy_run += 1;
    }

    pub fn load_next(&self) -> LoadStep {
        let (index, resource, mut custom) = {
            let mut state = self.state.borrow_mut();
            let index = state.cursor;
            let Some(entry) = state.queue.get_mut(index) else {
                return LoadStep::Exhausted;
            };
            let resource = Rc::clone(&entry.resource);
            let custom = entry.custom.take();
            state.cursor += 1;
            state.amount_loaded += 1;
            (index, resource, custom)
        };

        let result = {
            let mut res = resource.borrow_mut();
            if res.is_loaded() {
                Ok(())
            } else {
                match custom.as_mut() {
                    Some(load) => load(&mut *res),
                    None => res.load(),
                }
            }
        };

        let mut state = self.state.borrow_mut();
        if let Some(custom) = custom {
            if let Some(entry) = state
                .queue
                .get_mut(index)
                .filter(|e| Rc::ptr_eq(&e.resource, &resource))
            {
                entry.custom = Some(custom);
            }
        }
        match result {
            Ok(()) => LoadStep::Loaded,
            Err(err) => {
                tracing::warn!(target: "loader", name = resource.borrow().name(), "resource failed to load: {err:#}");
                state.failed += 1;
                LoadStep::Failed
            }
        }
    }

    /// Loads everything from the cursor to the end of the queue. Returns
    /// the number of resources that failed.
    pub fn load(&self) -> usize {
        let mut failed = 0;
        loop {
            match self.load_next() {
                LoadStep::Exhausted => break,
                LoadStep::Failed => failed += 1,
                LoadStep::Loaded => {}
            }
        }
        tracing::debug!(target: "loader", loaded = self.amount_loaded(), failed, "loaded queue");
        failed
    }

    /// Loads one batch and asks the bus for another tick if work remains.
    fn lazy_step(&self, bus: &mut Messenger) -> usize {
        let amount = self.state.borrow().lazy_amount;
        let mut failed = 0;
        for _ in 0..amount {
            match self.load_next() {
                LoadStep::Exhausted => break,
                LoadStep::Failed => failed += 1,
                LoadStep::Loaded => {}
            }
        }

        let (is_remaining, run) = {
            let state = self.state.borrow();
            (state.cursor < state.queue.len(), state.lazy_run)
        };
        if is_remaining {
            bus.send_data(
                LAZY_SIGNAL_TAGS,
                MessageKind::Internal,
                format!("Lazily load the next {amount} resources"),
                Rc::new(LazySignal {
                    owner: self.owner(),
                    run,
                }),
            );
        } else {
            tracing::debug!(target: "loader", loaded = self.amount_loaded(), failed = self.amount_failed(), "lazy loading finished");
        }
        failed
    }

    /// Restarts the queue and loads `amount` resources now and `amount`
    /// more on every following tick, driven by the bus. Returns the failures
    /// of the first batch.
    ///
    /// Only one signal is ever live: signals left over from an earlier
    /// run are dropped from the queue, and any already taken for delivery
    /// are ignored.
    pub fn load_lazy(&self, bus: &mut Messenger, amount: usize) -> usize {
        let needs_recipient = self.state.borrow().lazy_recipient.is_none();
        if needs_recipient {
            let handle = self.clone();
            let id = bus.register_protected("lazy_loader", LAZY_SIGNAL_TAGS, true, move |bus, msg| {
                let run = handle.state.borrow().lazy_run;
                let is_current = msg
                    .data_as::<LazySignal>()
                    .is_some_and(|s| s.owner == handle.owner() && s.run == run);
                if is_current {
                    handle.lazy_step(bus);
                }
                Ok(())
            });
            self.state.borrow_mut().lazy_recipient = Some(id);
        }

        let stale = bus.remove_messages(|m| self.is_own_signal(m));
        if stale > 0 {
            tracing::debug!(target: "loader", stale, "dropped stale lazy signals");
        }

        {
            let mut state = self.state.borrow_mut();
            state.amount_loaded = 0;
            state.failed = 0;
            state.total = state.queue.len();
            state.lazy_amount = amount.max(1);
            state.cursor = 0;
            state.lazy_run += 1;
        }
        self.lazy_step(bus)
    }

    pub fn load_lazy_one(&self, bus: &mut Messenger) -> usize {
        self.load_lazy(bus, 1)
    }

    /// Unregisters the lazy recipient, e.g. when the engine shuts down.
    pub fn detach(&self, bus: &mut Messenger) {
        bus.remove_messages(|m| self.is_own_signal(m));
        if let Some(id) = self.state.borrow_mut().lazy_recipient.take() {
            bus.unregister_protected(id);
        }
    }

    pub fn amount_loaded(&self) -> usize {
        self.state.borrow().amount_loaded
    }

    pub fn total(&self) -> usize {
        self.state.borrow().total
    }

    pub fn amount_failed(&self) -> usize {
        self.state.borrow().failed
    }

    pub fn is_done(&self) -> bool {
        let state = self.state.borrow();
        state.cursor >= state.queue.len()
    }
}
