use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

use crate::error::TimelineError;
use crate::messenger::Messenger;

pub type TimelineAction = Box<dyn FnMut(&mut Messenger) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineStep {
    Idle,
    Running,
    Ended,
}

/// Actions scheduled at frame offsets from the moment the timeline starts.
pub struct Timeline {
    name: String,
    actions: BTreeMap<u64, Vec<TimelineAction>>,
    end_action: Option<TimelineAction>,
    start_frame: u64,
    last_frame: u64,
    next_offset: u64,
    is_running: bool,
    is_paused: bool,
    is_looping: bool,
}

impl Timeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: BTreeMap::new(),
            end_action: None,
            start_frame: 0,
            last_frame: 0,
            next_offset: 0,
            is_running: false,
            is_paused: false,
            is_looping: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_action<F>(&mut self, offset: u64, action: F) -> Result<(), TimelineError>
    where
        F: FnMut(&mut Messenger) -> Result<()> + 'static,
    {
        if self.is_running {
            return Err(TimelineError::Running(self.name.clone()));
        }
        self.actions.entry(offset).or_default().push(Box::new(action));
        Ok(())
    }

    /// Drops every action at `offset`. Returns how many were removed.
    pub fn remove_actions(&mut self, offset: u64) -> Result<usize, TimelineError> {
        if self.is_running {
            return Err(TimelineError::Running(self.name.clone()));
        }
        Ok(self.actions.remove(&offset).map_or(0, |a| a.len()))
    }

    pub fn set_end_action<F>(&mut self, action: F)
    where
        F: FnMut(&mut Messenger) -> Result<()> + 'static,
    {
        self.end_action = Some(Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.actions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn start(&mut self, frame: u64) {
        self.start_frame = frame;
        self.last_frame = frame;
        self.next_offset = 0;
        self.is_running = true;
        self.is_paused = false;
    }

    pub fn stop(&mut self) {
        self.is_running = false;
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn set_pause(&mut self, is_paused: bool) {
        self.is_paused = is_paused;
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn set_is_looping(&mut self, is_looping: bool) {
        self.is_looping = is_looping;
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    /// Runs every action due up to `frame`.
    ///
    /// All due actions run even if one fails; the last failure is returned
    /// after the timeline state has been updated.
    pub fn step_to(&mut self, frame: u64, bus: &mut Messenger) -> Result<TimelineStep> {
        if !self.is_running {
            return Ok(TimelineStep::Idle);
        }
        if self.is_paused {
            // paused frames push the schedule back
            self.start_frame += frame.saturating_sub(self.last_frame);
            self.last_frame = frame;
            return Ok(TimelineStep::Running);
        }
        self.last_frame = frame;

        let Some(offset) = frame.checked_sub(self.start_frame) else {
            return Ok(TimelineStep::Running);
        };

        let mut failure = None;
        if offset >= self.next_offset {
            for (at, actions) in self.actions.range_mut(self.next_offset..=offset) {
                for action in actions.iter_mut() {
                    if let Err(err) = action(bus) {
                        tracing::error!(target: "room", timeline = %self.name, offset = at, "timeline action failed: {err:#}");
                        failure = Some(err);
                    }
                }
            }
            self.next_offset = offset + 1;
        }

        let last = self.actions.keys().next_back().copied().unwrap_or(0);
        let step = if self.next_offset > last {
            if let Some(action) = self.end_action.as_mut() {
                if let Err(err) = action(bus) {
                    failure = Some(err);
                }
            }
            self.is_running = false;
            TimelineStep::Ended
        } else {
            TimelineStep::Running
        };

        match failure {
            Some(err) => Err(err),
            None => Ok(step),
        }
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("name", &self.name)
            .field("actions", &self.len())
            .field("is_running", &self.is_running)
            .field("is_looping", &self.is_looping)
            .finish()
    }
}
