use std::fmt;

/// Every point at which the engine can call into an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Update,
    Create,
    Destroy,
    Alarm,
    StepBegin,
    StepMid,
    StepEnd,
    KeyboardPress,
    MousePress,
    KeyboardInput,
    MouseInput,
    KeyboardRelease,
    MouseRelease,
    ControllerAxis,
    ControllerPress,
    ControllerRelease,
    ControllerModify,
    CommandlineInput,
    PathEnd,
    OutsideRoom,
    IntersectBoundary,
    Collision,
    CheckCollisionFilter,
    Draw,
    AnimationEnd,
    RoomStart,
    RoomEnd,
    GameStart,
    GameEnd,
    Window,
    Network,
}

impl Event {
    pub const COUNT: usize = 31;

    pub const ALL: [Event; Event::COUNT] = [
        Event::Update,
        Event::Create,
        Event::Destroy,
        Event::Alarm,
        Event::StepBegin,
        Event::StepMid,
        Event::StepEnd,
        Event::KeyboardPress,
        Event::MousePress,
        Event::KeyboardInput,
        Event::MouseInput,
        Event::KeyboardRelease,
        Event::MouseRelease,
        Event::ControllerAxis,
        Event::ControllerPress,
        Event::ControllerRelease,
        Event::ControllerModify,
        Event::CommandlineInput,
        Event::PathEnd,
        Event::OutsideRoom,
        Event::IntersectBoundary,
        Event::Collision,
        Event::CheckCollisionFilter,
        Event::Draw,
        Event::AnimationEnd,
        Event::RoomStart,
        Event::RoomEnd,
        Event::GameStart,
        Event::GameEnd,
        Event::Window,
        Event::Network,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Function name a script defines to handle this event.
    pub fn name(self) -> &'static str {
        match self {
            Event::Update => "update",
            Event::Create => "create",
            Event::Destroy => "destroy",
            Event::Alarm => "alarm",
            Event::StepBegin => "step_begin",
            Event::StepMid => "step_mid",
            Event::StepEnd => "step_end",
            Event::KeyboardPress => "keyboard_press",
            Event::MousePress => "mouse_press",
            Event::KeyboardInput => "keyboard_input",
            Event::MouseInput => "mouse_input",
            Event::KeyboardRelease => "keyboard_release",
            Event::MouseRelease => "mouse_release",
            Event::ControllerAxis => "controller_axis",
            Event::ControllerPress => "controller_press",
            Event::ControllerRelease => "controller_release",
            Event::ControllerModify => "controller_modify",
            Event::CommandlineInput => "commandline_input",
            Event::PathEnd => "path_end",
            Event::OutsideRoom => "outside_room",
            Event::IntersectBoundary => "intersect_boundary",
            Event::Collision => "collision",
            Event::CheckCollisionFilter => "check_collision_filter",
            Event::Draw => "draw",
            Event::AnimationEnd => "animation_end",
            Event::RoomStart => "room_start",
            Event::RoomEnd => "room_end",
            Event::GameStart => "game_start",
            Event::GameEnd => "game_end",
            Event::Window => "window",
            Event::Network => "network",
        }
    }

    pub fn from_name(name: &str) -> Option<Event> {
        Event::ALL.iter().copied().find(|e| e.name() == name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitset over [`Event`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventSet(u64);

impl EventSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, event: Event) {
        self.0 |= 1u64 << event.index();
    }

    pub fn remove(&mut self, event: Event) {
        self.0 &= !(1u64 << event.index());
    }

    pub fn contains(&self, event: Event) -> bool {
        self.0 & (1u64 << event.index()) != 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        Event::ALL.iter().copied().filter(|e| self.contains(*e))
    }
}

impl FromIterator<Event> for EventSet {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let mut set = EventSet::empty();
        for event in iter {
            set.insert(event);
        }
        set
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_table() {
        for event in Event::ALL {
            assert_eq!(Event::from_name(event.name()), Some(event));
        }
        assert_eq!(Event::from_name("teleport"), None);
    }

    #[test]
    fn discriminants_match_table_positions() {
        for (i, event) in Event::ALL.iter().enumerate() {
            assert_eq!(event.index(), i);
        }
    }

    #[test]
    fn set_tracks_membership() {
        let set: EventSet = [Event::Create, Event::Draw, Event::Create].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(Event::Draw));
        assert!(!set.contains(Event::Destroy));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Event::Create, Event::Draw]);
    }
}
