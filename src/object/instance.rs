use std::fmt;
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use super::variant::{Variant, VariantMap};
use super::Object;
use crate::engine::path::PathFollower;

pub const ALARM_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned box in room coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec2,
    pub max: DVec2,
}

impl Aabb {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        other.min.x >= self.min.x
            && other.min.y >= self.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }
}

/// Frame counter of a sprite animation; wraps after `frame_count` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Animation {
    frame: u32,
    frame_count: u32,
}

impl Animation {
    pub fn new(frame_count: u32) -> Self {
        Self {
            frame: 0,
            frame_count: frame_count.max(1),
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Moves to the next frame; true when the animation wrapped around.
    pub fn advance(&mut self) -> bool {
        self.frame += 1;
        if self.frame >= self.frame_count {
            self.frame = 0;
            true
        } else {
            false
        }
    }
}

/// Placement of one instance in a room layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub object: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default)]
    pub data: VariantMap,
}

/// One live occurrence of an [`Object`] in a room.
pub struct Instance {
    id: InstanceId,
    object: Rc<Object>,
    position: DVec3,
    start: DVec3,
    previous: DVec3,
    depth: i32,
    is_persistent: bool,
    alarms: [Option<u64>; ALARM_COUNT],
    data: VariantMap,
    path: Option<PathFollower>,
    animation: Option<Animation>,
}

impl Instance {
    pub(crate) fn new(id: InstanceId, object: Rc<Object>, position: DVec3) -> Self {
        Self {
            id,
            depth: object.depth(),
            is_persistent: object.is_persistent(),
            object,
            position,
            start: position,
            previous: position,
            alarms: [None; ALARM_COUNT],
            data: VariantMap::new(),
            path: None,
            animation: None,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn object(&self) -> &Rc<Object> {
        &self.object
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn set_position(&mut self, position: DVec3) {
        self.position = position;
    }

    pub fn move_by(&mut self, offset: DVec3) {
        self.position += offset;
    }

    pub fn start(&self) -> DVec3 {
        self.start
    }

    pub fn set_to_start(&mut self) {
        self.position = self.start;
    }

    /// Position at the beginning of the current step.
    pub fn previous_position(&self) -> DVec3 {
        self.previous
    }

    pub(crate) fn remember_position(&mut self) {
        self.previous = self.position;
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub(crate) fn set_depth(&mut self, depth: i32) {
        self.depth = depth;
    }

    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    pub fn set_is_persistent(&mut self, is_persistent: bool) {
        self.is_persistent = is_persistent;
    }

    /// Arms alarm `index` to fire once the tick reaches `at_tick`.
    pub fn set_alarm(&mut self, index: usize, at_tick: u64) -> bool {
        match self.alarms.get_mut(index) {
            Some(alarm) => {
                *alarm = Some(at_tick);
                true
            }
            None => false,
        }
    }

    pub fn clear_alarm(&mut self, index: usize) {
        if let Some(alarm) = self.alarms.get_mut(index) {
            *alarm = None;
        }
    }

    pub fn alarm(&self, index: usize) -> Option<u64> {
        self.alarms.get(index).copied().flatten()
    }

    /// Disarms and returns every alarm whose time has come.
    pub(crate) fn take_due_alarms(&mut self, now: u64) -> Vec<usize> {
        let mut due = Vec::new();
        for (index, alarm) in self.alarms.iter_mut().enumerate() {
            if alarm.is_some_and(|at| now >= at) {
                *alarm = None;
                due.push(index);
            }
        }
        due
    }

    pub fn data(&self) -> &VariantMap {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut VariantMap {
        &mut self.data
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Variant>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn path(&self) -> Option<&PathFollower> {
        self.path.as_ref()
    }

    pub fn path_mut(&mut self) -> Option<&mut PathFollower> {
        self.path.as_mut()
    }

    /// Starts following `follower`, anchored at the current position.
    pub fn set_path(&mut self, mut follower: PathFollower) {
        follower.anchor(self.position);
        self.path = Some(follower);
    }

    pub fn clear_path(&mut self) {
        self.path = None;
    }

    pub(crate) fn take_path(&mut self) -> Option<PathFollower> {
        self.path.take()
    }

    pub(crate) fn put_path(&mut self, follower: PathFollower) {
        self.path = Some(follower);
    }

    pub fn animation(&self) -> Option<&Animation> {
        self.animation.as_ref()
    }

    pub fn set_animation(&mut self, animation: Option<Animation>) {
        self.animation = animation;
    }

    pub(crate) fn animation_mut(&mut self) -> Option<&mut Animation> {
        self.animation.as_mut()
    }

    /// Collision box, present when the object has a mask.
    pub fn aabb(&self) -> Option<Aabb> {
        self.object.mask().map(|size| {
            let min = self.position.truncate();
            Aabb::new(min, min + size)
        })
    }

    pub fn record(&self) -> InstanceRecord {
        InstanceRecord {
            object: self.object.name().to_string(),
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
            data: self.data.clone(),
        }
    }

    pub fn serialize(&self) -> Result<String> {
        ron::ser::to_string_pretty(&self.record(), ron::ser::PrettyConfig::default())
            .with_context(|| format!("failed to serialize instance {}", self.id))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("object", &self.object.name())
            .field("position", &self.position)
            .field("depth", &self.depth)
            .field("is_persistent", &self.is_persistent)
            .finish()
    }
}
