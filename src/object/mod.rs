//! Object definitions and the per-event dispatch table.
//!
//! An [`Object`] is a template shared by its [`Instance`]s. It handles a
//! subset of the fixed [`Event`] enumeration, either through native
//! handlers registered on the builder or through a [`ScriptHost`] whose
//! function names match the event names. The set of handled events is
//! computed once when the object is built; rooms skip everything else.

mod event;
mod instance;
mod payload;
mod script;
mod variant;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use anyhow::{bail, Result};
use glam::{DVec2, DVec3};

use crate::engine::core::FrameControl;
use crate::messenger::Messenger;

pub use event::{Event, EventSet};
pub use instance::{Aabb, Animation, Instance, InstanceId, InstanceRecord, ALARM_COUNT};
pub use payload::{DeviceChange, EventPayload, InputEvent, NetworkEvent, WindowEvent};
pub use script::ScriptHost;
pub use variant::{Variant, VariantMap};

pub type EventHandler = Box<dyn Fn(&mut Instance, &mut EventContext<'_>) -> Result<()>>;
pub type CollisionFilter = Box<dyn Fn(&Instance, &Instance) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    pub object: String,
    pub position: DVec3,
}

/// Changes asked for by event handlers, applied by the room once the
/// current phase ends.
#[derive(Debug, Default)]
pub struct FrameRequests {
    pub(crate) spawns: Vec<SpawnRequest>,
    pub(crate) destroys: Vec<InstanceId>,
    pub(crate) control: Option<FrameControl>,
}

impl FrameRequests {
    pub fn control(&self) -> Option<&FrameControl> {
        self.control.as_ref()
    }

    pub fn is_control_requested(&self) -> bool {
        self.control.is_some()
    }

    pub(crate) fn take_control(&mut self) -> Option<FrameControl> {
        self.control.take()
    }

    fn request(&mut self, control: FrameControl) {
        // first request in a frame wins
        if self.control.is_none() {
            self.control = Some(control);
        }
    }
}

/// Everything an event handler may touch besides its own instance.
pub struct EventContext<'a> {
    bus: &'a mut Messenger,
    payload: &'a EventPayload,
    tick: u64,
    frame: u64,
    bounds: Aabb,
    requests: &'a mut FrameRequests,
}

impl<'a> EventContext<'a> {
    pub fn new(
        bus: &'a mut Messenger,
        payload: &'a EventPayload,
        tick: u64,
        frame: u64,
        bounds: Aabb,
        requests: &'a mut FrameRequests,
    ) -> Self {
        Self {
            bus,
            payload,
            tick,
            frame,
            bounds,
            requests,
        }
    }

    pub fn bus(&mut self) -> &mut Messenger {
        self.bus
    }

    pub fn payload(&self) -> &EventPayload {
        self.payload
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn room_bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn spawn(&mut self, object: impl Into<String>, position: DVec3) {
        self.requests.spawns.push(SpawnRequest {
            object: object.into(),
            position,
        });
    }

    pub fn destroy(&mut self, id: InstanceId) {
        self.requests.destroys.push(id);
    }

    pub fn restart_room(&mut self) {
        self.requests.request(FrameControl::RestartRoom);
    }

    pub fn restart_game(&mut self) {
        self.requests.request(FrameControl::RestartGame);
    }

    pub fn change_room(&mut self, room: impl Into<String>) {
        self.requests.request(FrameControl::ChangeRoom(room.into()));
    }

    pub fn end_game(&mut self) {
        self.requests.request(FrameControl::EndGame);
    }
}

pub struct Object {
    id: ObjectId,
    name: String,
    depth: i32,
    is_solid: bool,
    is_visible: bool,
    is_persistent: bool,
    is_pausable: bool,
    mask: Option<DVec2>,
    handlers: BTreeMap<Event, EventHandler>,
    collision_filter: Option<CollisionFilter>,
    script: Option<Rc<dyn ScriptHost>>,
    scripted: EventSet,
    implemented: EventSet,
    instances: RefCell<BTreeSet<InstanceId>>,
}

impl Object {
    pub fn builder(name: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder::new(name)
    }

    /// Object whose events are the functions `host` defines.
    pub fn scripted(name: impl Into<String>, host: Rc<dyn ScriptHost>) -> ObjectBuilder {
        ObjectBuilder::new(name).script(host)
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn is_solid(&self) -> bool {
        self.is_solid
    }

    pub fn is_visible(&self) -> bool {
        self.is_visible
    }

    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    pub fn is_pausable(&self) -> bool {
        self.is_pausable
    }

    /// Size of the collision box, if the object collides at all.
    pub fn mask(&self) -> Option<DVec2> {
        self.mask
    }

    pub fn implemented_events(&self) -> EventSet {
        self.implemented
    }

    pub fn implements(&self, event: Event) -> bool {
        self.implemented.contains(event)
    }

    pub fn script(&self) -> Option<&Rc<dyn ScriptHost>> {
        self.script.as_ref()
    }

    pub fn instances(&self) -> Vec<InstanceId> {
        self.instances.borrow().iter().copied().collect()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.borrow().len()
    }

    pub(crate) fn add_instance(&self, id: InstanceId) {
        self.instances.borrow_mut().insert(id);
    }

    pub(crate) fn remove_instance(&self, id: InstanceId) {
        self.instances.borrow_mut().remove(&id);
    }

    /// Runs this object's handler for `event` on `inst`. Events the object
    /// does not implement are a no-op.
    pub fn dispatch(&self, event: Event, inst: &mut Instance, ctx: &mut EventContext<'_>) -> Result<()> {
        if !self.implemented.contains(event) {
            return Ok(());
        }
        if self.scripted.contains(event) {
            if let Some(host) = &self.script {
                let args = ctx.payload().to_map();
                host.call(event.name(), inst, &args)?;
                return Ok(());
            }
        }
        match self.handlers.get(&event) {
            Some(handler) => handler(inst, ctx),
            None => Ok(()),
        }
    }

    /// Whether a collision between `inst` and `other` should be handled.
    /// Defaults to true.
    pub fn check_collision_filter(&self, inst: &mut Instance, other: &Instance) -> Result<bool> {
        let event = Event::CheckCollisionFilter;
        if self.scripted.contains(event) {
            if let Some(host) = &self.script {
                let args = VariantMap::from([
                    ("other".to_string(), Variant::Int(i64::from(other.id().0))),
                    ("object".to_string(), Variant::Str(other.object().name().to_string())),
                ]);
                let verdict = host.call(event.name(), inst, &args)?;
                return Ok(verdict.as_bool().unwrap_or(true));
            }
        }
        Ok(self
            .collision_filter
            .as_ref()
            .map_or(true, |filter| filter(inst, other)))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("implemented", &self.implemented)
            .field("script", &self.script.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

pub struct ObjectBuilder {
    name: String,
    depth: i32,
    is_solid: bool,
    is_visible: bool,
    is_persistent: bool,
    is_pausable: bool,
    mask: Option<DVec2>,
    handlers: BTreeMap<Event, EventHandler>,
    collision_filter: Option<CollisionFilter>,
    script: Option<Rc<dyn ScriptHost>>,
}

impl ObjectBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depth: 0,
            is_solid: false,
            is_visible: true,
            is_persistent: false,
            is_pausable: true,
            mask: None,
            handlers: BTreeMap::new(),
            collision_filter: None,
            script: None,
        }
    }

    pub fn depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn solid(mut self, is_solid: bool) -> Self {
        self.is_solid = is_solid;
        self
    }

    pub fn visible(mut self, is_visible: bool) -> Self {
        self.is_visible = is_visible;
        self
    }

    pub fn persistent(mut self, is_persistent: bool) -> Self {
        self.is_persistent = is_persistent;
        self
    }

    pub fn pausable(mut self, is_pausable: bool) -> Self {
        self.is_pausable = is_pausable;
        self
    }

    pub fn mask(mut self, width: f64, height: f64) -> Self {
        self.mask = Some(DVec2::new(width, height));
        self
    }

    pub fn on<F>(mut self, event: Event, handler: F) -> Self
    where
        F: Fn(&mut Instance, &mut EventContext<'_>) -> Result<()> + 'static,
    {
        self.handlers.insert(event, Box::new(handler));
        self
    }

    pub fn collision_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Instance, &Instance) -> bool + 'static,
    {
        self.collision_filter = Some(Box::new(filter));
        self
    }

    pub fn script(mut self, host: Rc<dyn ScriptHost>) -> Self {
        self.script = Some(host);
        self
    }

    pub fn build(self) -> Object {
        let scripted: EventSet = match &self.script {
            Some(host) => Event::ALL
                .iter()
                .copied()
                .filter(|e| host.has_function(e.name()))
                .collect(),
            None => EventSet::empty(),
        };

        let mut implemented: EventSet = self.handlers.keys().copied().collect();
        for event in scripted.iter() {
            implemented.insert(event);
        }
        if self.collision_filter.is_some() {
            implemented.insert(Event::CheckCollisionFilter);
        }

        tracing::trace!(target: "room", object = %self.name, events = ?implemented, "built object");

        Object {
            id: ObjectId(0),
            name: self.name,
            depth: self.depth,
            is_solid: self.is_solid,
            is_visible: self.is_visible,
            is_persistent: self.is_persistent,
            is_pausable: self.is_pausable,
            mask: self.mask,
            handlers: self.handlers,
            collision_filter: self.collision_filter,
            script: self.script,
            scripted,
            implemented,
            instances: RefCell::new(BTreeSet::new()),
        }
    }
}

/// Every object known to the game, by id and name.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: Vec<Rc<Object>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mut object: Object) -> Result<Rc<Object>> {
        if self.get_by_name(&object.name).is_some() {
            bail!("object \"{}\" is already registered", object.name);
        }
        object.id = ObjectId(self.objects.len() as u32);
        let object = Rc::new(object);
        tracing::debug!(target: "room", id = %object.id, name = %object.name, "registered object");
        self.objects.push(Rc::clone(&object));
        Ok(object)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Rc<Object>> {
        self.objects.get(id.0 as usize)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Rc<Object>> {
        self.objects.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Object>> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
