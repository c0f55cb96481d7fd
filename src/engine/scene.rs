use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path as FsPath;
use std::rc::Rc;

use anyhow::{Context, Result};
use glam::{DVec2, DVec3};

use super::core::FrameControl;
use super::resources::ResourceHandle;
use super::timeline::{Timeline, TimelineStep};
use crate::messenger::Messenger;
use crate::object::{
    Aabb, Event, EventContext, EventPayload, FrameRequests, InputEvent, Instance, InstanceId,
    InstanceRecord, NetworkEvent, Object, ObjectRegistry,
};

/// What a room needs from the engine while it runs a phase.
pub struct RoomEnv<'a> {
    pub bus: &'a mut Messenger,
    pub objects: &'a ObjectRegistry,
    pub tick: u64,
    pub frame: u64,
}

type IndexKey = (Reverse<i32>, InstanceId);

/// Holds the live instances of one room and drives their events.
///
/// Each event has its own index of the instances whose object implements
/// it, ordered by depth (deepest first) and then id. Instances created or
/// destroyed by handlers are applied between phases, never mid-iteration.
pub struct Room {
    name: String,
    size: DVec2,
    layout: Vec<InstanceRecord>,
    resources: Vec<ResourceHandle>,
    timelines: Vec<Timeline>,
    instances: BTreeMap<InstanceId, Instance>,
    index: BTreeMap<Event, BTreeSet<IndexKey>>,
    created: Vec<InstanceId>,
    destroyed: Vec<InstanceId>,
    requests: FrameRequests,
    next_id: u32,
    is_ready: bool,
    is_paused: bool,
}

impl Room {
    pub fn new(name: impl Into<String>, width: f64, height: f64) -> Self {
        Self {
            name: name.into(),
            size: DVec2::new(width, height),
            layout: Vec::new(),
            resources: Vec::new(),
            timelines: Vec::new(),
            instances: BTreeMap::new(),
            index: BTreeMap::new(),
            created: Vec::new(),
            destroyed: Vec::new(),
            requests: FrameRequests::default(),
            next_id: 0,
            is_ready: false,
            is_paused: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(DVec2::ZERO, self.size)
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn set_pause(&mut self, is_paused: bool) {
        self.is_paused = is_paused;
    }

    pub fn add_resource(&mut self, resource: ResourceHandle) {
        self.resources.push(resource);
    }

    pub fn resources(&self) -> &[ResourceHandle] {
        &self.resources
    }

    pub fn add_timeline(&mut self, timeline: Timeline) {
        self.timelines.push(timeline);
    }

    pub fn timeline_mut(&mut self, name: &str) -> Option<&mut Timeline> {
        self.timelines.iter_mut().find(|t| t.name() == name)
    }

    pub fn layout(&self) -> &[InstanceRecord] {
        &self.layout
    }

    pub fn set_layout(&mut self, layout: Vec<InstanceRecord>) {
        self.layout = layout;
    }

    /// Replaces the layout with the records in a RON list.
    pub fn load_instance_map(&mut self, source: &str) -> Result<usize> {
        let layout: Vec<InstanceRecord> = ron::from_str(source)
            .with_context(|| format!("invalid instance map for room \"{}\"", self.name))?;
        self.layout = layout;
        Ok(self.layout.len())
    }

    pub fn load_instance_map_file(&mut self, path: impl AsRef<FsPath>) -> Result<usize> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read instance map {}", path.display()))?;
        self.load_instance_map(&source)
    }

    /// Current instances as a RON list, in id order.
    pub fn save_instance_map(&self) -> Result<String> {
        let records: Vec<InstanceRecord> = self.instances.values().map(Instance::record).collect();
        ron::ser::to_string_pretty(&records, ron::ser::PrettyConfig::default())
            .with_context(|| format!("failed to serialize instances of room \"{}\"", self.name))
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(&id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(&id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instances_of(&self, object: &str) -> Vec<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.object().name() == object)
            .map(Instance::id)
            .collect()
    }

    /// Number of instances that will receive `event`.
    pub fn listeners(&self, event: Event) -> usize {
        self.index.get(&event).map_or(0, BTreeSet::len)
    }

    /// Adds an instance. Its create event runs once the current phase ends.
    pub fn add_instance(&mut self, object: Rc<Object>, position: DVec3) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.insert(Instance::new(id, object, position));
        self.created.push(id);
        id
    }

    /// Schedules an instance for the destroy phase.
    pub fn destroy(&mut self, id: InstanceId) -> bool {
        if !self.instances.contains_key(&id) || self.destroyed.contains(&id) {
            return false;
        }
        self.destroyed.push(id);
        true
    }

    pub fn set_instance_depth(&mut self, id: InstanceId, depth: i32) {
        if let Some(mut inst) = self.instances.remove(&id) {
            self.unindex(&inst);
            inst.set_depth(depth);
            self.insert(inst);
        }
    }

    pub fn take_control(&mut self) -> Option<FrameControl> {
        self.requests.take_control()
    }

    pub fn is_control_requested(&self) -> bool {
        self.requests.is_control_requested()
    }

    fn insert(&mut self, inst: Instance) {
        let key = (Reverse(inst.depth()), inst.id());
        for event in inst.object().implemented_events().iter() {
            self.index.entry(event).or_default().insert(key);
        }
        inst.object().add_instance(inst.id());
        self.instances.insert(inst.id(), inst);
    }

    fn unindex(&mut self, inst: &Instance) {
        let key = (Reverse(inst.depth()), inst.id());
        for event in inst.object().implemented_events().iter() {
            if let Some(set) = self.index.get_mut(&event) {
                set.remove(&key);
            }
        }
    }

    fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        let inst = self.instances.remove(&id)?;
        self.unindex(&inst);
        inst.object().remove_instance(id);
        Some(inst)
    }

    fn targets(&self, event: Event) -> Vec<InstanceId> {
        self.index
            .get(&event)
            .map(|set| set.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default()
    }

    fn is_skipped(&self, object: &Object, event: Event) -> bool {
        let pause_exempt = matches!(
            event,
            Event::Create
                | Event::Destroy
                | Event::RoomStart
                | Event::RoomEnd
                | Event::GameStart
                | Event::GameEnd
        );
        self.is_paused && object.is_pausable() && !pause_exempt
    }

    fn dispatch_one(
        &mut self,
        env: &mut RoomEnv<'_>,
        id: InstanceId,
        event: Event,
        payload: &EventPayload,
    ) -> Result<()> {
        let bounds = self.bounds();
        let skipped = match self.instances.get(&id) {
            Some(inst) => self.is_skipped(inst.object(), event),
            None => return Ok(()),
        };
        if skipped {
            return Ok(());
        }
        let Some(inst) = self.instances.get_mut(&id) else {
            return Ok(());
        };
        let object = Rc::clone(inst.object());
        let mut ctx = EventContext::new(
            &mut *env.bus,
            payload,
            env.tick,
            env.frame,
            bounds,
            &mut self.requests,
        );
        object
            .dispatch(event, inst, &mut ctx)
            .with_context(|| format!("{event} event of {} instance {id}", object.name()))
    }

    /// Sends `event` to every listening instance, stopping early when a
    /// handler asks for a control change.
    fn run_event(&mut self, env: &mut RoomEnv<'_>, event: Event, payload: &EventPayload) -> Result<()> {
        for id in self.targets(event) {
            self.dispatch_one(env, id, event, payload)?;
            if self.requests.is_control_requested() {
                break;
            }
        }
        self.apply_requests(env)
    }

    /// Applies spawn and destroy requests and runs create events until no
    /// new instances appear.
    ///
    /// A failing create handler does not stop the others; the last failure
    /// is returned once everything is applied.
    fn apply_requests(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let mut failure = None;
        loop {
            for id in std::mem::take(&mut self.requests.destroys) {
                self.destroy(id);
            }
            for spawn in std::mem::take(&mut self.requests.spawns) {
                match env.objects.get_by_name(&spawn.object) {
                    Some(object) => {
                        self.add_instance(Rc::clone(object), spawn.position);
                    }
                    None => {
                        tracing::warn!(target: "room", room = %self.name, object = %spawn.object, "cannot spawn unknown object");
                    }
                }
            }

            if self.created.is_empty() {
                break;
            }
            for id in std::mem::take(&mut self.created) {
                if let Err(err) = self.dispatch_one(env, id, Event::Create, &EventPayload::None) {
                    tracing::error!(target: "room", room = %self.name, instance = %id, "create failed: {err:#}");
                    failure = Some(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sets up the room: adopts carried-over persistent instances, creates
    /// the layout, then runs create and room_start events.
    pub fn start(&mut self, env: &mut RoomEnv<'_>, persistent: Vec<Instance>) -> Result<()> {
        for inst in persistent {
            self.next_id = self.next_id.max(inst.id().0 + 1);
            self.insert(inst);
        }

        for record in self.layout.clone() {
            let Some(object) = env.objects.get_by_name(&record.object) else {
                tracing::warn!(target: "room", room = %self.name, object = %record.object, "instance map names an unknown object");
                continue;
            };
            let id = self.add_instance(Rc::clone(object), DVec3::new(record.x, record.y, record.z));
            if let Some(inst) = self.instances.get_mut(&id) {
                inst.data_mut().extend(record.data);
            }
        }

        self.is_ready = true;
        tracing::info!(target: "room", room = %self.name, instances = self.instances.len(), "room started");

        self.apply_requests(env)?;
        if self.requests.is_control_requested() {
            return Ok(());
        }
        self.run_event(env, Event::RoomStart, &EventPayload::None)
    }

    /// Runs room_end and clears the room. Returns the persistent instances
    /// so the next room can adopt them.
    pub fn end(&mut self, env: &mut RoomEnv<'_>) -> Result<Vec<Instance>> {
        let result = self.run_event(env, Event::RoomEnd, &EventPayload::None);

        let ids: Vec<InstanceId> = self.instances.keys().copied().collect();
        let mut persistent = Vec::new();
        for id in ids {
            if let Some(inst) = self.remove(id) {
                if inst.is_persistent() {
                    persistent.push(inst);
                }
            }
        }

        self.index.clear();
        self.created.clear();
        self.destroyed.clear();
        self.requests.spawns.clear();
        self.requests.destroys.clear();
        for timeline in &mut self.timelines {
            timeline.stop();
        }
        self.next_id = 0;
        self.is_ready = false;
        self.is_paused = false;
        tracing::info!(target: "room", room = %self.name, kept = persistent.len(), "room ended");

        result.map(|()| persistent)
    }

    pub fn game_start(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        self.run_event(env, Event::GameStart, &EventPayload::None)
    }

    pub fn game_end(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        self.run_event(env, Event::GameEnd, &EventPayload::None)
    }

    pub fn step_begin(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        for inst in self.instances.values_mut() {
            inst.remember_position();
        }
        self.run_event(env, Event::StepBegin, &EventPayload::None)
    }

    /// Fires every alarm that has come due. Paused pausable instances keep
    /// their alarms armed.
    pub fn alarms(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let mut ids: Vec<(Reverse<i32>, InstanceId)> = self
            .instances
            .values()
            .map(|i| (Reverse(i.depth()), i.id()))
            .collect();
        ids.sort();

        for (_, id) in ids {
            let due = match self.instances.get_mut(&id) {
                Some(inst) if !(self.is_paused && inst.object().is_pausable()) => {
                    inst.take_due_alarms(env.tick)
                }
                _ => continue,
            };
            for index in due {
                self.dispatch_one(env, id, Event::Alarm, &EventPayload::Alarm { index })?;
                if self.requests.is_control_requested() {
                    return self.apply_requests(env);
                }
            }
        }
        self.apply_requests(env)
    }

    /// Dispatches the object events raised by one input event. The payload
    /// is only built when some instance listens.
    pub fn input(&mut self, env: &mut RoomEnv<'_>, input: &InputEvent) -> Result<()> {
        let mut payload = None;
        for &event in input.events() {
            if self.listeners(event) == 0 {
                continue;
            }
            let payload = payload.get_or_insert_with(|| EventPayload::Input(input.clone()));
            self.run_event(env, event, payload)?;
            if self.requests.is_control_requested() {
                break;
            }
        }
        Ok(())
    }

    pub fn commandline_input(&mut self, env: &mut RoomEnv<'_>, line: &str) -> Result<()> {
        if self.listeners(Event::CommandlineInput) == 0 {
            return Ok(());
        }
        self.run_event(env, Event::CommandlineInput, &EventPayload::Command(line.to_string()))
    }

    /// Runs step_mid and advances timelines; looping timelines restart on
    /// the next frame after they end.
    pub fn step_mid(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        self.run_event(env, Event::StepMid, &EventPayload::None)?;
        if self.requests.is_control_requested() {
            return Ok(());
        }

        let mut failure = None;
        for timeline in &mut self.timelines {
            match timeline.step_to(env.frame, env.bus) {
                Ok(TimelineStep::Ended) if timeline.is_looping() => timeline.start(env.frame + 1),
                Ok(_) => {}
                Err(err) => {
                    if timeline.is_looping() && !timeline.is_running() {
                        timeline.start(env.frame + 1);
                    }
                    failure = Some(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Moves instances along their paths and runs path_end for those that
    /// ran off an end.
    pub fn check_paths(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let mut ended = Vec::new();
        let is_paused = self.is_paused;
        for inst in self.instances.values_mut() {
            let Some(mut follower) = inst.take_path() else {
                continue;
            };
            if is_paused && follower.is_pausable() {
                inst.put_path(follower);
                continue;
            }
            let step = follower.step();
            inst.set_position(step.position);
            if step.reached_end {
                ended.push((Reverse(inst.depth()), inst.id()));
            }
            if !step.is_finished {
                inst.put_path(follower);
            }
        }
        ended.sort();

        for (_, id) in ended {
            self.dispatch_one(env, id, Event::PathEnd, &EventPayload::None)?;
            if self.requests.is_control_requested() {
                break;
            }
        }
        self.apply_requests(env)
    }

    fn instance_box(inst: &Instance) -> Aabb {
        inst.aabb().unwrap_or_else(|| {
            let p = inst.position().truncate();
            Aabb::new(p, p)
        })
    }

    pub fn outside_room(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let bounds = self.bounds();
        let targets: Vec<InstanceId> = self
            .targets(Event::OutsideRoom)
            .into_iter()
            .filter(|id| {
                self.instances.get(id).is_some_and(|inst| {
                    let b = Self::instance_box(inst);
                    b.max.x < bounds.min.x
                        || b.min.x > bounds.max.x
                        || b.max.y < bounds.min.y
                        || b.min.y > bounds.max.y
                })
            })
            .collect();
        self.dispatch_all(env, targets, Event::OutsideRoom)
    }

    pub fn intersect_boundary(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let bounds = self.bounds();
        let targets: Vec<InstanceId> = self
            .targets(Event::IntersectBoundary)
            .into_iter()
            .filter(|id| {
                self.instances.get(id).and_then(Instance::aabb).is_some_and(|b| {
                    bounds.intersects(&b) && !bounds.contains(&b)
                })
            })
            .collect();
        self.dispatch_all(env, targets, Event::IntersectBoundary)
    }

    fn dispatch_all(&mut self, env: &mut RoomEnv<'_>, targets: Vec<InstanceId>, event: Event) -> Result<()> {
        for id in targets {
            self.dispatch_one(env, id, event, &EventPayload::None)?;
            if self.requests.is_control_requested() {
                break;
            }
        }
        self.apply_requests(env)
    }

    /// Checks every pair of masked instances for overlap. Each side that
    /// handles collisions first consults its object's collision filter.
    pub fn collision(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        if self.listeners(Event::Collision) == 0 {
            return Ok(());
        }
        let boxes: Vec<(InstanceId, Aabb)> = self
            .instances
            .values()
            .filter_map(|i| i.aabb().map(|b| (i.id(), b)))
            .collect();

        let mut pairs = Vec::new();
        for (i, (a, box_a)) in boxes.iter().enumerate() {
            for (b, box_b) in &boxes[i + 1..] {
                if box_a.intersects(box_b) {
                    pairs.push((*a, *b));
                }
            }
        }

        'pairs: for (a, b) in pairs {
            for (this, other) in [(a, b), (b, a)] {
                if !self.handles_collision_with(this, other)? {
                    continue;
                }
                let object = match self.instances.get(&other) {
                    Some(inst) => inst.object().name().to_string(),
                    None => continue,
                };
                let payload = EventPayload::Collision { other, object };
                self.dispatch_one(env, this, Event::Collision, &payload)?;
                if self.requests.is_control_requested() {
                    break 'pairs;
                }
            }
        }
        self.apply_requests(env)
    }

    fn handles_collision_with(&mut self, this: InstanceId, other: InstanceId) -> Result<bool> {
        let Some(mut inst) = self.instances.remove(&this) else {
            return Ok(false);
        };
        let object = Rc::clone(inst.object());
        let verdict = if !object.implements(Event::Collision) || self.is_skipped(&object, Event::Collision) {
            Ok(false)
        } else {
            match self.instances.get(&other) {
                Some(other) => object.check_collision_filter(&mut inst, other),
                None => Ok(false),
            }
        };
        self.instances.insert(this, inst);
        verdict
    }

    pub fn step_end(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        self.run_event(env, Event::StepEnd, &EventPayload::None)
    }

    /// Runs draw for instances of visible objects only.
    pub fn draw(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let targets: Vec<InstanceId> = self
            .targets(Event::Draw)
            .into_iter()
            .filter(|id| self.instances.get(id).is_some_and(|i| i.object().is_visible()))
            .collect();
        self.dispatch_all(env, targets, Event::Draw)
    }

    /// Advances animations and runs animation_end for those that wrapped.
    pub fn animation_end(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let mut wrapped = Vec::new();
        let is_paused = self.is_paused;
        for inst in self.instances.values_mut() {
            if is_paused && inst.object().is_pausable() {
                continue;
            }
            let depth = inst.depth();
            let id = inst.id();
            if inst.animation_mut().is_some_and(|a| a.advance()) {
                wrapped.push((Reverse(depth), id));
            }
        }
        wrapped.sort();
        let targets = wrapped.into_iter().map(|(_, id)| id).collect();
        self.dispatch_all(env, targets, Event::AnimationEnd)
    }

    /// Runs destroy for every scheduled instance and removes it.
    ///
    /// Every scheduled instance is removed even when a destroy handler
    /// fails; the last failure is returned afterwards.
    pub fn destroy_pending(&mut self, env: &mut RoomEnv<'_>) -> Result<()> {
        let mut failure = None;
        while !self.destroyed.is_empty() {
            for id in std::mem::take(&mut self.destroyed) {
                if let Err(err) = self.dispatch_one(env, id, Event::Destroy, &EventPayload::None) {
                    tracing::error!(target: "room", room = %self.name, instance = %id, "destroy failed: {err:#}");
                    failure = Some(err);
                }
                self.remove(id);
            }
            if let Err(err) = self.apply_requests(env) {
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn network(&mut self, env: &mut RoomEnv<'_>, event: &NetworkEvent) -> Result<()> {
        if self.listeners(Event::Network) == 0 {
            return Ok(());
        }
        self.run_event(env, Event::Network, &EventPayload::Network(event.clone()))
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("instances", &self.instances.len())
            .field("is_ready", &self.is_ready)
            .field("is_paused", &self.is_paused)
            .finish()
    }
}
