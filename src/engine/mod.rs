pub mod clock;
pub mod console;
pub mod core;
pub mod loader;
pub mod path;
pub mod resources;
pub mod scene;
pub mod timeline;

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use crate::messenger::{MessageKind, Messenger};
use crate::object::{InputEvent, NetworkEvent, Object, ObjectRegistry};
use clock::{SystemClock, TickSource};
use console::Console;
use core::{EngineConfig, FrameControl, FrameTiming};
use loader::Loader;
use resources::ResourceManager;
use scene::{Room, RoomEnv};

/// Owns every engine service and runs the frame loop.
pub struct Engine {
    config: EngineConfig,
    clock: Rc<dyn TickSource>,
    bus: Messenger,
    loader: Loader,
    resources: ResourceManager,
    objects: ObjectRegistry,
    console: Console,
    rooms: BTreeMap<String, Room>,
    first_room: Option<String>,
    current: Option<String>,
    pending_control: Option<FrameControl>,
    input: VecDeque<InputEvent>,
    commandline: VecDeque<String>,
    network: VecDeque<NetworkEvent>,
    timing: FrameTiming,
    quit: Rc<Cell<bool>>,
    is_game_started: bool,
    delivery_error: Option<anyhow::Error>,
}

/// Runs one room phase and returns from the frame if a handler asked for a
/// control change.
macro_rules! phase {
    ($room:expr, $call:expr) => {{
        $call?;
        if let Some(control) = $room.take_control() {
            return Ok(control);
        }
    }};
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, Rc::new(SystemClock::new()))
    }

    pub fn with_clock(config: EngineConfig, clock: Rc<dyn TickSource>) -> Result<Self> {
        let mut bus = Messenger::new(Rc::clone(&clock));
        bus.output_mut().set_level(config.output_level);
        bus.output_mut().set_headless(config.is_headless);
        for tag in &config.protected_tags {
            bus.protect_tag(tag.clone());
        }
        for log in &config.log_files {
            bus.output_mut().add_log(&log.path, log.level)?;
        }

        let console = Console::new(&mut bus);
        let quit = Rc::new(Cell::new(false));
        let quit_flag = Rc::clone(&quit);
        console.add_command(&mut bus, "quit", "End the game after this frame", move |_, _| {
            quit_flag.set(true);
            Ok(())
        })?;

        Ok(Self {
            config,
            clock,
            bus,
            loader: Loader::new(),
            resources: ResourceManager::default(),
            objects: ObjectRegistry::new(),
            console,
            rooms: BTreeMap::new(),
            first_room: None,
            current: None,
            pending_control: None,
            input: VecDeque::new(),
            commandline: VecDeque::new(),
            network: VecDeque::new(),
            timing: FrameTiming::default(),
            quit,
            is_game_started: false,
            delivery_error: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> Rc<dyn TickSource> {
        Rc::clone(&self.clock)
    }

    pub fn bus(&self) -> &Messenger {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Messenger {
        &mut self.bus
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceManager {
        &mut self.resources
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn add_object(&mut self, object: Object) -> Result<Rc<Object>> {
        self.objects.add(object)
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn timing(&self) -> FrameTiming {
        self.timing
    }

    /// Adds a room. The first room added is the one the game starts in.
    pub fn add_room(&mut self, room: Room) {
        if self.first_room.is_none() {
            self.first_room = Some(room.name().to_string());
        }
        self.rooms.insert(room.name().to_string(), room);
    }

    pub fn set_first_room(&mut self, name: impl Into<String>) {
        self.first_room = Some(name.into());
    }

    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    pub fn current_room(&self) -> Option<&Room> {
        self.current.as_ref().and_then(|name| self.rooms.get(name))
    }

    pub fn current_room_mut(&mut self) -> Option<&mut Room> {
        match &self.current {
            Some(name) => self.rooms.get_mut(name),
            None => None,
        }
    }

    pub fn push_input(&mut self, input: InputEvent) {
        self.input.push_back(input);
    }

    pub fn push_commandline(&mut self, line: impl Into<String>) {
        self.commandline.push_back(line.into());
    }

    pub fn push_network(&mut self, event: NetworkEvent) {
        self.network.push_back(event);
    }

    pub fn request_quit(&self) {
        self.quit.set(true);
    }

    /// Ends the current room, loads the resources of the next one and
    /// starts it with the persistent instances of the old one.
    pub fn change_room(&mut self, name: &str) -> Result<()> {
        if !self.rooms.contains_key(name) {
            bail!("no room named \"{name}\"");
        }
        let tick = self.clock.ticks();
        let mut env = RoomEnv {
            bus: &mut self.bus,
            objects: &self.objects,
            tick,
            frame: self.timing.frame,
        };

        let mut persistent = Vec::new();
        if let Some(old) = self.current.take() {
            if let Some(room) = self.rooms.get_mut(&old) {
                persistent = room.end(&mut env)?;
            }
        }

        let room = self
            .rooms
            .get_mut(name)
            .ok_or_else(|| anyhow!("no room named \"{name}\""))?;

        self.loader.clear();
        for resource in room.resources() {
            self.loader.queue(Rc::clone(resource));
        }
        let failed = match self.config.lazy_amount {
            Some(amount) => self.loader.load_lazy(env.bus, amount),
            None => self.loader.load(),
        };
        if failed > 0 {
            env.bus.send(
                ["engine", "loader"],
                MessageKind::Warning,
                format!("{failed} resources of room \"{name}\" failed to load"),
            );
        }

        tracing::info!(target: "engine", room = name, "changing room");
        env.bus.send(["engine", "room"], MessageKind::Start, format!("Room \"{name}\" starting"));
        self.current = Some(name.to_string());

        room.start(&mut env, persistent)?;
        if !self.is_game_started && !room.is_control_requested() {
            self.is_game_started = true;
            room.game_start(&mut env)?;
        }
        self.pending_control = room.take_control();
        Ok(())
    }

    /// Runs one frame of the current room.
    pub fn run_frame(&mut self) -> Result<FrameControl> {
        let start = self.clock.ticks();
        self.timing.advance(start);

        if let Some(control) = self.pending_control.take() {
            return Ok(control);
        }
        if self.quit.get() {
            return Ok(FrameControl::EndGame);
        }

        let name = self
            .current
            .clone()
            .ok_or_else(|| anyhow!("no room is running"))?;
        let room = self
            .rooms
            .get_mut(&name)
            .ok_or_else(|| anyhow!("no room named \"{name}\""))?;
        let mut env = RoomEnv {
            bus: &mut self.bus,
            objects: &self.objects,
            tick: start,
            frame: self.timing.frame,
        };

        phase!(room, room.step_begin(&mut env));
        phase!(room, room.alarms(&mut env));

        while let Some(input) = self.input.pop_front() {
            if input == InputEvent::Quit {
                self.quit.set(true);
            }
            phase!(room, room.input(&mut env, &input));
        }
        while let Some(line) = self.commandline.pop_front() {
            env.bus.send(["engine", "commandline"], MessageKind::General, line.clone());
            phase!(room, room.commandline_input(&mut env, &line));
        }

        phase!(room, room.step_mid(&mut env));
        phase!(room, room.check_paths(&mut env));
        phase!(room, room.outside_room(&mut env));
        phase!(room, room.intersect_boundary(&mut env));
        phase!(room, room.collision(&mut env));
        phase!(room, room.step_end(&mut env));
        phase!(room, room.draw(&mut env));
        phase!(room, room.animation_end(&mut env));
        phase!(room, room.destroy_pending(&mut env));

        while let Some(event) = self.network.pop_front() {
            phase!(room, room.network(&mut env, &event));
        }

        self.deliver_messages();

        self.pace(start);
        Ok(FrameControl::Continue)
    }

    /// Runs `handle_messages`, keeping its last recipient failure for
    /// [`Engine::take_delivery_error`].
    fn deliver_messages(&mut self) {
        if let Err(err) = self.bus.handle_messages() {
            tracing::warn!(target: "engine", frame = self.timing.frame, "message delivery failed: {err:#}");
            self.delivery_error = Some(err);
        }
    }

    /// The last recipient failure seen while delivering messages, if any
    /// since the previous call.
    pub fn take_delivery_error(&mut self) -> Option<anyhow::Error> {
        self.delivery_error.take()
    }

    /// Waits out the rest of the frame, or warns when the frame ran more
    /// than three frames long.
    fn pace(&mut self, start: u64) {
        let budget = self.config.frame_budget_ms();
        let elapsed = self.clock.ticks().saturating_sub(start);
        if elapsed < budget {
            self.clock.delay(budget - elapsed);
        } else if elapsed > budget * 3 {
            self.bus.send(
                ["engine"],
                MessageKind::Warning,
                format!(
                    "Frame {} took {elapsed}ms, {} frames over budget",
                    self.timing.frame,
                    elapsed / budget.max(1)
                ),
            );
        }
    }

    fn restart_game(&mut self) -> Result<()> {
        let first = self
            .first_room
            .clone()
            .ok_or_else(|| anyhow!("no room to start the game in"))?;
        self.end_current_room(true)?;
        self.is_game_started = false;
        self.change_room(&first)
    }

    /// Runs game_end (if asked) and room_end, dropping persistent instances.
    fn end_current_room(&mut self, is_game_over: bool) -> Result<()> {
        let Some(name) = self.current.take() else {
            return Ok(());
        };
        let Some(room) = self.rooms.get_mut(&name) else {
            return Ok(());
        };
        let mut env = RoomEnv {
            bus: &mut self.bus,
            objects: &self.objects,
            tick: self.clock.ticks(),
            frame: self.timing.frame,
        };
        let game_end = if is_game_over {
            room.game_end(&mut env)
        } else {
            Ok(())
        };
        let ended = room.end(&mut env);
        game_end?;
        ended.map(|_| ())
    }

    /// Starts the first room and loops until the game ends, the frame limit
    /// is reached or quit is requested.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!(target: "engine", app = %self.config.app_name, "Engine starting");

        let result = self.main_loop();
        let shutdown = self.shutdown();

        tracing::info!(target: "engine", frames = self.timing.frame, "Engine shutdown complete");
        result.and(shutdown)
    }

    fn main_loop(&mut self) -> Result<()> {
        if self.current.is_none() {
            let first = self
                .first_room
                .clone()
                .ok_or_else(|| anyhow!("no room to start the game in"))?;
            self.change_room(&first)?;
        }

        loop {
            if self
                .config
                .max_frames
                .is_some_and(|max| self.timing.frame >= max)
            {
                return Ok(());
            }
            match self.run_frame()? {
                FrameControl::Continue => {}
                FrameControl::RestartRoom => {
                    let name = self
                        .current
                        .clone()
                        .ok_or_else(|| anyhow!("no room is running"))?;
                    self.change_room(&name)?;
                }
                FrameControl::RestartGame => self.restart_game()?,
                FrameControl::ChangeRoom(name) => self.change_room(&name)?,
                FrameControl::EndGame => return Ok(()),
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let ended = self.end_current_room(true);
        self.loader.detach(&mut self.bus);
        self.deliver_messages();
        self.resources.free_all();
        self.bus.clear();
        ended
    }
}
