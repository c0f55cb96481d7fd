use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use glam::DVec3;
use hive::engine::clock::{ManualClock, TickSource};
use hive::engine::core::FrameControl;
use hive::engine::path::{Path, PathEnd, PathFollower};
use hive::engine::scene::{Room, RoomEnv};
use hive::engine::timeline::Timeline;
use hive::messenger::{MessageKind, Messenger};
use hive::object::{
    Animation, Event, EventContext, EventPayload, EventSet, InputEvent, Instance, InstanceRecord,
    Object, ObjectRegistry, ScriptHost, Variant, VariantMap,
};

type Log = Rc<RefCell<Vec<String>>>;

struct World {
    clock: ManualClock,
    bus: Messenger,
    objects: ObjectRegistry,
    log: Log,
}

impl World {
    fn new() -> Self {
        let clock = ManualClock::new();
        Self {
            bus: Messenger::new(Rc::new(clock.clone())),
            clock,
            objects: ObjectRegistry::new(),
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn env(&mut self) -> RoomEnv<'_> {
        RoomEnv {
            bus: &mut self.bus,
            objects: &self.objects,
            tick: self.clock.ticks(),
            frame: 0,
        }
    }

    fn add(&mut self, object: Object) -> Rc<Object> {
        self.objects.add(object).unwrap()
    }

    fn entries(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

fn record(log: &Log, label: &'static str) -> impl Fn(&mut Instance, &mut EventContext<'_>) -> Result<()> {
    let log = Rc::clone(log);
    move |inst, _| {
        log.borrow_mut().push(format!("{label}:{}", inst.id()));
        Ok(())
    }
}

fn full_frame(room: &mut Room, world: &mut World) {
    let mut env = world.env();
    room.step_begin(&mut env).unwrap();
    room.alarms(&mut env).unwrap();
    room.step_mid(&mut env).unwrap();
    room.check_paths(&mut env).unwrap();
    room.outside_room(&mut env).unwrap();
    room.intersect_boundary(&mut env).unwrap();
    room.collision(&mut env).unwrap();
    room.step_end(&mut env).unwrap();
    room.draw(&mut env).unwrap();
    room.animation_end(&mut env).unwrap();
    room.destroy_pending(&mut env).unwrap();
}

#[test]
fn test_only_implemented_events_are_dispatched() {
    let mut world = World::new();
    let obj = world.add(
        Object::builder("sparse")
            .on(Event::Create, record(&world.log, "create"))
            .on(Event::StepEnd, record(&world.log, "step_end"))
            .build(),
    );
    let expected: EventSet = [Event::Create, Event::StepEnd].into_iter().collect();
    assert_eq!(obj.implemented_events(), expected);

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(Rc::clone(&obj), DVec3::new(10.0, 10.0, 0.0));
    room.start(&mut world.env(), Vec::new()).unwrap();
    full_frame(&mut room, &mut world);
    room.end(&mut world.env()).unwrap();

    assert_eq!(world.entries(), vec!["create:0", "step_end:0"]);
    assert_eq!(room.listeners(Event::StepBegin), 0);
}

#[test]
fn test_frame_phases_run_in_order() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let mut builder = Object::builder("all").mask(4.0, 4.0);
    for event in [
        Event::Create,
        Event::RoomStart,
        Event::StepBegin,
        Event::StepMid,
        Event::StepEnd,
        Event::Draw,
        Event::RoomEnd,
    ] {
        let log = Rc::clone(&log);
        builder = builder.on(event, move |_, _| {
            log.borrow_mut().push(event.name().to_string());
            Ok(())
        });
    }
    let obj = world.add(builder.build());

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    full_frame(&mut room, &mut world);
    room.end(&mut world.env()).unwrap();

    assert_eq!(
        world.entries(),
        vec!["create", "room_start", "step_begin", "step_mid", "step_end", "draw", "room_end"]
    );
}

#[test]
fn test_deeper_instances_run_first() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let obj = world.add(
        Object::builder("layer")
            .on(Event::StepBegin, move |inst, _| {
                log.borrow_mut().push(inst.depth().to_string());
                Ok(())
            })
            .build(),
    );

    let mut room = Room::new("r", 100.0, 100.0);
    let shallow = room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    let deep = room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    room.set_instance_depth(shallow, 1);
    room.set_instance_depth(deep, 50);
    room.start(&mut world.env(), Vec::new()).unwrap();
    room.step_begin(&mut world.env()).unwrap();

    assert_eq!(world.entries(), vec!["50", "1"]);
}

#[test]
fn test_collision_filter_vetoes_pairs() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let player = world.add(
        Object::builder("player")
            .mask(10.0, 10.0)
            .on(Event::Collision, move |_, ctx| {
                if let EventPayload::Collision { object, .. } = ctx.payload() {
                    log.borrow_mut().push(object.clone());
                }
                Ok(())
            })
            .collision_filter(|_, other| other.object().name() != "ghost")
            .build(),
    );
    let wall = world.add(Object::builder("wall").mask(10.0, 10.0).build());
    let ghost = world.add(Object::builder("ghost").mask(10.0, 10.0).build());

    let mut room = Room::new("r", 200.0, 200.0);
    room.add_instance(player, DVec3::ZERO);
    room.add_instance(Rc::clone(&wall), DVec3::new(5.0, 5.0, 0.0));
    room.add_instance(ghost, DVec3::new(2.0, 2.0, 0.0));
    room.add_instance(wall, DVec3::new(100.0, 100.0, 0.0));
    room.start(&mut world.env(), Vec::new()).unwrap();
    room.collision(&mut world.env()).unwrap();

    assert_eq!(world.entries(), vec!["wall"]);
}

#[test]
fn test_alarms_fire_once_when_due() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let obj = world.add(
        Object::builder("timer")
            .on(Event::Create, |inst, ctx| {
                inst.set_alarm(2, ctx.tick() + 100);
                Ok(())
            })
            .on(Event::Alarm, move |_, ctx| {
                if let EventPayload::Alarm { index } = ctx.payload() {
                    log.borrow_mut().push(format!("alarm {index}"));
                }
                Ok(())
            })
            .build(),
    );

    let mut room = Room::new("r", 100.0, 100.0);
    let id = room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    assert_eq!(room.instance(id).and_then(|i| i.alarm(2)), Some(100));

    room.alarms(&mut world.env()).unwrap();
    assert!(world.entries().is_empty());

    world.clock.advance(150);
    room.alarms(&mut world.env()).unwrap();
    room.alarms(&mut world.env()).unwrap();
    assert_eq!(world.entries(), vec!["alarm 2"]);
}

#[test]
fn test_paused_rooms_skip_pausable_objects() {
    let mut world = World::new();
    let pausable = world.add(
        Object::builder("pausable")
            .on(Event::StepBegin, record(&world.log, "pausable"))
            .build(),
    );
    let hud = world.add(
        Object::builder("hud")
            .pausable(false)
            .on(Event::StepBegin, record(&world.log, "hud"))
            .build(),
    );

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(pausable, DVec3::ZERO);
    room.add_instance(hud, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();

    room.set_pause(true);
    room.step_begin(&mut world.env()).unwrap();
    assert_eq!(world.entries(), vec!["hud:1"]);

    room.set_pause(false);
    room.step_begin(&mut world.env()).unwrap();
    assert_eq!(world.entries().len(), 3);
}

#[test]
fn test_spawn_and_destroy_requests_apply_between_phases() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    world.add(
        Object::builder("child")
            .on(Event::Create, record(&world.log, "child_create"))
            .on(Event::Destroy, record(&world.log, "child_destroy"))
            .build(),
    );
    let spawner = world.add(
        Object::builder("spawner")
            .on(Event::StepBegin, move |inst, ctx| {
                log.borrow_mut().push("spawn".to_string());
                ctx.spawn("child", inst.position() + DVec3::X);
                ctx.spawn("nobody", DVec3::ZERO);
                Ok(())
            })
            .on(Event::StepEnd, |_, ctx| {
                ctx.destroy(hive::object::InstanceId(1));
                Ok(())
            })
            .build(),
    );

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(spawner, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();

    room.step_begin(&mut world.env()).unwrap();
    assert_eq!(room.instance_count(), 2);
    assert_eq!(room.instances_of("child").len(), 1);
    assert_eq!(world.entries(), vec!["spawn", "child_create:1"]);

    room.step_end(&mut world.env()).unwrap();
    assert_eq!(room.instance_count(), 2);
    room.destroy_pending(&mut world.env()).unwrap();
    assert_eq!(room.instance_count(), 1);
    assert_eq!(world.entries().last().map(String::as_str), Some("child_destroy:1"));
    assert_eq!(world.objects.get_by_name("child").map(|o| o.instance_count()), Some(0));
}

#[test]
fn test_control_requests_cut_the_phase_short() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let obj = world.add(
        Object::builder("quitter")
            .on(Event::StepBegin, move |inst, ctx| {
                log.borrow_mut().push(inst.id().to_string());
                ctx.change_room("next");
                ctx.end_game();
                Ok(())
            })
            .build(),
    );

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    room.step_begin(&mut world.env()).unwrap();

    assert_eq!(world.entries().len(), 1);
    assert_eq!(room.take_control(), Some(FrameControl::ChangeRoom("next".to_string())));
    assert_eq!(room.take_control(), None);
}

#[test]
fn test_handler_errors_propagate() {
    let mut world = World::new();
    let obj = world.add(
        Object::builder("faulty")
            .on(Event::StepMid, |_, _| Err(anyhow!("bad state")))
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();

    let err = room.step_mid(&mut world.env()).unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("bad state"));
    assert!(text.contains("step_mid"));
}

#[test]
fn test_failing_destroy_handlers_still_remove_every_instance() {
    // 1. Two instances whose destroy handler always fails
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let obj = world.add(
        Object::builder("brittle")
            .on(Event::Destroy, move |inst, _| {
                log.borrow_mut().push(format!("destroy:{}", inst.id()));
                Err(anyhow!("cannot let go of {}", inst.id()))
            })
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    let a = room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    let b = room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    assert!(room.destroy(a));
    assert!(room.destroy(b));

    // 2. The last failure is reported, but every handler ran and both are gone
    let err = room.destroy_pending(&mut world.env()).unwrap_err();
    assert!(format!("{err:#}").contains("cannot let go of 1"));
    assert_eq!(world.entries(), vec!["destroy:0", "destroy:1"]);
    assert_eq!(room.instance_count(), 0);
    assert!(room.instance(b).is_none());
    assert_eq!(world.objects.get_by_name("brittle").map(|o| o.instance_count()), Some(0));

    // 3. Nothing is left scheduled
    room.destroy_pending(&mut world.env()).unwrap();
    assert_eq!(world.entries().len(), 2);
}

#[test]
fn test_failing_create_handler_does_not_skip_the_rest() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let obj = world.add(
        Object::builder("fragile")
            .on(Event::Create, move |inst, _| {
                log.borrow_mut().push(format!("create:{}", inst.id()));
                if inst.id().0 == 0 {
                    Err(anyhow!("no space for {}", inst.id()))
                } else {
                    Ok(())
                }
            })
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    room.add_instance(obj, DVec3::ZERO);

    let err = room.start(&mut world.env(), Vec::new()).unwrap_err();
    assert!(format!("{err:#}").contains("no space for 0"));
    assert_eq!(world.entries(), vec!["create:0", "create:1"]);
    assert_eq!(room.instance_count(), 2);
}

#[test]
fn test_boundary_events() {
    let mut world = World::new();
    let obj = world.add(
        Object::builder("drifter")
            .mask(10.0, 10.0)
            .on(Event::OutsideRoom, record(&world.log, "outside"))
            .on(Event::IntersectBoundary, record(&world.log, "edge"))
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(Rc::clone(&obj), DVec3::new(50.0, 50.0, 0.0));
    room.add_instance(Rc::clone(&obj), DVec3::new(95.0, 50.0, 0.0));
    room.add_instance(obj, DVec3::new(300.0, 50.0, 0.0));
    room.start(&mut world.env(), Vec::new()).unwrap();

    room.outside_room(&mut world.env()).unwrap();
    room.intersect_boundary(&mut world.env()).unwrap();
    assert_eq!(world.entries(), vec!["outside:2", "edge:1"]);
}

#[test]
fn test_paths_move_instances_and_report_the_end() {
    let mut world = World::new();
    let obj = world.add(
        Object::builder("walker")
            .on(Event::PathEnd, record(&world.log, "path_end"))
            .build(),
    );
    let path = Rc::new(Path::new("line", vec![DVec3::ZERO, DVec3::new(10.0, 0.0, 0.0)]));

    let mut room = Room::new("r", 100.0, 100.0);
    let id = room.add_instance(obj, DVec3::new(20.0, 20.0, 0.0));
    room.start(&mut world.env(), Vec::new()).unwrap();
    if let Some(inst) = room.instance_mut(id) {
        inst.set_path(PathFollower::new(path, 6.0, PathEnd::Stop));
    }

    room.check_paths(&mut world.env()).unwrap();
    assert_eq!(room.instance(id).map(Instance::position), Some(DVec3::new(26.0, 20.0, 0.0)));
    assert!(world.entries().is_empty());

    room.check_paths(&mut world.env()).unwrap();
    let inst = room.instance(id).unwrap();
    assert_eq!(inst.position(), DVec3::new(30.0, 20.0, 0.0));
    assert!(inst.path().is_none());
    assert_eq!(world.entries(), vec!["path_end:0"]);
}

#[test]
fn test_animation_end_fires_on_wrap() {
    let mut world = World::new();
    let obj = world.add(
        Object::builder("sprite")
            .on(Event::AnimationEnd, record(&world.log, "anim"))
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    let id = room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    if let Some(inst) = room.instance_mut(id) {
        inst.set_animation(Some(Animation::new(2)));
    }

    room.animation_end(&mut world.env()).unwrap();
    assert!(world.entries().is_empty());
    room.animation_end(&mut world.env()).unwrap();
    assert_eq!(world.entries(), vec!["anim:0"]);
}

#[test]
fn test_invisible_objects_are_not_drawn() {
    let mut world = World::new();
    let shown = world.add(Object::builder("shown").on(Event::Draw, record(&world.log, "shown")).build());
    let hidden = world.add(
        Object::builder("hidden")
            .visible(false)
            .on(Event::Draw, record(&world.log, "hidden"))
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(shown, DVec3::ZERO);
    room.add_instance(hidden, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();
    room.draw(&mut world.env()).unwrap();
    assert_eq!(world.entries(), vec!["shown:0"]);
}

#[test]
fn test_keyboard_input_reaches_listeners() {
    let mut world = World::new();
    let log = Rc::clone(&world.log);
    let handler = move |label: &'static str| {
        let log = Rc::clone(&log);
        move |_: &mut Instance, ctx: &mut EventContext<'_>| -> Result<()> {
            if let EventPayload::Input(InputEvent::KeyDown { key, .. }) = ctx.payload() {
                log.borrow_mut().push(format!("{label} {key}"));
            }
            Ok(())
        }
    };
    let obj = world.add(
        Object::builder("typist")
            .on(Event::KeyboardPress, handler("press"))
            .on(Event::KeyboardInput, handler("input"))
            .build(),
    );
    let mut room = Room::new("r", 100.0, 100.0);
    room.add_instance(obj, DVec3::ZERO);
    room.start(&mut world.env(), Vec::new()).unwrap();

    let key = InputEvent::KeyDown { key: "space".to_string(), repeat: false };
    room.input(&mut world.env(), &key).unwrap();
    let held = InputEvent::KeyDown { key: "space".to_string(), repeat: true };
    room.input(&mut world.env(), &held).unwrap();

    assert_eq!(world.entries(), vec!["press space", "input space", "input space"]);
}

#[test]
fn test_timelines_step_with_the_room() {
    let mut world = World::new();
    let fired = Rc::new(RefCell::new(Vec::new()));
    let mut timeline = Timeline::new("intro");
    for offset in [0, 2] {
        let fired = Rc::clone(&fired);
        timeline
            .add_action(offset, move |bus| {
                fired.borrow_mut().push(offset);
                bus.send(["game"], MessageKind::Info, format!("offset {offset}"));
                Ok(())
            })
            .unwrap();
    }
    timeline.set_is_looping(true);
    timeline.start(0);
    assert!(timeline.add_action(5, |_| Ok(())).is_err());

    let mut room = Room::new("r", 100.0, 100.0);
    room.add_timeline(timeline);
    room.start(&mut world.env(), Vec::new()).unwrap();

    for frame in 0..6 {
        let mut env = world.env();
        env.frame = frame;
        room.step_mid(&mut env).unwrap();
    }
    // frames 0 and 2, then the loop restarts at frame 3: 3 and 5
    assert_eq!(*fired.borrow(), vec![0, 2, 0, 2]);
    assert_eq!(world.bus.pending(), 4);
}

#[test]
fn test_persistent_instances_move_to_the_next_room() {
    let mut world = World::new();
    let hero = world.add(
        Object::builder("hero")
            .persistent(true)
            .on(Event::RoomStart, record(&world.log, "room_start"))
            .build(),
    );
    let prop = world.add(Object::builder("prop").build());

    let mut first = Room::new("first", 100.0, 100.0);
    let id = first.add_instance(hero, DVec3::new(7.0, 8.0, 0.0));
    first.add_instance(prop, DVec3::ZERO);
    first.start(&mut world.env(), Vec::new()).unwrap();
    if let Some(inst) = first.instance_mut(id) {
        inst.set("hp", 3);
    }

    let kept = first.end(&mut world.env()).unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(first.instance_count(), 0);

    let mut second = Room::new("second", 100.0, 100.0);
    second.start(&mut world.env(), kept).unwrap();
    let inst = second.instance(id).unwrap();
    assert_eq!(inst.position(), DVec3::new(7.0, 8.0, 0.0));
    assert_eq!(inst.get("hp"), Some(&Variant::Int(3)));
    assert_eq!(world.entries(), vec!["room_start:0", "room_start:0"]);

    let fresh = second.add_instance(world.objects.get_by_name("prop").cloned().unwrap(), DVec3::ZERO);
    assert_ne!(fresh, id);
}

#[test]
fn test_instance_maps_round_trip_through_ron() {
    let mut world = World::new();
    world.add(Object::builder("tree").build());
    world.add(Object::builder("rock").build());

    let mut room = Room::new("forest", 640.0, 480.0);
    let count = room
        .load_instance_map(
            r#"[
                (object: "tree", x: 10.0, y: 20.0),
                (object: "rock", x: 30.5, y: 40.0, z: 1.0, data: {"size": Int(3)}),
                (object: "cloud", x: 0.0, y: 0.0),
            ]"#,
        )
        .unwrap();
    assert_eq!(count, 3);
    room.start(&mut world.env(), Vec::new()).unwrap();
    assert_eq!(room.instance_count(), 2);

    let saved = room.save_instance_map().unwrap();
    let records: Vec<InstanceRecord> = ron::from_str(&saved).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].object, "rock");
    assert_eq!(records[1].z, 1.0);
    assert_eq!(records[1].data.get("size"), Some(&Variant::Int(3)));

    let tree = room.instance(hive::object::InstanceId(0)).unwrap();
    let one: InstanceRecord = ron::from_str(&tree.serialize().unwrap()).unwrap();
    assert_eq!((one.object.as_str(), one.x, one.y), ("tree", 10.0, 20.0));
}

struct FakeScript {
    functions: Vec<&'static str>,
    calls: RefCell<Vec<(String, VariantMap)>>,
}

impl ScriptHost for FakeScript {
    fn name(&self) -> &str {
        "fake.py"
    }

    fn has_function(&self, function: &str) -> bool {
        self.functions.iter().any(|f| *f == function)
    }

    fn call(&self, function: &str, instance: &mut Instance, args: &VariantMap) -> Result<Variant> {
        self.calls.borrow_mut().push((function.to_string(), args.clone()));
        if function == "create" {
            instance.set("scripted", true);
        }
        if function == "check_collision_filter" {
            return Ok(Variant::Bool(false));
        }
        Ok(Variant::Nil)
    }
}

#[test]
fn test_scripted_objects_implement_their_functions() {
    let mut world = World::new();
    let host = Rc::new(FakeScript {
        functions: vec!["create", "mouse_press", "collision", "check_collision_filter", "not_an_event"],
        calls: RefCell::new(Vec::new()),
    });
    let obj = world.add(Object::scripted("scripted", Rc::clone(&host) as Rc<dyn ScriptHost>).mask(5.0, 5.0).build());
    let expected: EventSet = [
        Event::Create,
        Event::MousePress,
        Event::Collision,
        Event::CheckCollisionFilter,
    ]
    .into_iter()
    .collect();
    assert_eq!(obj.implemented_events(), expected);

    let mut room = Room::new("r", 100.0, 100.0);
    let id = room.add_instance(Rc::clone(&obj), DVec3::ZERO);
    room.add_instance(obj, DVec3::new(1.0, 1.0, 0.0));
    room.start(&mut world.env(), Vec::new()).unwrap();
    assert_eq!(room.instance(id).and_then(|i| i.get("scripted")), Some(&Variant::Bool(true)));

    let click = InputEvent::MouseDown { button: 1, x: 3, y: 4 };
    room.input(&mut world.env(), &click).unwrap();
    room.collision(&mut world.env()).unwrap();

    let calls = host.calls.borrow();
    let names: Vec<&str> = calls.iter().map(|(f, _)| f.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "create",
            "create",
            "mouse_press",
            "mouse_press",
            "check_collision_filter",
            "check_collision_filter"
        ]
    );
    let click_args = &calls[2].1;
    assert_eq!(click_args.get("x"), Some(&Variant::Int(3)));
    assert_eq!(click_args.get("type"), Some(&Variant::Str("mouse_down".to_string())));
}
