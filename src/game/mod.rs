mod player;

use anyhow::Result;
use glam::DVec3;
use hive::engine::scene::Room;
use hive::engine::Engine;
use hive::messenger::MessageKind;
use hive::object::{Event, InstanceRecord, Object};

const ROOM_WIDTH: f64 = 320.0;
const ROOM_HEIGHT: f64 = 240.0;

fn coin() -> Object {
    Object::builder("coin")
        .mask(8.0, 8.0)
        .on(Event::Destroy, |inst, ctx| {
            let x = inst.position().x;
            ctx.bus().send(["game"], MessageKind::Info, format!("Coin at x={x:.0} collected"));
            Ok(())
        })
        .build()
}

/// Registers the demo objects and its single room.
pub fn setup(engine: &mut Engine) -> Result<()> {
    engine.add_object(player::object())?;
    engine.add_object(coin())?;

    engine.bus_mut().register("game_log", ["game"], false, |_, msg| {
        tracing::info!(target: "game", "{}", msg.descr());
        Ok(())
    })?;

    let mut layout = vec![InstanceRecord {
        object: "player".to_string(),
        x: 0.0,
        y: ROOM_HEIGHT / 2.0,
        z: 0.0,
        data: Default::default(),
    }];
    layout.extend((1..8).map(|i| {
        let at = DVec3::new(f64::from(i) * 40.0, ROOM_HEIGHT / 2.0 + 4.0, 0.0);
        InstanceRecord {
            object: "coin".to_string(),
            x: at.x,
            y: at.y,
            z: at.z,
            data: Default::default(),
        }
    }));

    let mut room = Room::new("field", ROOM_WIDTH, ROOM_HEIGHT);
    room.set_layout(layout);
    engine.add_room(room);
    Ok(())
}
