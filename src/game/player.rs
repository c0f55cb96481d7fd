use anyhow::Result;
use glam::DVec3;
use hive::messenger::MessageKind;
use hive::object::{Event, EventContext, EventPayload, Instance, Object};

const SPEED: f64 = 4.0;
const REPORT_MS: u64 = 1000;

pub fn object() -> Object {
    Object::builder("player")
        .depth(10)
        .mask(16.0, 16.0)
        .persistent(true)
        .on(Event::Create, create)
        .on(Event::StepBegin, |inst, _| {
            inst.move_by(DVec3::new(SPEED, 0.0, 0.0));
            Ok(())
        })
        .on(Event::Alarm, report)
        .on(Event::Collision, collide)
        .on(Event::OutsideRoom, |inst, ctx| {
            ctx.bus().send(
                ["game"],
                MessageKind::Info,
                format!("Player left the room with {} points", score(inst)),
            );
            ctx.end_game();
            Ok(())
        })
        .collision_filter(|_, other| other.object().name() == "coin")
        .build()
}

fn score(inst: &Instance) -> i64 {
    inst.get("score").and_then(|v| v.as_int()).unwrap_or(0)
}

fn create(inst: &mut Instance, ctx: &mut EventContext<'_>) -> Result<()> {
    inst.set("score", 0);
    inst.set_alarm(0, ctx.tick() + REPORT_MS);
    Ok(())
}

fn report(inst: &mut Instance, ctx: &mut EventContext<'_>) -> Result<()> {
    let x = inst.position().x;
    ctx.bus().log(format!("player at x={x:.0}, score {}", score(inst)));
    inst.set_alarm(0, ctx.tick() + REPORT_MS);
    Ok(())
}

fn collide(inst: &mut Instance, ctx: &mut EventContext<'_>) -> Result<()> {
    if let EventPayload::Collision { other, .. } = ctx.payload() {
        let other = *other;
        ctx.destroy(other);
        inst.set("score", score(inst) + 1);
    }
    Ok(())
}
