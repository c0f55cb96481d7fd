use super::instance::InstanceId;
use super::variant::{Variant, VariantMap};
use super::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Added,
    Removed,
    Remapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowEvent {
    Shown,
    Hidden,
    Moved { x: i32, y: i32 },
    Resized { width: u32, height: u32 },
    Minimized,
    Restored,
    FocusGained,
    FocusLost,
    Close,
}

/// Platform input translated into engine terms by the windowing layer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    KeyDown { key: String, repeat: bool },
    KeyUp { key: String },
    MouseMotion { x: i32, y: i32 },
    MouseWheel { dx: i32, dy: i32 },
    MouseDown { button: u8, x: i32, y: i32 },
    MouseUp { button: u8, x: i32, y: i32 },
    ControllerAxis { controller: u32, axis: u8, value: i16 },
    ControllerDown { controller: u32, button: u8 },
    ControllerUp { controller: u32, button: u8 },
    ControllerDevice { controller: u32, change: DeviceChange },
    Window(WindowEvent),
    Quit,
}

impl InputEvent {
    /// Object events raised by this input, in dispatch order.
    pub fn events(&self) -> &'static [Event] {
        match self {
            InputEvent::KeyDown { repeat: false, .. } => &[Event::KeyboardPress, Event::KeyboardInput],
            InputEvent::KeyDown { repeat: true, .. } => &[Event::KeyboardInput],
            InputEvent::KeyUp { .. } => &[Event::KeyboardRelease],
            InputEvent::MouseMotion { .. } | InputEvent::MouseWheel { .. } => &[Event::MouseInput],
            InputEvent::MouseDown { .. } => &[Event::MousePress],
            InputEvent::MouseUp { .. } => &[Event::MouseRelease],
            InputEvent::ControllerAxis { .. } => &[Event::ControllerAxis],
            InputEvent::ControllerDown { .. } => &[Event::ControllerPress],
            InputEvent::ControllerUp { .. } => &[Event::ControllerRelease],
            InputEvent::ControllerDevice { .. } => &[Event::ControllerModify],
            InputEvent::Window(_) => &[Event::Window],
            InputEvent::Quit => &[],
        }
    }

    fn to_map(&self) -> VariantMap {
        let mut map = VariantMap::new();
        let kind = match self {
            InputEvent::KeyDown { key, repeat } => {
                map.insert("key".into(), key.as_str().into());
                map.insert("repeat".into(), (*repeat).into());
                "key_down"
            }
            InputEvent::KeyUp { key } => {
                map.insert("key".into(), key.as_str().into());
                "key_up"
            }
            InputEvent::MouseMotion { x, y } => {
                map.insert("x".into(), (*x).into());
                map.insert("y".into(), (*y).into());
                "mouse_motion"
            }
            InputEvent::MouseWheel { dx, dy } => {
                map.insert("dx".into(), (*dx).into());
                map.insert("dy".into(), (*dy).into());
                "mouse_wheel"
            }
            InputEvent::MouseDown { button, x, y } | InputEvent::MouseUp { button, x, y } => {
                map.insert("button".into(), u32::from(*button).into());
                map.insert("x".into(), (*x).into());
                map.insert("y".into(), (*y).into());
                if matches!(self, InputEvent::MouseDown { .. }) {
                    "mouse_down"
                } else {
                    "mouse_up"
                }
            }
            InputEvent::ControllerAxis { controller, axis, value } => {
                map.insert("controller".into(), (*controller).into());
                map.insert("axis".into(), u32::from(*axis).into());
                map.insert("value".into(), i64::from(*value).into());
                "controller_axis"
            }
            InputEvent::ControllerDown { controller, button }
            | InputEvent::ControllerUp { controller, button } => {
                map.insert("controller".into(), (*controller).into());
                map.insert("button".into(), u32::from(*button).into());
                if matches!(self, InputEvent::ControllerDown { .. }) {
                    "controller_down"
                } else {
                    "controller_up"
                }
            }
            InputEvent::ControllerDevice { controller, change } => {
                map.insert("controller".into(), (*controller).into());
                let change = match change {
                    DeviceChange::Added => "added",
                    DeviceChange::Removed => "removed",
                    DeviceChange::Remapped => "remapped",
                };
                map.insert("change".into(), change.into());
                "controller_device"
            }
            InputEvent::Window(window) => {
                let name = match window {
                    WindowEvent::Shown => "shown",
                    WindowEvent::Hidden => "hidden",
                    WindowEvent::Moved { x, y } => {
                        map.insert("x".into(), (*x).into());
                        map.insert("y".into(), (*y).into());
                        "moved"
                    }
                    WindowEvent::Resized { width, height } => {
                        map.insert("width".into(), (*width).into());
                        map.insert("height".into(), (*height).into());
                        "resized"
                    }
                    WindowEvent::Minimized => "minimized",
                    WindowEvent::Restored => "restored",
                    WindowEvent::FocusGained => "focus_gained",
                    WindowEvent::FocusLost => "focus_lost",
                    WindowEvent::Close => "close",
                };
                map.insert("window".into(), name.into());
                "window"
            }
            InputEvent::Quit => "quit",
        };
        map.insert("type".into(), kind.into());
        map
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEvent {
    pub kind: String,
    pub peer: u32,
    pub data: VariantMap,
}

/// Data accompanying a dispatched event.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventPayload {
    #[default]
    None,
    Alarm { index: usize },
    Input(InputEvent),
    Command(String),
    Collision { other: InstanceId, object: String },
    Network(NetworkEvent),
}

impl EventPayload {
    /// Generic key/value form handed across the script boundary.
    pub fn to_map(&self) -> VariantMap {
        match self {
            EventPayload::None => VariantMap::new(),
            EventPayload::Alarm { index } => {
                VariantMap::from([("alarm".to_string(), Variant::Int(*index as i64))])
            }
            EventPayload::Input(input) => input.to_map(),
            EventPayload::Command(line) => {
                VariantMap::from([("input".to_string(), Variant::Str(line.clone()))])
            }
            EventPayload::Collision { other, object } => VariantMap::from([
                ("other".to_string(), Variant::Int(i64::from(other.0))),
                ("object".to_string(), Variant::Str(object.clone())),
            ]),
            EventPayload::Network(net) => VariantMap::from([
                ("type".to_string(), Variant::Str(net.kind.clone())),
                ("peer".to_string(), Variant::Int(i64::from(net.peer))),
                ("data".to_string(), Variant::Map(net.data.clone())),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_only_count_as_input() {
        let first = InputEvent::KeyDown { key: "a".into(), repeat: false };
        let held = InputEvent::KeyDown { key: "a".into(), repeat: true };
        assert_eq!(first.events(), &[Event::KeyboardPress, Event::KeyboardInput]);
        assert_eq!(held.events(), &[Event::KeyboardInput]);
    }

    #[test]
    fn mouse_payload_carries_coordinates() {
        let payload = EventPayload::Input(InputEvent::MouseDown { button: 1, x: 10, y: -4 });
        let map = payload.to_map();
        assert_eq!(map.get("type").and_then(Variant::as_str), Some("mouse_down"));
        assert_eq!(map.get("x").and_then(Variant::as_int), Some(10));
        assert_eq!(map.get("y").and_then(Variant::as_int), Some(-4));
    }
}
