use queueviz_layout::Position;

use crate::controller::{Drag, PanZoomController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Plus,
    Minus,
    Zero,
}

/// Host input in screen coordinates relative to the graph container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    PointerDown { x: f64, y: f64, handled: bool },
    PointerMove { x: f64, y: f64, handled: bool },
    PointerUp { x: f64, y: f64, handled: bool },
    Wheel { x: f64, y: f64, delta_y: f64 },
    /// Two-finger gesture; `scale` is the ratio since the previous event.
    Pinch { x: f64, y: f64, scale: f64 },
    Key(Key),
}

impl InputEvent {
    pub fn is_handled(&self) -> bool {
        match self {
            InputEvent::PointerDown { handled, .. }
            | InputEvent::PointerMove { handled, .. }
            | InputEvent::PointerUp { handled, .. } => *handled,
            _ => false,
        }
    }

    fn mark_handled(&mut self) {
        match self {
            InputEvent::PointerDown { handled, .. }
            | InputEvent::PointerMove { handled, .. }
            | InputEvent::PointerUp { handled, .. } => *handled = true,
            _ => {}
        }
    }
}

/// A press and release without drag movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    pub screen: Position,
    pub world: Position,
}

impl PanZoomController {
    /// Translate one input event into pan/zoom changes. Returns a click when
    /// a release completes a press that never turned into a drag.
    pub fn handle_input(&mut self, event: &mut InputEvent) -> Option<Click> {
        match *event {
            InputEvent::PointerDown { x, y, .. } => {
                self.drag = Some(Drag {
                    start: Position::new(x, y),
                    origin: self.state(),
                    moved: false,
                });
                None
            }
            InputEvent::PointerMove { x, y, .. } => {
                let mut drag = self.drag?;
                let dx = x - drag.start.x;
                let dy = y - drag.start.y;
                if !drag.moved && dx.hypot(dy) < self.options.drag_threshold {
                    return None;
                }
                drag.moved = true;
                self.drag = Some(drag);
                self.jump_to(crate::ViewportState {
                    x: drag.origin.x + dx,
                    y: drag.origin.y + dy,
                    scale: self.state().scale,
                });
                event.mark_handled();
                None
            }
            InputEvent::PointerUp { x, y, handled } => {
                let drag = self.drag.take()?;
                if drag.moved {
                    event.mark_handled();
                    return None;
                }
                if handled {
                    return None;
                }
                Some(Click {
                    screen: Position::new(x, y),
                    world: self.screen_to_world(x, y),
                })
            }
            InputEvent::Wheel { x, y, delta_y } => {
                if delta_y != 0.0 {
                    let factor = (-delta_y * self.options.wheel_sensitivity).exp();
                    self.zoom_to_point(x, y, self.state().scale * factor);
                }
                None
            }
            InputEvent::Pinch { x, y, scale } => {
                if scale > 0.0 {
                    self.zoom_to_point(x, y, self.state().scale * scale);
                }
                None
            }
            InputEvent::Key(key) => {
                let step = self.options.key_pan_step;
                match key {
                    Key::ArrowLeft => self.pan_by(step, 0.0),
                    Key::ArrowRight => self.pan_by(-step, 0.0),
                    Key::ArrowUp => self.pan_by(0.0, step),
                    Key::ArrowDown => self.pan_by(0.0, -step),
                    Key::Plus => self.zoom_by(self.options.key_zoom_factor),
                    Key::Minus => self.zoom_by(1.0 / self.options.key_zoom_factor),
                    Key::Zero => self.reset(true),
                }
                None
            }
        }
    }
}
