//! Pan and zoom state with animated transitions.
//!
//! The transform maps world to screen as `screen = world * scale + (x, y)`.

use std::panic::{AssertUnwindSafe, catch_unwind};

use queueviz_layout::{Position, Rect, Viewport, ease_in_out_cubic};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

impl ViewportState {
    fn lerp(&self, to: &ViewportState, t: f64) -> ViewportState {
        ViewportState {
            x: self.x + (to.x - self.x) * t,
            y: self.y + (to.y - self.y) * t,
            scale: self.scale + (to.scale - self.scale) * t,
        }
    }
}

/// Fields left `None` keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialState {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportEventKind {
    Pan,
    Zoom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportEvent {
    pub kind: ViewportEventKind,
    pub state: ViewportState,
    /// Visible world region after the change.
    pub bounds: Viewport,
    pub delta_x: f64,
    pub delta_y: f64,
    /// Ratio of new to old scale.
    pub delta_scale: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// The host's display refresh signal. A requested frame is delivered back
/// through [`PanZoomController::on_frame`].
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerOptions {
    pub min_scale: f64,
    pub max_scale: f64,
    pub wheel_sensitivity: f64,
    pub animation_ms: f64,
    pub key_pan_step: f64,
    pub key_zoom_factor: f64,
    /// Pointer travel in pixels before a press becomes a drag.
    pub drag_threshold: f64,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            min_scale: 0.1,
            max_scale: 4.0,
            wheel_sensitivity: 0.002,
            animation_ms: 300.0,
            key_pan_step: 50.0,
            key_zoom_factor: 1.2,
            drag_threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: ViewportState,
    to: ViewportState,
    started_ms: Option<f64>,
    handle: FrameHandle,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Drag {
    pub(crate) start: Position,
    pub(crate) origin: ViewportState,
    pub(crate) moved: bool,
}

type Listener = Box<dyn FnMut(&ViewportEvent)>;

pub struct PanZoomController {
    pub options: ControllerOptions,
    state: ViewportState,
    screen_width: f64,
    screen_height: f64,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    scheduler: Option<Box<dyn FrameScheduler>>,
    transition: Option<Transition>,
    pub(crate) drag: Option<Drag>,
}

impl PanZoomController {
    pub fn new(options: ControllerOptions, screen_width: f64, screen_height: f64) -> Self {
        Self {
            options,
            state: ViewportState::default(),
            screen_width,
            screen_height,
            listeners: Vec::new(),
            next_listener: 0,
            scheduler: None,
            transition: None,
            drag: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Box<dyn FrameScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn screen_size(&self) -> (f64, f64) {
        (self.screen_width, self.screen_height)
    }

    pub fn set_screen_size(&mut self, width: f64, height: f64) {
        self.screen_width = width;
        self.screen_height = height;
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some_and(|d| d.moved)
    }

    pub fn add_event_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ViewportEvent) + 'static,
    {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_event_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    pub fn screen_to_world(&self, sx: f64, sy: f64) -> Position {
        Position::new(
            (sx - self.state.x) / self.state.scale,
            (sy - self.state.y) / self.state.scale,
        )
    }

    pub fn world_to_screen(&self, wx: f64, wy: f64) -> Position {
        Position::new(
            wx * self.state.scale + self.state.x,
            wy * self.state.scale + self.state.y,
        )
    }

    /// The world region currently on screen.
    pub fn world_viewport(&self) -> Viewport {
        let origin = self.screen_to_world(0.0, 0.0);
        Viewport::new(
            origin.x,
            origin.y,
            self.screen_width / self.state.scale,
            self.screen_height / self.state.scale,
        )
    }

    fn clamp_scale(&self, scale: f64) -> f64 {
        if scale.is_finite() {
            scale.clamp(self.options.min_scale, self.options.max_scale)
        } else {
            self.state.scale
        }
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let target = ViewportState {
            x: self.state.x + dx,
            y: self.state.y + dy,
            ..self.state
        };
        self.jump_to(target);
    }

    /// Zoom around the screen centre.
    pub fn zoom_by(&mut self, factor: f64) {
        let target = self.state.scale * factor;
        self.zoom_to_point(self.screen_width / 2.0, self.screen_height / 2.0, target);
    }

    /// Zoom so the world point under `(sx, sy)` stays under it.
    pub fn zoom_to_point(&mut self, sx: f64, sy: f64, target_scale: f64) {
        let scale = self.clamp_scale(target_scale);
        let world = self.screen_to_world(sx, sy);
        let target = ViewportState {
            x: sx - world.x * scale,
            y: sy - world.y * scale,
            scale,
        };
        self.jump_to(target);
    }

    /// Fit `bounds` into the screen leaving `padding` pixels on each side.
    pub fn zoom_to_fit(&mut self, bounds: &Rect, padding: f64, animate: bool) {
        if bounds.width <= 0.0 || bounds.height <= 0.0 || self.screen_width <= 0.0 {
            return;
        }
        let available_width = (self.screen_width - padding * 2.0).max(1.0);
        let available_height = (self.screen_height - padding * 2.0).max(1.0);
        let scale = self.clamp_scale(
            (available_width / bounds.width).min(available_height / bounds.height),
        );
        let center = bounds.center();
        self.set_state(
            PartialState {
                x: Some(self.screen_width / 2.0 - center.x * scale),
                y: Some(self.screen_height / 2.0 - center.y * scale),
                scale: Some(scale),
            },
            animate,
        );
    }

    pub fn reset(&mut self, animate: bool) {
        let home = ViewportState::default();
        self.set_state(
            PartialState {
                x: Some(home.x),
                y: Some(home.y),
                scale: Some(home.scale),
            },
            animate,
        );
    }

    /// Move to a new state, animating when asked and a scheduler is
    /// attached. Any transition in flight is cancelled first.
    pub fn set_state(&mut self, partial: PartialState, animate: bool) {
        let target = ViewportState {
            x: partial.x.unwrap_or(self.state.x),
            y: partial.y.unwrap_or(self.state.y),
            scale: self.clamp_scale(partial.scale.unwrap_or(self.state.scale)),
        };
        self.cancel_transition();

        let Some(scheduler) = self.scheduler.as_mut().filter(|_| animate) else {
            self.apply(target);
            return;
        };
        let handle = scheduler.request_frame();
        self.transition = Some(Transition {
            from: self.state,
            to: target,
            started_ms: None,
            handle,
        });
    }

    pub(crate) fn jump_to(&mut self, target: ViewportState) {
        self.cancel_transition();
        self.apply(target);
    }

    fn cancel_transition(&mut self) {
        if let Some(transition) = self.transition.take() {
            if let Some(scheduler) = self.scheduler.as_mut() {
                scheduler.cancel_frame(transition.handle);
            }
            debug!(handle = transition.handle.0, "cancelled viewport transition");
        }
    }

    /// Advance the running transition. Frames for cancelled handles are
    /// ignored.
    pub fn on_frame(&mut self, handle: FrameHandle, now_ms: f64) {
        let Some(mut transition) = self.transition else {
            return;
        };
        if transition.handle != handle {
            return;
        }
        let started = *transition.started_ms.get_or_insert(now_ms);
        let duration = self.options.animation_ms.max(1.0);
        let t = ((now_ms - started) / duration).clamp(0.0, 1.0);
        let next = transition.from.lerp(&transition.to, ease_in_out_cubic(t));

        if t >= 1.0 {
            self.transition = None;
            self.apply(transition.to);
            return;
        }
        if let Some(scheduler) = self.scheduler.as_mut() {
            transition.handle = scheduler.request_frame();
        }
        self.transition = Some(transition);
        self.apply(next);
    }

    fn apply(&mut self, target: ViewportState) {
        let previous = self.state;
        if previous == target {
            return;
        }
        self.state = target;
        let kind = if (target.scale - previous.scale).abs() > f64::EPSILON {
            ViewportEventKind::Zoom
        } else {
            ViewportEventKind::Pan
        };
        let event = ViewportEvent {
            kind,
            state: target,
            bounds: self.world_viewport(),
            delta_x: target.x - previous.x,
            delta_y: target.y - previous.y,
            delta_scale: target.scale / previous.scale,
        };
        self.emit(&event);
    }

    fn emit(&mut self, event: &ViewportEvent) {
        for (id, listener) in self.listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(listener = id.0, "viewport listener panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct Frames {
        next: u64,
        requested: Vec<FrameHandle>,
        cancelled: Vec<FrameHandle>,
    }

    struct TestScheduler(Rc<RefCell<Frames>>);

    impl FrameScheduler for TestScheduler {
        fn request_frame(&mut self) -> FrameHandle {
            let mut frames = self.0.borrow_mut();
            frames.next += 1;
            let handle = FrameHandle(frames.next);
            frames.requested.push(handle);
            handle
        }

        fn cancel_frame(&mut self, handle: FrameHandle) {
            self.0.borrow_mut().cancelled.push(handle);
        }
    }

    fn controller() -> PanZoomController {
        PanZoomController::new(ControllerOptions::default(), 800.0, 600.0)
    }

    #[test]
    fn test_coordinate_round_trip() {
        let mut c = controller();
        for (x, y, scale) in [(0.0, 0.0, 1.0), (-120.5, 33.0, 0.37), (900.0, -4.0, 3.9)] {
            c.set_state(
                PartialState {
                    x: Some(x),
                    y: Some(y),
                    scale: Some(scale),
                },
                false,
            );
            for (wx, wy) in [(0.0, 0.0), (12.25, -7.5), (1e4, 3e3)] {
                let s = c.world_to_screen(wx, wy);
                let w = c.screen_to_world(s.x, s.y);
                assert!((w.x - wx).abs() < 1e-9 && (w.y - wy).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_scale_is_clamped() {
        let mut c = controller();
        c.zoom_by(100.0);
        assert_eq!(c.state().scale, 4.0);
        c.zoom_by(0.0001);
        assert_eq!(c.state().scale, 0.1);
        c.zoom_by(f64::NAN);
        assert_eq!(c.state().scale, 0.1);
    }

    #[test]
    fn test_zoom_to_point_keeps_world_point() {
        let mut c = controller();
        c.pan_by(40.0, -25.0);
        let before = c.screen_to_world(200.0, 150.0);
        c.zoom_to_point(200.0, 150.0, 2.5);
        let after = c.screen_to_world(200.0, 150.0);
        assert!((before.x - after.x).abs() < 1e-9);
        assert!((before.y - after.y).abs() < 1e-9);
    }

    #[test]
    fn test_zoom_to_fit_centres_bounds() {
        let mut c = controller();
        let bounds = Rect::new(100.0, 100.0, 400.0, 100.0);
        c.zoom_to_fit(&bounds, 50.0, false);
        assert_eq!(c.state().scale, 1.75);
        let center = c.world_to_screen(300.0, 150.0);
        assert!((center.x - 400.0).abs() < 1e-9 && (center.y - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_listeners_survive_a_panicking_listener() {
        let mut c = controller();
        let seen = Rc::new(RefCell::new(Vec::new()));
        c.add_event_listener(|_| panic!("listener failure"));
        let sink = seen.clone();
        let id = c.add_event_listener(move |e| sink.borrow_mut().push(e.kind));

        c.pan_by(10.0, 0.0);
        c.zoom_by(2.0);
        assert_eq!(
            *seen.borrow(),
            vec![ViewportEventKind::Pan, ViewportEventKind::Zoom]
        );
        assert_eq!(c.state().x, 10.0 * 2.0 - 400.0);

        assert!(c.remove_event_listener(id));
        c.pan_by(1.0, 1.0);
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_animated_transition_eases_and_finishes() {
        let frames = Rc::new(RefCell::new(Frames::default()));
        let mut c = controller().with_scheduler(Box::new(TestScheduler(frames.clone())));
        c.set_state(
            PartialState {
                x: Some(100.0),
                ..Default::default()
            },
            true,
        );
        assert!(c.is_animating());
        assert_eq!(c.state().x, 0.0);

        let first = frames.borrow().requested[0];
        c.on_frame(first, 1000.0);
        let second = *frames.borrow().requested.last().unwrap();
        c.on_frame(second, 1075.0);
        // a quarter of the way in time is well short of a quarter in space
        assert!(c.state().x > 0.0 && c.state().x < 25.0);
        let third = *frames.borrow().requested.last().unwrap();
        c.on_frame(third, 1300.0);
        assert_eq!(c.state().x, 100.0);
        assert!(!c.is_animating());
    }

    #[test]
    fn test_new_transition_cancels_previous_frame() {
        let frames = Rc::new(RefCell::new(Frames::default()));
        let mut c = controller().with_scheduler(Box::new(TestScheduler(frames.clone())));
        c.set_state(
            PartialState {
                x: Some(100.0),
                ..Default::default()
            },
            true,
        );
        let stale = frames.borrow().requested[0];
        c.set_state(
            PartialState {
                y: Some(50.0),
                ..Default::default()
            },
            true,
        );
        assert_eq!(frames.borrow().cancelled, vec![stale]);

        // the stale frame is ignored
        c.on_frame(stale, 0.0);
        c.on_frame(stale, 10_000.0);
        assert_eq!(c.state(), ViewportState::default());

        let current = *frames.borrow().requested.last().unwrap();
        c.on_frame(current, 0.0);
        let next = *frames.borrow().requested.last().unwrap();
        c.on_frame(next, 10_000.0);
        assert_eq!(c.state().y, 50.0);
        assert_eq!(c.state().x, 0.0);
    }

    #[test]
    fn test_immediate_change_cancels_animation() {
        let frames = Rc::new(RefCell::new(Frames::default()));
        let mut c = controller().with_scheduler(Box::new(TestScheduler(frames.clone())));
        c.reset(true);
        c.zoom_by(2.0);
        c.set_state(
            PartialState {
                x: Some(300.0),
                ..Default::default()
            },
            true,
        );
        c.pan_by(5.0, 5.0);
        assert!(!c.is_animating());
        assert_eq!(frames.borrow().cancelled.len(), 2);
    }
}
