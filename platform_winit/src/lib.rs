#![forbid(unsafe_code)]

use std::fmt;
use std::time::Instant;

pub use winit::dpi::{PhysicalPosition, PhysicalSize};
pub use winit::event::{ElementState, Event, MouseButton, WindowEvent};
pub use winit::event_loop::{ControlFlow, EventLoop};
pub use winit::keyboard::{KeyCode, PhysicalKey};
pub use winit::window::Window;

#[derive(Debug)]
pub enum WindowInitError {
    EventLoop(String),
    Window(winit::error::OsError),
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowInitError::EventLoop(message) => {
                write!(f, "event loop initialization failed: {}", message)
            }
            WindowInitError::Window(err) => write!(f, "window creation failed: {}", err),
        }
    }
}

impl std::error::Error for WindowInitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WindowInitError::EventLoop(_) => None,
            WindowInitError::Window(err) => Some(err),
        }
    }
}

pub fn create_window(
    title: &str,
    width: u32,
    height: u32,
) -> Result<(EventLoop<()>, Window), WindowInitError> {
    let event_loop = EventLoop::new().map_err(|err| WindowInitError::EventLoop(err.to_string()))?;
    let window = winit::window::WindowBuilder::new()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)
        .map_err(WindowInitError::Window)?;
    Ok((event_loop, window))
}

/// One display tick. The timestamp is milliseconds since the clock was
/// created, which downstream consumers use as the presentation clock.
#[derive(Clone, Copy, Debug)]
pub struct RefreshEvent {
    pub elapsed_ms: u64,
}

/// Wall clock behind the redraw-driven render loop.
pub struct RefreshClock {
    start: Instant,
}

impl RefreshClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn tick(&self) -> RefreshEvent {
        RefreshEvent {
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

/// Drag delta in view points (device pixels divided by the scale factor).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragDelta {
    pub dx: f32,
    pub dy: f32,
}

/// Turns left-button press / cursor-move / release events into drag
/// deltas. Cursor motion while the button is up produces nothing.
#[derive(Debug, Default)]
pub struct DragTracker {
    dragging: bool,
    last_position: Option<PhysicalPosition<f64>>,
}

impl DragTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_mouse_input(&mut self, state: ElementState, button: MouseButton) {
        if button != MouseButton::Left {
            return;
        }
        match state {
            ElementState::Pressed => {
                self.dragging = true;
                self.last_position = None;
            }
            ElementState::Released => {
                self.dragging = false;
                self.last_position = None;
            }
        }
    }

    pub fn on_cursor_moved(
        &mut self,
        position: PhysicalPosition<f64>,
        scale_factor: f64,
    ) -> Option<DragDelta> {
        if !self.dragging {
            return None;
        }
        let delta = self.last_position.map(|last| {
            let scale = if scale_factor > 0.0 { scale_factor } else { 1.0 };
            DragDelta {
                dx: ((position.x - last.x) / scale) as f32,
                dy: ((position.y - last.y) / scale) as f32,
            }
        });
        self.last_position = Some(position);
        delta
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_without_press_produces_nothing() {
        let mut tracker = DragTracker::new();
        assert!(tracker
            .on_cursor_moved(PhysicalPosition::new(10.0, 10.0), 1.0)
            .is_none());
    }

    #[test]
    fn drag_reports_deltas_between_moves() {
        let mut tracker = DragTracker::new();
        tracker.on_mouse_input(ElementState::Pressed, MouseButton::Left);
        // First move after the press only anchors the position.
        assert!(tracker
            .on_cursor_moved(PhysicalPosition::new(100.0, 100.0), 1.0)
            .is_none());
        let delta = tracker
            .on_cursor_moved(PhysicalPosition::new(104.0, 97.0), 1.0)
            .expect("delta");
        assert_eq!(delta, DragDelta { dx: 4.0, dy: -3.0 });
    }

    #[test]
    fn deltas_are_scaled_to_points() {
        let mut tracker = DragTracker::new();
        tracker.on_mouse_input(ElementState::Pressed, MouseButton::Left);
        tracker.on_cursor_moved(PhysicalPosition::new(0.0, 0.0), 2.0);
        let delta = tracker
            .on_cursor_moved(PhysicalPosition::new(8.0, 4.0), 2.0)
            .expect("delta");
        assert_eq!(delta, DragDelta { dx: 4.0, dy: 2.0 });
    }

    #[test]
    fn release_ends_the_drag() {
        let mut tracker = DragTracker::new();
        tracker.on_mouse_input(ElementState::Pressed, MouseButton::Left);
        tracker.on_cursor_moved(PhysicalPosition::new(0.0, 0.0), 1.0);
        tracker.on_mouse_input(ElementState::Released, MouseButton::Left);
        assert!(!tracker.is_dragging());
        assert!(tracker
            .on_cursor_moved(PhysicalPosition::new(50.0, 50.0), 1.0)
            .is_none());
    }

    #[test]
    fn other_buttons_are_ignored() {
        let mut tracker = DragTracker::new();
        tracker.on_mouse_input(ElementState::Pressed, MouseButton::Right);
        assert!(!tracker.is_dragging());
    }
}
