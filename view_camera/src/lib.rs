//! View rotation accumulated from mouse-drag deltas.
#![forbid(unsafe_code)]

/// Drag sensitivity in radians per view point.
pub const RADIANS_PER_POINT: f32 = 0.0001;

/// Pitch accumulation policy. `Free` lets the view flip past the poles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PitchRange {
    Free,
    Clamped(f32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewRotation {
    /// Rotation about the x-axis (vertical drag), radians.
    pub pitch: f32,
    /// Rotation about the y-axis (horizontal drag), radians.
    pub yaw: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct ViewCamera {
    pitch: f32,
    yaw: f32,
    sensitivity: f32,
    pitch_range: PitchRange,
}

impl ViewCamera {
    pub fn new(pitch_range: PitchRange) -> Self {
        Self {
            pitch: 0.0,
            yaw: 0.0,
            sensitivity: RADIANS_PER_POINT,
            pitch_range,
        }
    }

    pub fn set_sensitivity(&mut self, radians_per_point: f32) {
        self.sensitivity = radians_per_point;
    }

    /// Accumulate a drag of (dx, dy) view points. Dragging right pans the
    /// view left, dragging up pans it down, so both deltas are negated.
    pub fn apply_drag(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * self.sensitivity;
        self.pitch -= dy * self.sensitivity;
        if let PitchRange::Clamped(limit) = self.pitch_range {
            self.pitch = self.pitch.clamp(-limit, limit);
        }
    }

    pub fn rotation(&self) -> ViewRotation {
        ViewRotation {
            pitch: self.pitch,
            yaw: self.yaw,
        }
    }

    pub fn reset(&mut self) {
        self.pitch = 0.0;
        self.yaw = 0.0;
    }
}

impl Default for ViewCamera {
    fn default() -> Self {
        Self::new(PitchRange::Free)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drag_accumulates_across_calls() {
        let mut camera = ViewCamera::new(PitchRange::Free);
        camera.set_sensitivity(0.01);
        camera.apply_drag(10.0, 0.0);
        camera.apply_drag(10.0, -5.0);
        let rotation = camera.rotation();
        assert!((rotation.yaw - (-0.2)).abs() < 1e-6);
        assert!((rotation.pitch - 0.05).abs() < 1e-6);
    }

    #[test]
    fn free_pitch_passes_the_poles() {
        let mut camera = ViewCamera::new(PitchRange::Free);
        camera.set_sensitivity(1.0);
        camera.apply_drag(0.0, -10.0);
        assert!(camera.rotation().pitch > std::f32::consts::FRAC_PI_2);
    }

    #[test]
    fn clamped_pitch_stops_at_the_limit() {
        let mut camera = ViewCamera::new(PitchRange::Clamped(1.54));
        camera.set_sensitivity(1.0);
        camera.apply_drag(0.0, -10.0);
        assert!((camera.rotation().pitch - 1.54).abs() < 1e-6);
        camera.apply_drag(0.0, 20.0);
        assert!((camera.rotation().pitch + 1.54).abs() < 1e-6);
    }

    #[test]
    fn reset_zeroes_both_axes() {
        let mut camera = ViewCamera::default();
        camera.apply_drag(100.0, 100.0);
        camera.reset();
        assert_eq!(
            camera.rotation(),
            ViewRotation {
                pitch: 0.0,
                yaw: 0.0
            }
        );
    }
}
