/// Maps a pan translation of the on-screen stick to normalized axis values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoystickGeometry {
    radius: f32,
    invert_y: bool,
}

impl JoystickGeometry {
    pub fn new(radius: f32, invert_y: bool) -> Self {
        // A degenerate radius would divide by zero
        let radius = if radius.is_finite() && radius > 0.0 {
            radius
        } else {
            1.0
        };
        Self { radius, invert_y }
    }

    /// Translation is limited to the base circle with its direction kept,
    /// then scaled so the rim is 1.0.
    pub fn normalize(&self, dx: f32, dy: f32) -> (f32, f32) {
        let distance = dx.hypot(dy);
        let (x, y) = if distance > self.radius {
            let angle = dy.atan2(dx);
            (angle.cos() * self.radius, angle.sin() * self.radius)
        } else {
            (dx, dy)
        };

        let y = if self.invert_y { -y } else { y };
        (x / self.radius, y / self.radius)
    }

    /// The stick springs back to the centre when let go
    pub fn release(&self) -> (f32, f32) {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_inside_circle_is_linear() {
        let geometry = JoystickGeometry::new(100.0, false);
        let (x, y) = geometry.normalize(50.0, -25.0);
        assert!(close(x, 0.5));
        assert!(close(y, -0.25));
    }

    #[test]
    fn test_outside_circle_keeps_direction() {
        let geometry = JoystickGeometry::new(100.0, false);
        let (x, y) = geometry.normalize(300.0, 400.0);
        assert!(close(x, 0.6));
        assert!(close(y, 0.8));
        assert!(close(x.hypot(y), 1.0));
    }

    #[test]
    fn test_invert_y_flips_screen_coordinates() {
        let geometry = JoystickGeometry::new(100.0, true);
        let (_, y) = geometry.normalize(0.0, 100.0);
        assert!(close(y, -1.0));
    }

    #[test]
    fn test_degenerate_radius_and_release() {
        let geometry = JoystickGeometry::new(0.0, false);
        let (x, _) = geometry.normalize(5.0, 0.0);
        assert!(close(x, 1.0));
        assert_eq!(geometry.release(), (0.0, 0.0));
    }
}
