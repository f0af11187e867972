//! Matrix helpers for the capture and display cameras.
//!
//! Matrices are column-major `[[f32; 4]; 4]`, left-handed, with the
//! wgpu 0..1 clip depth range.

pub(crate) const FACE_COUNT: usize = 6;

pub(crate) const CAPTURE_FOV_Y: f32 = std::f32::consts::FRAC_PI_2;
pub(crate) const CAPTURE_NEAR: f32 = 0.1;
pub(crate) const CAPTURE_FAR: f32 = 10.0;

pub(crate) type Mat4 = [[f32; 4]; 4];

#[derive(Clone, Copy, Debug)]
pub(crate) struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub(crate) const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub(crate) const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    fn scale(self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    pub(crate) fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub(crate) fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub(crate) fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self.scale(1.0 / len)
        } else {
            Self::zero()
        }
    }
}

pub(crate) fn mat4_identity() -> Mat4 {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

pub(crate) fn mat4_mul(a: Mat4, b: Mat4) -> Mat4 {
    let mut out = [[0.0f32; 4]; 4];
    for col in 0..4 {
        out[col] = mat4_mul_vec4(a, b[col]);
    }
    out
}

pub(crate) fn mat4_mul_vec4(m: Mat4, v: [f32; 4]) -> [f32; 4] {
    [
        m[0][0] * v[0] + m[1][0] * v[1] + m[2][0] * v[2] + m[3][0] * v[3],
        m[0][1] * v[0] + m[1][1] * v[1] + m[2][1] * v[2] + m[3][1] * v[3],
        m[0][2] * v[0] + m[1][2] * v[1] + m[2][2] * v[2] + m[3][2] * v[3],
        m[0][3] * v[0] + m[1][3] * v[1] + m[2][3] * v[2] + m[3][3] * v[3],
    ]
}

/// Left-handed perspective projection, depth mapped to [0, 1].
pub(crate) fn perspective_lh(fovy: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let ys = 1.0 / (fovy * 0.5).tan();
    let xs = ys / aspect;
    let zs = far / (far - near);
    [
        [xs, 0.0, 0.0, 0.0],
        [0.0, ys, 0.0, 0.0],
        [0.0, 0.0, zs, 1.0],
        [0.0, 0.0, -near * zs, 0.0],
    ]
}

/// Left-handed look-at: view-space +z points from eye towards center.
pub(crate) fn look_at_lh(eye: Vec3, center: Vec3, up: Vec3) -> Mat4 {
    let z = center.sub(eye).normalize_or_zero();
    let x = up.cross(z).normalize_or_zero();
    let y = z.cross(x);
    [
        [x.x, y.x, z.x, 0.0],
        [x.y, y.y, z.y, 0.0],
        [x.z, y.z, z.z, 0.0],
        [-x.dot(eye), -y.dot(eye), -z.dot(eye), 1.0],
    ]
}

pub(crate) fn rotation_x(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, c, s, 0.0],
        [0.0, -s, c, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

pub(crate) fn rotation_y(angle: f32) -> Mat4 {
    let (s, c) = angle.sin_cos();
    [
        [c, 0.0, -s, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [s, 0.0, c, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// Capture cameras in cubemap layer order +X, -X, +Y, -Y, +Z, -Z.
/// The ±Y faces look along the poles, so their up-vectors lie on the
/// z-axis to keep the look-at basis well defined.
pub(crate) fn face_cameras() -> [(Vec3, Vec3); FACE_COUNT] {
    [
        (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.0, -1.0)),
        (Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
        (Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)),
        (Vec3::new(0.0, 0.0, -1.0), Vec3::new(0.0, 1.0, 0.0)),
    ]
}

/// One 90-degree view-projection per cube face, eye at the cube centre.
pub(crate) fn face_view_projections() -> [Mat4; FACE_COUNT] {
    let projection = perspective_lh(CAPTURE_FOV_Y, 1.0, CAPTURE_NEAR, CAPTURE_FAR);
    face_cameras().map(|(center, up)| mat4_mul(projection, look_at_lh(Vec3::zero(), center, up)))
}

/// CPU reference of the capture shader's direction-to-equirect mapping.
#[cfg(test)]
pub(crate) fn equirect_uv(dir: Vec3) -> [f32; 2] {
    use std::f32::consts::PI;
    let d = dir.normalize_or_zero();
    let lon = d.x.atan2(d.z);
    let lat = d.y.clamp(-1.0, 1.0).asin();
    [0.5 + lon / (2.0 * PI), 0.5 - lat / PI]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn look_at_forward_is_identity() {
        let view = look_at_lh(
            Vec3::zero(),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let identity = mat4_identity();
        for col in 0..4 {
            for row in 0..4 {
                assert!(approx(view[col][row], identity[col][row]));
            }
        }
    }

    #[test]
    fn face_cameras_cover_the_six_axes() {
        let axes = [
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ];
        for (index, (center, up)) in face_cameras().into_iter().enumerate() {
            assert_eq!([center.x, center.y, center.z], axes[index]);
            // Up must be orthogonal to the view direction.
            assert!(approx(center.dot(up), 0.0));
        }
    }

    #[test]
    fn each_face_maps_its_axis_to_view_forward() {
        for (center, up) in face_cameras() {
            let view = look_at_lh(Vec3::zero(), center, up);
            let forward = mat4_mul_vec4(view, [center.x, center.y, center.z, 1.0]);
            assert!(approx(forward[0], 0.0));
            assert!(approx(forward[1], 0.0));
            assert!(approx(forward[2], 1.0));
        }
    }

    #[test]
    fn face_corners_land_on_the_frustum_edges() {
        // Each face spans exactly 90 degrees, so the four corner directions
        // of the face quad must project to the NDC corners: adjacent faces
        // neither overlap nor leave a gap at their shared edge.
        for (index, vp) in face_view_projections().into_iter().enumerate() {
            let (center, up) = face_cameras()[index];
            let right = up.cross(center);
            for s in [-1.0f32, 1.0] {
                for t in [-1.0f32, 1.0] {
                    let corner = [
                        center.x + right.x * s + up.x * t,
                        center.y + right.y * s + up.y * t,
                        center.z + right.z * s + up.z * t,
                        1.0,
                    ];
                    let clip = mat4_mul_vec4(vp, corner);
                    assert!(clip[3] > 0.0, "face {} corner behind camera", index);
                    assert!(approx(clip[0].abs() / clip[3], 1.0), "face {}", index);
                    assert!(approx(clip[1].abs() / clip[3], 1.0), "face {}", index);
                }
            }
        }
    }

    #[test]
    fn shared_edge_directions_agree_between_neighbours() {
        // The direction midway between +X and +Z lies on the right edge of
        // one frustum and the left edge of the other.
        let shared = [1.0, 0.0, 1.0, 1.0];
        let vps = face_view_projections();
        let on_x = mat4_mul_vec4(vps[0], shared);
        let on_z = mat4_mul_vec4(vps[4], shared);
        assert!(approx(on_x[0].abs() / on_x[3], 1.0));
        assert!(approx(on_z[0].abs() / on_z[3], 1.0));
        // And the equirect lookup for that direction is face independent by
        // construction: the same direction always samples the same texel.
        let uv = equirect_uv(Vec3::new(1.0, 0.0, 1.0));
        assert!(approx(uv[0], 0.5 + 0.125));
        assert!(approx(uv[1], 0.5));
    }

    #[test]
    fn perspective_maps_near_and_far_to_unit_depth() {
        let projection = perspective_lh(CAPTURE_FOV_Y, 1.0, CAPTURE_NEAR, CAPTURE_FAR);
        let near = mat4_mul_vec4(projection, [0.0, 0.0, CAPTURE_NEAR, 1.0]);
        let far = mat4_mul_vec4(projection, [0.0, 0.0, CAPTURE_FAR, 1.0]);
        assert!(approx(near[2] / near[3], 0.0));
        assert!(approx(far[2] / far[3], 1.0));
    }

    #[test]
    fn equirect_uv_centre_is_forward() {
        let uv = equirect_uv(Vec3::new(0.0, 0.0, 1.0));
        assert!(approx(uv[0], 0.5));
        assert!(approx(uv[1], 0.5));
        let top = equirect_uv(Vec3::new(0.0, 1.0, 0.0));
        assert!(approx(top[1], 0.0));
        let right = equirect_uv(Vec3::new(1.0, 0.0, 0.0));
        assert!(approx(right[0], 0.75));
    }

    #[test]
    fn yaw_rotation_turns_forward_towards_plus_x() {
        let rotated = mat4_mul_vec4(
            rotation_y(std::f32::consts::FRAC_PI_2),
            [0.0, 0.0, 1.0, 1.0],
        );
        assert!(approx(rotated[0], 1.0));
        assert!(approx(rotated[2], 0.0));
    }

    #[test]
    fn pitch_rotation_tilts_forward_towards_minus_y() {
        let rotated = mat4_mul_vec4(
            rotation_x(std::f32::consts::FRAC_PI_2),
            [0.0, 0.0, 1.0, 1.0],
        );
        assert!(approx(rotated[1], -1.0));
        assert!(approx(rotated[2], 0.0));
    }
}
