// Free-fly camera
//
// Yaw and pitch are in degrees. Yaw -90 looks down -Z.

use glam::{Mat4, Vec3};
use winit::keyboard::KeyCode;
use crate::input::InputState;

const WORLD_UP: Vec3 = Vec3::Y;
const PITCH_LIMIT: f32 = 89.0;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    /// Units per second
    pub move_speed: f32,
    /// Degrees per mouse count
    pub turn_speed: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32, move_speed: f32, turn_speed: f32) -> Self {
        Self {
            position,
            yaw,
            pitch: pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            move_speed,
            turn_speed,
            fov: 45.0,
        }
    }

    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.front().cross(WORLD_UP).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.front()).normalize()
    }

    /// WASD moves in the view plane, Space/LCtrl move along world up
    pub fn process_keys(&mut self, input: &InputState, dt: f32) {
        let step = self.move_speed * dt;
        let front = self.front();
        let right = self.right();

        let mut movement = Vec3::ZERO;
        if input.is_held(KeyCode::KeyW) {
            movement += front;
        }
        if input.is_held(KeyCode::KeyS) {
            movement -= front;
        }
        if input.is_held(KeyCode::KeyD) {
            movement += right;
        }
        if input.is_held(KeyCode::KeyA) {
            movement -= right;
        }
        if input.is_held(KeyCode::Space) {
            movement += WORLD_UP;
        }
        if input.is_held(KeyCode::ControlLeft) {
            movement -= WORLD_UP;
        }

        self.position += movement * step;
    }

    /// Mouse moving down (positive dy) looks down
    pub fn process_mouse(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.turn_speed;
        self.pitch = (self.pitch - dy * self.turn_speed).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front(), self.up())
    }

}

/// Right-handed perspective with Y inverted for Vulkan clip space
pub fn perspective(fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut projection = Mat4::perspective_rh(fov_degrees.to_radians(), aspect, near, far);
    projection.y_axis.y *= -1.0;
    projection
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, 8.0), -90.0, -10.0, 5.0, 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::event::ElementState;

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::new(Vec3::ZERO, -90.0, 0.0, 1.0, 1.0);
        camera.process_mouse(0.0, -500.0);
        assert_eq!(camera.pitch, 89.0);
        camera.process_mouse(0.0, 500.0);
        assert_eq!(camera.pitch, -89.0);
    }

    #[test]
    fn forward_moves_down_negative_z() {
        let mut camera = Camera::new(Vec3::ZERO, -90.0, 0.0, 5.0, 0.1);
        let mut input = InputState::default();
        input.handle_key(KeyCode::KeyW, ElementState::Pressed);

        camera.process_keys(&input, 1.0);
        assert!(camera.position.abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-4), "{:?}", camera.position);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::new(Vec3::ZERO, -90.0, 0.0, 1.0, 1.0);
        let clip = perspective(camera.fov, 1.0, 0.1, 100.0) * camera.view_matrix() * glam::Vec4::new(0.0, 1.0, -5.0, 1.0);
        // Above the view centre ends up in the upper half of Vulkan's y-down NDC
        assert!(clip.y / clip.w < 0.0);
        let depth = clip.z / clip.w;
        assert!(depth > 0.0 && depth < 1.0);
    }
}
