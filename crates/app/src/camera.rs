//! Orbit camera feeding the renderer's global uniforms.

use glam::{Mat4, Vec3};

use lumen_platform::{KeyCode, Peripherals};
use lumen_renderer::GlobalUbo;

const ORBIT_SPEED: f32 = 1.5;
const ZOOM_SPEED: f32 = 4.0;
const MIN_DISTANCE: f32 = 1.5;
const MAX_DISTANCE: f32 = 20.0;
const MAX_PITCH: f32 = 1.5;

/// Camera orbiting the origin.
#[derive(Debug, Clone, Copy)]
pub struct OrbitCamera {
    pub yaw: f32,
    pub pitch: f32,
    pub distance: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 0.6,
            pitch: 0.4,
            distance: 4.0,
            fov_y: 50f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

impl OrbitCamera {
    /// Apply held keys and the wheel for `dt` seconds.
    ///
    /// Arrow keys or WASD orbit, the wheel and Q/E zoom.
    pub fn update(&mut self, input: &Peripherals, dt: f32) {
        let keys = &input.keyboard;
        let held = |a: KeyCode, b: KeyCode| keys.is_pressed(a) || keys.is_pressed(b);

        let step = ORBIT_SPEED * dt;
        if held(KeyCode::ArrowLeft, KeyCode::KeyA) {
            self.yaw -= step;
        }
        if held(KeyCode::ArrowRight, KeyCode::KeyD) {
            self.yaw += step;
        }
        if held(KeyCode::ArrowUp, KeyCode::KeyW) {
            self.pitch += step;
        }
        if held(KeyCode::ArrowDown, KeyCode::KeyS) {
            self.pitch -= step;
        }
        self.pitch = self.pitch.clamp(-MAX_PITCH, MAX_PITCH);

        let mut zoom = -input.mouse.wheel_delta();
        if keys.is_pressed(KeyCode::KeyQ) {
            zoom += ZOOM_SPEED * dt;
        }
        if keys.is_pressed(KeyCode::KeyE) {
            zoom -= ZOOM_SPEED * dt;
        }
        self.distance = (self.distance + zoom).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    pub fn eye(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(cos_pitch * sin_yaw, sin_pitch, cos_pitch * cos_yaw) * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }

    /// Right-handed perspective with Y flipped for Vulkan clip space.
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn globals(&self, aspect: f32) -> GlobalUbo {
        GlobalUbo::new(self.projection(aspect), self.view())
    }
}
