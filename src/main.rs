// =============================================================================
// VULKAN SCENE RENDERER - Textured meshes, MSAA, mipmaps and shadow mapping
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, camera)                          │
// │    └── Renderer (meshes, models, textures, light)               │
// │          └── Vulkan Device + Swapchain                          │
// │                └── Shadow pass → Scene pass (MSAA resolve)      │
// │                      └── Synchronization (fences, semaphores)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Apply held keys and mouse movement to the camera
// 2. Spin configured models, rotate the light
// 3. Renderer::draw with the camera's view matrix
// 4. Update the FPS counter in the title bar
//
// =============================================================================

mod backend;
mod config;
mod hot_reload;
mod input;
mod renderer;
mod scene;

use anyhow::Result;
use config::{parse_key, Config};
use glam::{Mat4, Quat, Vec3};
use hot_reload::ShaderWatcher;
use input::InputState;
use renderer::Renderer;
use scene::primitives;
use scene::Camera;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{CursorGrabMode, Fullscreen, Window, WindowAttributes},
};

/// Radians per second while an arrow key is held
const LIGHT_TURN_RATE: f32 = 1.0;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    // The log file location lives in the config, so it is read once before the
    // logger exists and again after so load warnings are visible.
    let config = Config::load_from_path(&config_path).unwrap_or_default();
    init_logging(&config);
    let config = Config::load(&config_path);

    log::info!("Starting scene renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Writes every log line to stderr and to a file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

/// Info by default, RUST_LOG overrides, optional copy to a file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Scene Renderer Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(Tee { file })));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// A configured model and how it moves
struct Placement {
    model_id: usize,
    position: Vec3,
    scale: f32,
    spin_speed: f32,
}

/// Key bindings resolved from config names
struct Keys {
    quit: KeyCode,
    fullscreen: KeyCode,
    msaa: KeyCode,
    texture: KeyCode,
}

impl Keys {
    fn from_config(config: &Config) -> Self {
        let resolve = |name: &str, fallback: KeyCode| {
            parse_key(name).unwrap_or_else(|| {
                log::warn!("Unknown key '{}', using {:?}", name, fallback);
                fallback
            })
        };
        let controls = &config.controls;
        Self {
            quit: resolve(&controls.quit_key, KeyCode::Escape),
            fullscreen: resolve(&controls.fullscreen_key, KeyCode::F11),
            msaa: resolve(&controls.msaa_key, KeyCode::KeyM),
            texture: resolve(&controls.texture_key, KeyCode::KeyT),
        }
    }
}

/// IMPORTANT: the renderer is declared before the window so it drops first;
/// the surface must go before the window it was created from.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,
    shader_watcher: Option<ShaderWatcher>,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,
    camera: Camera,
    input: InputState,
    keys: Keys,
    placements: Vec<Placement>,
    spin_angle: f32,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    is_fullscreen: bool,
    cursor_grabbed: bool,
    textures_on: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // FPS TRACKING
    // ─────────────────────────────────────────────────────────────────────────
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        let mut camera = Camera::default();
        camera.move_speed = config.controls.move_speed;
        camera.turn_speed = config.controls.mouse_sensitivity;

        Self {
            renderer: None,
            window: None,
            shader_watcher: None,
            keys: Keys::from_config(&config),
            is_fullscreen: config.window.fullscreen,
            config,
            camera,
            input: InputState::default(),
            placements: Vec::new(),
            spin_angle: 0.0,
            cursor_grabbed: false,
            textures_on: true,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let size = window.inner_size();
        let mut renderer = Renderer::new(window, size.width, size.height, &self.config)?;

        self.placements = load_scene(&mut renderer, &self.config)?;

        if self.config.debug.hot_reload {
            match ShaderWatcher::new(&self.config.graphics.shader_dir) {
                Ok(watcher) => self.shader_watcher = Some(watcher),
                Err(e) => log::warn!("Shader hot reload disabled: {:#}", e),
            }
        }

        self.renderer = Some(renderer);
        Ok(())
    }

    // =========================================================================
    // PER-FRAME UPDATE
    // =========================================================================

    fn render_frame(&mut self) -> Result<bool> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(false);
        };

        if let Some(watcher) = &self.shader_watcher {
            if watcher.poll_changed() {
                if let Err(e) = renderer.reload_shaders() {
                    log::error!("Shader reload failed, keeping old pipelines: {:#}", e);
                }
            }
        }

        // Camera
        let (dx, dy) = self.input.take_mouse_delta();
        if self.cursor_grabbed {
            self.camera.process_mouse(dx as f32, dy as f32);
        }
        self.camera.process_keys(&self.input, dt);

        // Light
        if let Some(direction) = rotate_light(renderer.light().direction(), &self.input, dt) {
            renderer.update_directional_light(Some(direction), None, None, None);
        }

        // Models
        self.spin_angle += dt;
        for placement in &self.placements {
            let model = Mat4::from_translation(placement.position)
                * Mat4::from_rotation_y((placement.spin_speed * self.spin_angle).to_radians())
                * Mat4::from_scale(Vec3::splat(placement.scale));
            renderer.update_mesh_model(placement.model_id, model);
        }

        renderer.set_fov(self.camera.fov);
        renderer.draw(self.camera.view_matrix(), self.camera.position)
    }

    fn handle_key_press(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        if key == self.keys.quit {
            log::info!("{:?} pressed, exiting...", key);
            event_loop.exit();
        } else if key == self.keys.fullscreen {
            self.toggle_fullscreen();
        } else if key == self.keys.msaa {
            if let Some(renderer) = self.renderer.as_mut() {
                let next = next_msaa_level(
                    renderer.multisample_level(),
                    renderer.max_multisample_level(),
                );
                if let Err(e) = renderer.set_multisample_level(next) {
                    log::error!("Failed to change MSAA level: {:#}", e);
                }
            }
        } else if key == self.keys.texture {
            if let Some(renderer) = self.renderer.as_mut() {
                self.textures_on = !self.textures_on;
                if renderer.texture_state_model(0).is_some() {
                    renderer.set_texture_state_model(0, self.textures_on);
                } else {
                    // Default scene: toggle the built-in meshes instead
                    for mesh_id in 0..renderer.mesh_count() {
                        renderer.set_texture_state_mesh(mesh_id, self.textures_on);
                    }
                }
                log::info!("Texturing {}", if self.textures_on { "on" } else { "off" });
            }
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;
            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Switched to fullscreen");
            } else {
                window.set_fullscreen(None);
                log::info!("Switched to windowed mode");
            }
        }
    }

    fn set_cursor_grab(&mut self, grab: bool) {
        let Some(ref window) = self.window else {
            return;
        };

        if grab {
            // Locked is not supported everywhere; Confined is the fallback
            let result = window
                .set_cursor_grab(CursorGrabMode::Locked)
                .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
            if let Err(e) = result {
                log::warn!("Cursor grab unavailable: {}", e);
                return;
            }
        } else if let Err(e) = window.set_cursor_grab(CursorGrabMode::None) {
            log::warn!("Failed to release cursor: {}", e);
        }

        window.set_cursor_visible(!grab);
        self.cursor_grabbed = grab;
    }

    fn update_fps(&mut self) {
        self.frame_count += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();

        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if self.config.debug.show_fps {
                if let (Some(window), Some(renderer)) = (&self.window, &self.renderer) {
                    window.set_title(&format!(
                        "{} | {:.0} FPS | {:.2}ms | MSAA x{}",
                        self.config.window.title,
                        fps,
                        1000.0 / fps.max(f32::EPSILON),
                        renderer.multisample_level()
                    ));
                }
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// SCENE SETUP
// =============================================================================

/// Load configured models, or a small default scene when there are none
fn load_scene(renderer: &mut Renderer, config: &Config) -> Result<Vec<Placement>> {
    let texture_dir = &config.scene.texture_dir;
    let mut placements = Vec::new();

    for model in &config.scene.models {
        match renderer.create_model(&model.path, texture_dir) {
            Ok(model_id) => placements.push(Placement {
                model_id,
                position: Vec3::from(model.position),
                scale: model.scale,
                spin_speed: model.spin_speed,
            }),
            Err(e) => log::error!("Skipping model {:?}: {:#}", model.path, e),
        }
    }

    if renderer.model_count() == 0 {
        log::info!("No models loaded, building the default scene");

        let floor = renderer.create_mesh(
            &primitives::plane(10.0, 10.0, [1.0; 3]),
            existing_texture(texture_dir, "plain.png").as_deref(),
        )?;
        renderer.update_model(floor, Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)));

        let pyramid = renderer.create_mesh(
            &primitives::pyramid(1.0, 2.0, [1.0; 3]),
            existing_texture(texture_dir, "brick.png").as_deref(),
        )?;
        renderer.update_model(pyramid, Mat4::from_translation(Vec3::new(-2.0, -1.0, 0.0)));

        let cube = renderer.create_mesh(
            &primitives::cube(0.75, [0.8, 0.3, 0.2]),
            existing_texture(texture_dir, "dirt.png").as_deref(),
        )?;
        renderer.update_model(cube, Mat4::from_translation(Vec3::new(2.0, -0.25, 0.0)));
    }

    Ok(placements)
}

fn existing_texture(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(name);
    path.is_file().then_some(path)
}

/// Left/Right turn the light around world Y, Up/Down tilt it
fn rotate_light(direction: Vec3, input: &InputState, dt: f32) -> Option<Vec3> {
    let mut yaw = 0.0;
    let mut tilt = 0.0;
    if input.is_held(KeyCode::ArrowLeft) {
        yaw += LIGHT_TURN_RATE * dt;
    }
    if input.is_held(KeyCode::ArrowRight) {
        yaw -= LIGHT_TURN_RATE * dt;
    }
    if input.is_held(KeyCode::ArrowUp) {
        tilt += LIGHT_TURN_RATE * dt;
    }
    if input.is_held(KeyCode::ArrowDown) {
        tilt -= LIGHT_TURN_RATE * dt;
    }
    if yaw == 0.0 && tilt == 0.0 {
        return None;
    }

    let mut rotated = Quat::from_rotation_y(yaw) * direction;
    let axis = rotated.cross(Vec3::Y);
    if let Some(axis) = axis.try_normalize() {
        let tilted = Quat::from_axis_angle(axis, tilt) * rotated;
        // Stop short of straight down so the horizontal axis stays defined
        if tilted.normalize().dot(-Vec3::Y) < 0.999 {
            rotated = tilted;
        }
    }
    Some(rotated)
}

/// 1 → 2 → 4 → 8 → 1, wrapping early past what the device supports
fn next_msaa_level(current: u32, max_level: u32) -> u32 {
    let next = match current {
        1 => 2,
        2 => 4,
        4 => 8,
        _ => 1,
    };
    if next > max_level {
        1
    } else {
        next
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {:?}", e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized(size.width, size.height);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // FOCUS
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Focused(false) => {
                self.input.clear();
                self.set_cursor_grab(false);
            }

            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                ..
            } => {
                if !self.cursor_grabbed {
                    self.set_cursor_grab(true);
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(rendered) => {
                    if rendered {
                        self.update_fps();
                    }
                }
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                }
            },

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if self.input.handle_key(key, event.state) {
                        self.handle_key_press(event_loop, key);
                    }
                }
            }

            _ => {}
        }
    }

    /// Mouse look uses raw motion so it keeps working with a locked cursor
    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.add_mouse_delta(dx, dy);
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer::drop waits for the GPU before tearing down
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(max_level: u32, presses: usize) -> Vec<u32> {
        let mut level = 1;
        (0..presses)
            .map(|_| {
                level = next_msaa_level(level, max_level);
                level
            })
            .collect()
    }

    #[test]
    fn msaa_levels_cycle() {
        assert_eq!(cycle(8, 5), vec![2, 4, 8, 1, 2]);
    }

    #[test]
    fn msaa_cycle_wraps_at_device_maximum() {
        assert_eq!(cycle(4, 6), vec![2, 4, 1, 2, 4, 1]);
        assert_eq!(cycle(1, 3), vec![1, 1, 1]);
    }

    #[test]
    fn arrows_turn_the_light_around_y() {
        let mut input = InputState::default();
        input.handle_key(KeyCode::ArrowLeft, ElementState::Pressed);

        let start = Vec3::new(1.0, -1.0, 0.0).normalize();
        let turned = rotate_light(start, &input, std::f32::consts::FRAC_PI_2 / LIGHT_TURN_RATE).unwrap();

        // Height is kept, the horizontal part turns a quarter
        assert!((turned.y - start.y).abs() < 1e-5);
        assert!(turned.x.abs() < 1e-5);
        assert!((turned.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn no_arrows_leave_the_light_alone() {
        let input = InputState::default();
        assert!(rotate_light(Vec3::NEG_Y, &input, 1.0).is_none());
    }
}
