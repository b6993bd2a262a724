//! turt - Main Entry Point
//!
//! Opens a window and renders a small scene of shader-generated quads until
//! the window is closed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use glam::{Vec2, Vec3};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use turt_core::{EngineConfig, Timer};
use turt_platform::Window;
use turt_renderer::{Drawable, Engine, FrameOutcome, Projection, UpdateBehavior, View};

/// Vertices per quad drawn by the bundled shaders.
const QUAD_VERTICES: u32 = 6;

const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "turt", version, about = "Continuous Vulkan frame renderer")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial window width
    #[arg(long)]
    width: Option<u32>,

    /// Initial window height
    #[arg(long)]
    height: Option<u32>,

    /// Number of frames the CPU may record ahead of the GPU (1-4)
    #[arg(long)]
    frames_in_flight: Option<usize>,

    /// Disable the Vulkan validation layer
    #[arg(long)]
    no_validation: bool,

    /// Directory containing compiled SPIR-V shaders
    #[arg(long)]
    shader_dir: Option<PathBuf>,
}

impl Cli {
    /// Loads the config file (or defaults) and applies command-line overrides.
    fn resolve_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(width) = self.width {
            config.window.width = width;
        }
        if let Some(height) = self.height {
            config.window.height = height;
        }
        if let Some(frames) = self.frames_in_flight {
            config.frames_in_flight = frames;
        }
        if self.no_validation {
            config.validation = false;
        }
        if let Some(dir) = &self.shader_dir {
            config.shader_dir = dir.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn scene() -> Vec<Drawable> {
    vec![
        Drawable::new("shader", QUAD_VERTICES).with_position(Vec2::new(-0.5, 0.5)),
        Drawable::new("shader", QUAD_VERTICES)
            .with_position(Vec2::new(0.5, -0.5))
            .with_behavior(UpdateBehavior::Orbit {
                radius: 0.25,
                speed: 1.0,
            }),
        Drawable::new("shader", QUAD_VERTICES).with_behavior(UpdateBehavior::Spin {
            radians_per_second: 0.5,
            axis: Vec3::Z,
        }),
    ]
}

/// Perspective camera a short distance in front of the quads, so the orbiting
/// quad visibly moves toward and away from the viewer.
fn camera() -> (View, Projection) {
    let view = View::LookAt {
        eye: Vec3::new(0.0, 0.0, 2.0),
        target: Vec3::ZERO,
        up: Vec3::Y,
    };
    let projection = Projection::Perspective {
        fov_y: 60f32.to_radians(),
        near: 0.1,
        far: 10.0,
    };
    (view, projection)
}

struct App {
    config: EngineConfig,
    // Declared before `window` so the engine (and its surface) goes first.
    engine: Option<Engine>,
    window: Option<Window>,
    timer: Timer,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            window: None,
            timer: Timer::new(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.engine = None;
        self.failure = Some(err);
        event_loop.exit();
    }

    /// No redraws are requested while minimized; the loop sleeps until a
    /// resize arrives.
    fn wants_redraw(&self) -> bool {
        self.window.is_some() && !self.engine.as_ref().is_some_and(Engine::is_minimized)
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match engine.draw_frame() {
            Ok(FrameOutcome::Minimized) => {
                event_loop.set_control_flow(ControlFlow::Wait);
            }
            Ok(FrameOutcome::Presented | FrameOutcome::SwapchainRecreated) => {
                event_loop.set_control_flow(ControlFlow::Poll);
                self.timer.tick();
                if let Some(fps) = self.timer.fps_report(FPS_REPORT_INTERVAL) {
                    info!("{:.1} fps ({} frames)", fps, self.timer.frame_count());
                }
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("frame failed")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("failed to create window"));
                return;
            }
        };

        match Engine::new(&window, &self.config, scene()) {
            Ok(mut engine) => {
                let (view, projection) = camera();
                engine.set_view(view);
                engine.set_projection(projection);
                info!("Initialization complete, entering main loop");
                self.engine = Some(engine);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("failed to create engine")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.engine = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.notify_resized(size.width, size.height);
                }
                if size.width > 0 && size.height > 0 {
                    event_loop.set_control_flow(ControlFlow::Poll);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if !self.wants_redraw() {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(engine) = &self.engine {
            engine.wait_idle();
        }
        info!("Rendered {} frames", self.timer.frame_count());
    }
}

fn main() -> Result<()> {
    turt_core::init_logging();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    info!("Starting turt with {:?}", config);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "turt",
            "--width",
            "1024",
            "--frames-in-flight",
            "3",
            "--no-validation",
            "--shader-dir",
            "assets/spv",
        ]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.frames_in_flight, 3);
        assert!(!config.validation);
        assert_eq!(config.shader_dir, PathBuf::from("assets/spv"));
    }

    #[test]
    fn test_cli_rejects_invalid_frames_in_flight() {
        let cli = Cli::parse_from(["turt", "--frames-in-flight", "9"]);
        assert!(cli.resolve_config().is_err());
    }

    #[test]
    fn test_no_redraw_without_window() {
        let app = App::new(EngineConfig::default());
        assert!(!app.wants_redraw());
    }

    #[test]
    fn test_camera_sees_every_drawable() {
        let (view, projection) = camera();
        for mut drawable in scene() {
            for time in [0.0, 1.0, 2.5] {
                let ubo = drawable.uniforms(time, (800, 600), &view, &projection);
                let clip = ubo.projection * ubo.view * ubo.model * Vec3::ZERO.extend(1.0);
                assert!(clip.w > 0.0, "drawable behind the camera");
                let ndc = clip.truncate() / clip.w;
                assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "off screen: {ndc:?}");
                assert!((0.0..=1.0).contains(&ndc.z), "clipped by depth: {ndc:?}");
            }
        }
    }

    #[test]
    fn test_scene_shares_one_shader() {
        let drawables = scene();
        assert!(drawables.len() >= 2);
        assert!(drawables.iter().all(|d| d.shader() == "shader"));
        assert!(drawables.iter().all(|d| d.vertex_count() == QUAD_VERTICES));
    }
}
