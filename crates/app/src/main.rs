//! lumen - frame-lifecycle renderer entry point.
//!
//! Loads the JSON configuration named on the command line, opens a window,
//! and renders until the window closes or Escape is pressed.

mod camera;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use lumen_core::{AppConfig, FrameClock};
use lumen_platform::{KeyCode, Peripherals, Window};
use lumen_renderer::Renderer;

use camera::OrbitCamera;

#[derive(Debug, Parser)]
#[command(name = "lumen", version, about = "Vulkan frame-lifecycle renderer")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(default_value = "config.json")]
    config: PathBuf,
}

struct App {
    config: AppConfig,
    // Declared before the window so the surface goes before the window.
    renderer: Option<Renderer>,
    window: Option<Window>,
    input: Peripherals,
    camera: OrbitCamera,
    clock: FrameClock,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: AppConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            input: Peripherals::new(),
            camera: OrbitCamera::default(),
            clock: FrameClock::new(),
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let app = &self.config.app;
        let window =
            Window::new(event_loop, &app.title, &app.window).context("failed to create window")?;
        let renderer =
            Renderer::new(&window, &self.config).context("failed to create renderer")?;

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.failure = Some(err);
        // Release GPU objects while the window is still alive.
        self.renderer = None;
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let (_, delta) = self.clock.begin();
        let (Some(window), Some(renderer)) = (self.window.as_ref(), self.renderer.as_mut()) else {
            return Ok(());
        };
        if window.is_minimized() {
            return Ok(());
        }

        self.camera.update(&self.input, delta.as_secs_f32());
        renderer.set_globals(self.camera.globals(window.aspect_ratio()));
        renderer.render_frame()?;
        self.input.reset();
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.input.handle_event(&event) {
            if self.input.keyboard.is_just_pressed(KeyCode::Escape) {
                info!("Escape pressed, shutting down");
                event_loop.exit();
            }
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e.context("frame failed"));
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
    }
}

fn run(args: &Args) -> Result<()> {
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    lumen_core::init_logging();
    let args = Args::parse();
    info!("Starting lumen");

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            eprintln!("lumen: {e:#}");
            ExitCode::FAILURE
        }
    }
}
