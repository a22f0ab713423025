// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppCfg;
use ember_core::init_tracing;
use ember_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use ember_render::Renderer;
use ember_render_vk::VkRenderer;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; missing means built-in defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
}

struct App {
    cfg: AppCfg,
    // Declared before the window so it is dropped first.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    started: Instant,
    frames: u64,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            cfg,
            renderer: None,
            window: None,
            started: Instant::now(),
            frames: 0,
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = ember_platform::create_window(event_loop, &self.cfg.window_desc())?;
        let size = ember_platform::framebuffer_size(&window);
        let mut renderer = VkRenderer::new(&window, &window, size, &self.cfg.renderer_desc())?;
        for mesh in scene::demo_meshes() {
            renderer.load_mesh(&mesh).context("load demo mesh")?;
        }
        self.started = Instant::now();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };
        let elapsed = self.started.elapsed().as_secs_f32();
        renderer.update_model(scene::spin(elapsed, self.cfg.scene.spin_degrees_per_second));
        renderer.draw()?;
        self.frames += 1;
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.failure = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(Window::id) != Some(window_id) {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                let secs = self.started.elapsed().as_secs_f32();
                info!(
                    "close requested after {} frames ({:.1} fps)",
                    self.frames,
                    self.frames as f32 / secs.max(f32::EPSILON)
                );
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.frame() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = config::load_cfg(&args.config);
    let event_loop = EventLoop::new().context("create event loop")?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app).context("run event loop")?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ember exited with an error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
