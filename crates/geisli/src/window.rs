//! Window management via winit.
//!
//! Implements [`winit::application::ApplicationHandler`] to drive the event
//! loop. The tracer is deliberately not free-running: a mouse click batches
//! a fixed number of wavefront steps, presents the refined image, and logs
//! the ray throughput for the batch. Redraws just re-present the current
//! accumulator.

use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowId};

use crate::render::tracer::DEFAULT_RAY_COUNT;
use crate::render::{GpuContext, ImagePresenter, RenderError, WavefrontTracer};
use crate::scene::SceneData;

/// Rendered resolution; the window is fixed to it.
pub const WIDTH: u32 = 1024;
pub const HEIGHT: u32 = 1024;

/// Wavefront steps per mouse click.
const STEPS_PER_CLICK: u32 = 32;

/// The application state that winit drives.
pub struct App {
    adapter_index: usize,
    /// Taken when the window first resumes and the device comes up.
    scene: Option<SceneData>,
    window: Option<Arc<Window>>,
    state: Option<RenderState>,
    failed: bool,
}

struct RenderState {
    gpu: GpuContext,
    tracer: WavefrontTracer,
    presenter: ImagePresenter,
    pixels_done: u32,
}

impl App {
    pub fn new(adapter_index: usize, scene: SceneData) -> Self {
        Self {
            adapter_index,
            scene: Some(scene),
            window: None,
            state: None,
            failed: false,
        }
    }

    /// True when the loop exited because of a device failure.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: RenderError) {
        log::error!("{err}");
        self.failed = true;
        event_loop.exit();
    }
}

impl RenderState {
    fn new(
        window: Arc<Window>,
        adapter_index: usize,
        scene: &SceneData,
    ) -> Result<Self, RenderError> {
        let gpu = GpuContext::new(window, adapter_index)?;
        let mut tracer = WavefrontTracer::new(&gpu, scene, DEFAULT_RAY_COUNT)?;
        let presenter = ImagePresenter::new(&gpu, &tracer, WIDTH, HEIGHT)?;
        tracer.init_frame(&gpu);
        presenter.draw_frame(&gpu)?;
        log::info!("ready; click the window to trace");
        Ok(Self { gpu, tracer, presenter, pixels_done: 0 })
    }

    /// Run one click's worth of steps and present the result. Returns the
    /// batch throughput line.
    fn trace_batch(&mut self) -> Result<String, RenderError> {
        let start = Instant::now();
        for _ in 0..STEPS_PER_CLICK {
            self.tracer.make_step(&self.gpu);
        }
        self.presenter.draw_frame(&self.gpu)?;

        let done = self.tracer.pixel_progress(&self.gpu)?;
        let delta = start.elapsed().as_secs_f64();
        let rays = done - self.pixels_done;
        self.pixels_done = done;
        Ok(format!(
            "frame ready in {delta:.3} s, {rays} rays, {:.3} MR/s",
            rays as f64 * 1e-6 / delta,
        ))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title("geisli")
            .with_inner_size(winit::dpi::PhysicalSize::new(WIDTH, HEIGHT))
            .with_resizable(false);
        let window = Arc::new(
            event_loop
                .create_window(attrs)
                .expect("Failed to create window"),
        );
        self.window = Some(window.clone());

        let scene = self.scene.take().expect("scene consumed twice");
        match RenderState::new(window, self.adapter_index, &scene) {
            Ok(state) => self.state = Some(state),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("window close requested, exiting");
                event_loop.exit();
            }

            WindowEvent::MouseInput { state: ElementState::Pressed, .. } => {
                match self.state.as_mut().map(RenderState::trace_batch) {
                    Some(Ok(line)) => log::info!("{line}"),
                    Some(Err(err)) => self.fail(event_loop, err),
                    None => {}
                }
            }

            WindowEvent::RedrawRequested => {
                let drawn = self
                    .state
                    .as_ref()
                    .map(|state| state.presenter.draw_frame(&state.gpu));
                if let Some(Err(err)) = drawn {
                    self.fail(event_loop, err);
                }
            }

            _ => {}
        }
    }
}
