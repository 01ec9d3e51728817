//! GPU context — wgpu instance, adapter selection, device, queue, and the
//! optional window surface.
//!
//! Adapter selection mirrors the CLI contract: the user picks an index into
//! the enumerated adapter list (platform 0, 1, ...). A [`headless`]
//! context skips the surface entirely — the whole tracing pipeline runs on
//! buffers and only presentation needs a window.
//!
//! [`headless`]: GpuContext::headless

use std::sync::Arc;

use super::RenderError;

/// Wraps the wgpu device, queue, and (when windowed) surface state.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub surface: Option<wgpu::Surface<'static>>,
    pub surface_config: Option<wgpu::SurfaceConfiguration>,
}

impl GpuContext {
    /// Enumerate the available accelerator platforms, one line per adapter.
    pub fn list_adapters() -> Vec<String> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        instance
            .enumerate_adapters(wgpu::Backends::all())
            .iter()
            .map(|adapter| {
                let info = adapter.get_info();
                format!("{} ({:?}, {:?})", info.name, info.backend, info.device_type)
            })
            .collect()
    }

    /// Create a windowed context on the adapter at `adapter_index`.
    pub fn new(
        window: Arc<winit::window::Window>,
        adapter_index: usize,
    ) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance.create_surface(window)?;

        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let adapter = adapters
            .get(adapter_index)
            .ok_or(RenderError::BadAdapter(adapter_index))?;
        if !adapter.is_surface_supported(&surface) {
            return Err(RenderError::BadAdapter(adapter_index));
        }
        log::info!("using adapter {}: {}", adapter_index, adapter.get_info().name);

        let (device, queue) = request_device(adapter)?;

        let caps = surface.get_capabilities(adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(caps.formats[0]);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        Ok(Self {
            device,
            queue,
            surface: Some(surface),
            surface_config: Some(surface_config),
        })
    }

    /// Create a surface-less context. With `adapter_index` unset, any
    /// suitable adapter is accepted.
    pub fn headless(adapter_index: Option<usize>) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let adapter = match adapter_index {
            Some(index) => adapters.get(index).ok_or(RenderError::BadAdapter(index))?,
            None => adapters.first().ok_or(RenderError::NoAdapter)?,
        };
        log::debug!("headless adapter: {}", adapter.get_info().name);
        let (device, queue) = request_device(adapter)?;
        Ok(Self {
            device,
            queue,
            surface: None,
            surface_config: None,
        })
    }

    /// The configured surface format. Panics without a surface.
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.as_ref().expect("windowed context").format
    }

    /// Resize the surface (call when the window is resized).
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let (Some(surface), Some(config)) = (&self.surface, &mut self.surface_config) {
            config.width = width;
            config.height = height;
            surface.configure(&self.device, config);
        }
    }
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), RenderError> {
    // The ray list alone can outgrow the downlevel defaults, so ask for
    // whatever the adapter actually supports.
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("geisli device"),
        required_features: wgpu::Features::empty(),
        required_limits: adapter.limits(),
        ..Default::default()
    }))?;
    // Dispatch failures are fatal; make sure they reach the log before the
    // process dies.
    device.on_uncaptured_error(std::sync::Arc::new(|err| {
        log::error!("device error: {err}");
    }));
    Ok((device, queue))
}
