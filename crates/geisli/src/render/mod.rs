//! # Render — wgpu Host Driver
//!
//! The host side of the wavefront pipeline. [`GpuContext`] owns the device
//! and (optionally) the window surface; [`WavefrontTracer`] owns every
//! frame buffer and kernel and drives the per-step sequence
//! `process → radix sort → count → scan → scatter`; [`RadixSorter`] is the
//! sort stage; [`ImagePresenter`] tonemaps the accumulator into the shared
//! texture and blits it onto the surface.
//!
//! Kernels live in `shaders/` as WGSL. Every compute module is assembled
//! from three parts: a generated block of tunable constants (the same
//! numbers the Rust side was built with), the shared record layout
//! (`layout.wgsl`), and the kernel family source. Host and device agree on
//! layouts because both are generated from `src/layout.rs`'s constants.

pub mod gpu;
pub mod present;
pub mod sort;
pub mod tracer;

pub use gpu::GpuContext;
pub use present::ImagePresenter;
pub use sort::RadixSorter;
pub use tracer::WavefrontTracer;

use thiserror::Error;

use crate::layout::{MAX_QUEUE_LEN, RADIX_MAX, RADIX_SHIFT, SORT_BLOCK, UNIT_WIDTH};

/// Fatal renderer failures. None of these are retried; `main` reports the
/// message and exits non-zero.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no accelerator platform at index {0}")]
    BadAdapter(usize),

    #[error("no suitable accelerator available")]
    NoAdapter,

    #[error("cannot create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("cannot create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("cannot compile kernel module \"{name}\":\n{log}")]
    KernelCompile { name: &'static str, log: String },

    #[error("cannot allocate buffer \"{0}\"")]
    BufferAlloc(&'static str),

    #[error("cannot read back buffer: {0}")]
    Readback(String),

    #[error("cannot acquire presentation surface: {0}")]
    Acquire(#[from] wgpu::SurfaceError),
}

/// The generated constants block prepended to every kernel module — the
/// WGSL equivalent of the build defines the kernels are written against.
/// `group_chunks` and `block_count` are frame-constant, which lets the scan
/// loops run to compile-time bounds.
pub(crate) fn shader_defines(group_chunks: u32, block_count: u32) -> String {
    format!(
        "const UNIT_WIDTH: u32 = {UNIT_WIDTH}u;\n\
         const SORT_BLOCK: u32 = {SORT_BLOCK}u;\n\
         const RADIX_SHIFT: u32 = {RADIX_SHIFT}u;\n\
         const RADIX_MAX: u32 = {RADIX_MAX}u;\n\
         const MAX_QUEUE_LEN: u32 = {MAX_QUEUE_LEN}u;\n\
         const GROUP_CHUNKS: u32 = {group_chunks}u;\n\
         const BLOCK_COUNT: u32 = {block_count}u;\n",
    )
}

/// Assemble a complete kernel module: defines, shared layout, family source.
pub(crate) fn compose_module(defines: &str, family: &str) -> String {
    let mut module = String::with_capacity(defines.len() + family.len() + 4096);
    module.push_str(defines);
    module.push_str(include_str!("shaders/layout.wgsl"));
    module.push_str(family);
    module
}

// ── Small wgpu descriptor helpers shared by the pipeline stages ─────

pub(crate) fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn uniform_entry(binding: u32, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: wgpu::BufferSize::new(size),
        },
        count: None,
    }
}

pub(crate) fn buffer_entry<'a>(binding: u32, buffer: &'a wgpu::Buffer) -> wgpu::BindGroupEntry<'a> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defines_carry_the_layout_constants() {
        let defines = shader_defines(2, 16);
        assert!(defines.contains("const UNIT_WIDTH: u32 = 256u;"));
        assert!(defines.contains("const GROUP_CHUNKS: u32 = 2u;"));
        assert!(defines.contains("const BLOCK_COUNT: u32 = 16u;"));
    }

    #[test]
    fn composed_module_keeps_the_layout_before_the_family() {
        let module = compose_module(&shader_defines(1, 1), "fn family_marker() {}\n");
        let layout_at = module.find("struct RayState").unwrap();
        let family_at = module.find("family_marker").unwrap();
        assert!(layout_at < family_at);
    }
}
