//! # Geisli — Wavefront Path Tracer
//!
//! A GPU path tracer that keeps rays as first-class records in device memory
//! instead of recursing on the stack. Every ray carries the id of the scene
//! node it needs to consult next; each step the ray stream is radix-sorted by
//! that id so that a single compute dispatch touches exactly one node kind per
//! wavefront. Divergent control flow becomes coherent batches, divergent
//! memory access becomes streams.
//!
//! The crate splits into three layers:
//!
//! - [`layout`] and [`math`] — the device-visible data model (packed group
//!   ids, node records, ray records) and the small host-side geometry kit.
//! - [`model`] — the mesh preprocessor: PLY loading, normal generation, the
//!   median-axis triangle BVH, and the two-phase resource arena that packs
//!   everything into flat device arrays.
//! - [`render`] — the wgpu host driver: buffers, kernels, the per-frame
//!   pipeline (shade → sort → count → scan → scatter), and presentation.
//!
//! The binary wires these together behind a winit window; see `main.rs`.

pub mod layout;
pub mod math;
pub mod model;
pub mod render;
pub mod scene;
pub mod window;
