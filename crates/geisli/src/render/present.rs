//! # Presentation Bridge
//!
//! The accumulator never leaves the device: `update_image` tonemaps it into
//! an RGBA8 texture shared between the compute pipeline (as a write-only
//! storage image) and the blit pipeline (as a sampled texture), and a
//! fullscreen-triangle pass copies that texture onto the acquired surface
//! frame. Acquire → tonemap → blit → present brackets the frame; the
//! surface itself is owned by exactly one side at a time.

use crate::layout::UNIT_WIDTH;

use super::tracer::WavefrontTracer;
use super::{GpuContext, RenderError, buffer_entry, compose_module, shader_defines, storage_entry};

pub struct ImagePresenter {
    pixel_count: u32,
    update_image: wgpu::ComputePipeline,
    update_group: wgpu::BindGroup,
    blit: wgpu::RenderPipeline,
    blit_group: wgpu::BindGroup,
}

impl ImagePresenter {
    pub fn new(
        gpu: &GpuContext,
        tracer: &WavefrontTracer,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let device = &gpu.device;

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shared image"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Tonemap pipeline. Only UNIT_WIDTH from the defines block appears
        // in this module.
        let module = super::tracer::create_module(
            device,
            "image",
            &compose_module(&shader_defines(1, 1), include_str!("shaders/image.wgsl")),
        )?;
        let update_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("image layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
            ],
        });
        let update_image = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("update_image"),
            layout: Some(&device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("image pipeline layout"),
                bind_group_layouts: &[&update_layout],
                push_constant_ranges: &[],
            })),
            module: &module,
            entry_point: Some("update_image"),
            compilation_options: Default::default(),
            cache: None,
        });
        let update_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("image bind group"),
            layout: &update_layout,
            entries: &[
                buffer_entry(0, tracer.global_buffer()),
                buffer_entry(1, tracer.area_buffer()),
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
            ],
        });

        // Blit pipeline onto the surface.
        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/blit.wgsl").into()),
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let blit = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("blit pipeline layout"),
                bind_group_layouts: &[&blit_layout],
                push_constant_ranges: &[],
            })),
            vertex: wgpu::VertexState {
                module: &blit_module,
                entry_point: Some("vs_blit"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &blit_module,
                entry_point: Some("fs_blit"),
                compilation_options: Default::default(),
                targets: &[Some(gpu.surface_format().into())],
            }),
            multiview: None,
            cache: None,
        });
        let blit_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit bind group"),
            layout: &blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        Ok(Self {
            pixel_count: width * height,
            update_image,
            update_group,
            blit,
            blit_group,
        })
    }

    /// Tonemap the accumulator and present it.
    pub fn draw_frame(&self, gpu: &GpuContext) -> Result<(), RenderError> {
        let surface = gpu.surface.as_ref().expect("windowed context");
        let frame = surface.get_current_texture()?;
        let target = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("draw frame"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("update_image"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.update_image);
            pass.set_bind_group(0, &self.update_group, &[]);
            pass.dispatch_workgroups(self.pixel_count.div_ceil(UNIT_WIDTH), 1, 1);
        }
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.blit);
            pass.set_bind_group(0, &self.blit_group, &[]);
            pass.draw(0..3, 0..1);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}
