//! # Wavefront Tracer — Per-Frame Host Driver
//!
//! Owns every device buffer and kernel of the pipeline and issues the
//! per-frame dispatch sequence:
//!
//! ```text
//! init_frame:  init_groups → init_rays → init_image          (once)
//! make_step:   process → radix sort → count_groups
//!                → update_groups → set_ray_index              (repeat)
//! ```
//!
//! The two ray-index buffers ping-pong: the sort swaps them once per digit
//! pass and `set_ray_index` swaps them once more, tracked by a single
//! orientation integer. All inter-kernel ordering comes from the in-order
//! queue — the host only blocks on explicit readbacks.

use bytemuck::Pod;

use crate::layout::{
    GlobalData, GroupData, RADIX_MAX, RayIndex, RayState, SORT_BLOCK, UNIT_WIDTH, align_up,
};
use crate::scene::SceneData;

use super::{
    GpuContext, RadixSorter, RenderError, buffer_entry, compose_module, shader_defines,
    storage_entry,
};

/// Default rays in flight, before alignment.
pub const DEFAULT_RAY_COUNT: u32 = 1 << 20;

pub struct WavefrontTracer {
    ray_count: u32,
    group_count: u32,
    area_size: u32,
    /// Orientation of the ray-index ping-pong: `ray_index[flip]` is the
    /// current input.
    flip: usize,

    global: wgpu::Buffer,
    area: wgpu::Buffer,
    grp_data: wgpu::Buffer,
    ray_index: [wgpu::Buffer; 2],

    init_groups: wgpu::ComputePipeline,
    init_rays: wgpu::ComputePipeline,
    init_image: wgpu::ComputePipeline,
    process: wgpu::ComputePipeline,
    count_groups: wgpu::ComputePipeline,
    update_groups: wgpu::ComputePipeline,
    set_ray_index: wgpu::ComputePipeline,

    /// Frame bindings in both ping-pong orientations.
    frame_groups: [wgpu::BindGroup; 2],
    scene_group: wgpu::BindGroup,
    sorter: RadixSorter,
}

impl WavefrontTracer {
    pub fn new(
        gpu: &GpuContext,
        scene: &SceneData,
        ray_count_hint: u32,
    ) -> Result<Self, RenderError> {
        let device = &gpu.device;
        let sort_unit = UNIT_WIDTH * SORT_BLOCK;
        let ray_count = align_up(ray_count_hint.max(1), sort_unit);
        let block_count = ray_count / sort_unit;
        let group_count = scene.global.group_count;
        assert_eq!(group_count % UNIT_WIDTH, 0);
        let area_size = scene.global.pixel_count;

        let mut global = scene.global;
        global.ray_count = ray_count;
        // The batch laid down by init_rays is the first spawn generation;
        // its pixels are handed out before any group scan runs.
        global.pixel_offset = ray_count.min(global.pixel_count);
        log::info!(
            "tracer: {ray_count} rays, {group_count} groups, {block_count} sort blocks",
        );

        let defines = shader_defines(group_count / UNIT_WIDTH, block_count);
        let trace_module = create_module(
            device,
            "trace",
            &compose_module(&defines, include_str!("shaders/trace.wgsl")),
        )?;
        let sort_module = create_module(
            device,
            "sort",
            &compose_module(&defines, include_str!("shaders/sort.wgsl")),
        )?;

        // ── Buffers ─────────────────────────────────────────────────

        let storage = wgpu::BufferUsages::STORAGE;
        let readable = storage | wgpu::BufferUsages::COPY_SRC;

        let global_buf = init_buffer(device, "global", &[global], readable)?;
        let area = create_buffer(device, "area", area_size as u64 * 16, readable)?;
        let ray_list = create_buffer(
            device,
            "ray_list",
            ray_count as u64 * std::mem::size_of::<RayState>() as u64,
            storage,
        )?;
        let grp_data = create_buffer(
            device,
            "grp_data",
            group_count as u64 * std::mem::size_of::<GroupData>() as u64,
            readable,
        )?;
        let ray_index = [
            create_buffer(device, "ray_index[0]", ray_count as u64 * 8, readable)?,
            create_buffer(device, "ray_index[1]", ray_count as u64 * 8, readable)?,
        ];
        let grp_list = init_buffer(device, "grp_list", &scene.groups, storage)?;
        let mat_list = init_buffer(device, "mat_list", &scene.matrices, storage)?;
        let aabb_list = init_buffer(device, "aabb_list", &scene.aabbs, storage)?;
        let vtx_list = init_buffer(device, "vtx_list", &scene.vertices, storage)?;
        let tri_list = init_buffer(device, "tri_list", &scene.triangles, storage)?;
        let local_index = create_buffer(device, "local_index", ray_count as u64 * 4, storage)?;
        let global_index = create_buffer(
            device,
            "global_index",
            block_count as u64 * RADIX_MAX as u64 * 4,
            storage,
        )?;

        // ── Bind groups ─────────────────────────────────────────────

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
            ],
        });
        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
            ],
        });

        let frame_group = |f: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("frame bind group"),
                layout: &frame_layout,
                entries: &[
                    buffer_entry(0, &global_buf),
                    buffer_entry(1, &area),
                    buffer_entry(2, &ray_list),
                    buffer_entry(3, &grp_data),
                    buffer_entry(4, &ray_index[f]),
                    buffer_entry(5, &ray_index[1 - f]),
                ],
            })
        };
        let frame_groups = [frame_group(0), frame_group(1)];
        let scene_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene bind group"),
            layout: &scene_layout,
            entries: &[
                buffer_entry(0, &grp_list),
                buffer_entry(1, &mat_list),
                buffer_entry(2, &aabb_list),
                buffer_entry(3, &vtx_list),
                buffer_entry(4, &tri_list),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("trace pipeline layout"),
            bind_group_layouts: &[&frame_layout, &scene_layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry_point: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &trace_module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let sorter = RadixSorter::new(
            device,
            &sort_module,
            &ray_index,
            &local_index,
            &global_index,
            group_count,
            block_count,
        );
        log::debug!("radix sort: {} digit passes per step", sorter.pass_count());

        Ok(Self {
            ray_count,
            group_count,
            area_size,
            flip: 0,
            global: global_buf,
            area,
            grp_data,
            ray_index,
            init_groups: pipeline("init_groups"),
            init_rays: pipeline("init_rays"),
            init_image: pipeline("init_image"),
            process: pipeline("process"),
            count_groups: pipeline("count_groups"),
            update_groups: pipeline("update_groups"),
            set_ray_index: pipeline("set_ray_index"),
            frame_groups,
            scene_group,
            sorter,
        })
    }

    pub fn ray_count(&self) -> u32 {
        self.ray_count
    }

    pub fn sort_pass_count(&self) -> usize {
        self.sorter.pass_count()
    }

    pub fn global_buffer(&self) -> &wgpu::Buffer {
        &self.global
    }

    pub fn area_buffer(&self) -> &wgpu::Buffer {
        &self.area
    }

    /// Reset the group tables, the ray list, and the accumulator.
    pub fn init_frame(&mut self, gpu: &GpuContext) {
        self.flip = 0;
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("init frame"),
            });
        self.dispatch(&mut encoder, &self.init_groups, self.group_count);
        self.dispatch(&mut encoder, &self.init_rays, self.ray_count);
        self.dispatch(&mut encoder, &self.init_image, self.area_size);
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// One wavefront step: shade every ray, re-sort the stream by its new
    /// group ids, and rebuild the group tables for the next step.
    pub fn make_step(&mut self, gpu: &GpuContext) {
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("wavefront step"),
            });
        self.dispatch(&mut encoder, &self.process, self.ray_count);
        self.sorter.encode(&mut encoder, &mut self.flip);
        self.dispatch(&mut encoder, &self.count_groups, self.ray_count);
        self.dispatch(&mut encoder, &self.update_groups, UNIT_WIDTH);
        self.dispatch(&mut encoder, &self.set_ray_index, self.ray_count);
        self.flip ^= 1;
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// One kernel in its own compute pass, so its writes are visible to
    /// whatever runs next.
    fn dispatch(&self, encoder: &mut wgpu::CommandEncoder, pipeline: &wgpu::ComputePipeline, items: u32) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.frame_groups[self.flip], &[]);
        pass.set_bind_group(1, &self.scene_group, &[]);
        pass.dispatch_workgroups(items.div_ceil(UNIT_WIDTH), 1, 1);
    }

    // ── Readbacks ───────────────────────────────────────────────────
    //
    // Blocking, and only for the frame-batch log line, tests, and
    // debugging. The hot path never waits on the device.

    /// Number of pixels handed out so far.
    pub fn pixel_progress(&self, gpu: &GpuContext) -> Result<u32, RenderError> {
        Ok(self.read_global(gpu)?.pixel_offset)
    }

    pub fn read_global(&self, gpu: &GpuContext) -> Result<GlobalData, RenderError> {
        Ok(read_buffer::<GlobalData>(gpu, &self.global, 1)?[0])
    }

    pub fn read_group_data(&self, gpu: &GpuContext) -> Result<Vec<GroupData>, RenderError> {
        read_buffer(gpu, &self.grp_data, self.group_count as usize)
    }

    /// The current ray-index stream, in its live orientation.
    pub fn read_ray_index(&self, gpu: &GpuContext) -> Result<Vec<RayIndex>, RenderError> {
        read_buffer(gpu, &self.ray_index[self.flip], self.ray_count as usize)
    }

    /// The per-pixel accumulator (RGB sums + sample count).
    pub fn read_accumulator(&self, gpu: &GpuContext) -> Result<Vec<[f32; 4]>, RenderError> {
        read_buffer(gpu, &self.area, self.area_size as usize)
    }
}

// ── Device helpers ──────────────────────────────────────────────────

pub(crate) fn create_module(
    device: &wgpu::Device,
    name: &'static str,
    source: &str,
) -> Result<wgpu::ShaderModule, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(name),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(module),
        Some(err) => Err(RenderError::KernelCompile { name, log: err.to_string() }),
    }
}

fn create_buffer(
    device: &wgpu::Device,
    name: &'static str,
    size: u64,
    usage: wgpu::BufferUsages,
) -> Result<wgpu::Buffer, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(name),
        size,
        usage,
        mapped_at_creation: false,
    });
    match pollster::block_on(device.pop_error_scope()) {
        None => {
            log::debug!("buffer \"{name}\": {size} bytes");
            Ok(buffer)
        }
        Some(_) => Err(RenderError::BufferAlloc(name)),
    }
}

fn init_buffer<T: Pod>(
    device: &wgpu::Device,
    name: &'static str,
    contents: &[T],
    usage: wgpu::BufferUsages,
) -> Result<wgpu::Buffer, RenderError> {
    use wgpu::util::DeviceExt;
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(name),
        contents: bytemuck::cast_slice(contents),
        usage,
    });
    match pollster::block_on(device.pop_error_scope()) {
        None => Ok(buffer),
        Some(_) => Err(RenderError::BufferAlloc(name)),
    }
}

/// Blocking readback of `count` records from the head of `buffer`.
fn read_buffer<T: Pod>(
    gpu: &GpuContext,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, RenderError> {
    let size = (count * std::mem::size_of::<T>()) as u64;
    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    gpu.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    gpu.device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|err| RenderError::Readback(err.to_string()))?;
    rx.recv()
        .map_err(|_| RenderError::Readback("map callback dropped".into()))?
        .map_err(|err| RenderError::Readback(err.to_string()))?;

    let view = slice.get_mapped_range();
    let data = bytemuck::cast_slice(&view).to_vec();
    drop(view);
    staging.unmap();
    Ok(data)
}

#[cfg(test)]
mod tests {
    use crate::layout::{GROUP_ID_MASK, GroupId, RayIndex};

    // CPU mirror of count_groups / update_groups / set_ray_index over a
    // synthetic sorted stream, checking the conservation and cursor
    // invariants the kernels rely on.

    struct MirrorRow {
        base: [u32; 2],
        count: [u32; 2],
        offset: [u32; 2],
    }

    fn mirror_step(
        entries: &[RayIndex],
        kinds: &[u32],
        group_count: usize,
    ) -> (Vec<MirrorRow>, Vec<RayIndex>) {
        let mut rows: Vec<MirrorRow> = (0..group_count)
            .map(|_| MirrorRow { base: [0; 2], count: [0; 2], offset: [0; 2] })
            .collect();

        // count_groups
        for e in entries {
            rows[(e.group.0 & GROUP_ID_MASK) as usize].count[kinds[e.ray as usize] as usize] += 1;
        }
        // update_groups
        let mut carry = 0;
        for row in &mut rows {
            row.base = [carry, carry + row.count[0]];
            row.offset = row.base;
            carry += row.count[0] + row.count[1];
        }
        // set_ray_index
        let mut out = vec![RayIndex { group: GroupId(0), ray: u32::MAX }; entries.len()];
        for e in entries {
            let row = &mut rows[(e.group.0 & GROUP_ID_MASK) as usize];
            let lane = kinds[e.ray as usize] as usize;
            out[row.offset[lane] as usize] = *e;
            row.offset[lane] += 1;
        }
        (rows, out)
    }

    #[test]
    fn counts_conserve_rays_and_cursors_land_on_base_plus_count() {
        let group_count = 16;
        let mut state = 0xdead_beefu32;
        let mut rand = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        let kinds: Vec<u32> = (0..4096).map(|_| rand() % 2).collect();
        let mut entries: Vec<RayIndex> = (0..4096)
            .map(|i| RayIndex { group: GroupId(rand() % group_count as u32), ray: i })
            .collect();
        entries.sort_by_key(|e| e.group.0);

        let (rows, out) = mirror_step(&entries, &kinds, group_count);

        let total: u32 = rows.iter().map(|r| r.count[0] + r.count[1]).sum();
        assert_eq!(total as usize, entries.len());
        for row in &rows {
            assert_eq!(row.offset[0], row.base[0] + row.count[0]);
            assert_eq!(row.offset[1], row.base[1] + row.count[1]);
        }

        // Placement is dense and grouped: primaries at base[0], shadows at
        // base[1], groups back to back.
        assert!(out.iter().all(|e| e.ray != u32::MAX));
        for w in out.windows(2) {
            assert!(w[0].group.0 & GROUP_ID_MASK <= w[1].group.0 & GROUP_ID_MASK);
        }
    }
}
