//! # Radix Sort of the Ray-Index Stream
//!
//! A stable LSD counting sort keyed on the 24-bit group index of each ray's
//! packed id, [`RADIX_SHIFT`] bits per pass. Every pass runs three kernels:
//!
//! ```text
//! local_count   per block: digit histogram + in-block ranks
//! global_count  one unit: exclusive scan of the histogram table
//! shuffle_data  per block: scatter to global destinations
//! ```
//!
//! and ends with a ping-pong swap of the two ray-index buffers. The number
//! of passes is fixed per scene — `ceil(bits(group_count - 1) /
//! RADIX_SHIFT)` — so all per-pass parameters are packed into one uniform
//! buffer up front and selected with a dynamic offset. When the remaining
//! key range fits in a single digit the last pass drops the digit mask and
//! sorts against the whole remaining key.

use bytemuck::{Pod, Zeroable};

use crate::layout::{GROUP_ID_MASK, RADIX_MASK, RADIX_MAX, RADIX_SHIFT};

use super::{buffer_entry, storage_entry, uniform_entry};

/// Host-side parameters of one digit pass, mirrored into the kernels'
/// uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct SortPass {
    pub shift: u32,
    pub mask: u32,
    /// Digit values that can occur this pass; bounds the scan length.
    pub digit_count: u32,
    /// 1 on a final pass whose remaining range fits one digit.
    pub unmasked: u32,
}

/// Plan the digit passes needed to order `group_count` distinct group
/// indices.
pub fn plan_passes(group_count: u32) -> Vec<SortPass> {
    assert!(group_count > 0);
    let mut passes = Vec::new();
    let mut shift = 0;
    let mut mask = GROUP_ID_MASK;
    let mut max = group_count - 1;
    while max != 0 {
        passes.push(SortPass {
            shift,
            mask: mask & RADIX_MASK,
            digit_count: RADIX_MAX.min(max + 1),
            unmasked: u32::from(max < RADIX_MAX),
        });
        shift += RADIX_SHIFT;
        mask >>= RADIX_SHIFT;
        max >>= RADIX_SHIFT;
    }
    passes
}

/// Dynamic-offset stride for one [`SortPass`] in the uniform buffer.
const PASS_STRIDE: u64 = 256;

/// The GPU sort stage: three pipelines, the two bind-group orientations of
/// the ray-index ping-pong, and the per-pass parameter table.
pub struct RadixSorter {
    passes: Vec<SortPass>,
    local_count: wgpu::ComputePipeline,
    global_count: wgpu::ComputePipeline,
    shuffle_data: wgpu::ComputePipeline,
    /// Orientation f reads `ray_index[f]` and scatters into
    /// `ray_index[1 - f]`.
    bind_groups: [wgpu::BindGroup; 2],
    block_count: u32,
}

impl RadixSorter {
    pub fn new(
        device: &wgpu::Device,
        module: &wgpu::ShaderModule,
        ray_index: &[wgpu::Buffer; 2],
        local_index: &wgpu::Buffer,
        global_index: &wgpu::Buffer,
        group_count: u32,
        block_count: u32,
    ) -> Self {
        let passes = plan_passes(group_count);

        // All passes live in one uniform buffer at a dynamic-offset stride.
        let mut table = vec![0u8; passes.len().max(1) * PASS_STRIDE as usize];
        for (i, pass) in passes.iter().enumerate() {
            let at = i * PASS_STRIDE as usize;
            table[at..at + std::mem::size_of::<SortPass>()]
                .copy_from_slice(bytemuck::bytes_of(pass));
        }
        let params = wgpu::util::DeviceExt::create_buffer_init(
            device,
            &wgpu::util::BufferInitDescriptor {
                label: Some("sort_params"),
                contents: &table,
                usage: wgpu::BufferUsages::UNIFORM,
            },
        );

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sort layout"),
            entries: &[
                uniform_entry(0, std::mem::size_of::<SortPass>() as u64),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sort pipeline layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = |entry: &'static str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let bind_group = |f: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("sort bind group"),
                layout: &layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &params,
                            offset: 0,
                            size: wgpu::BufferSize::new(std::mem::size_of::<SortPass>() as u64),
                        }),
                    },
                    buffer_entry(1, &ray_index[f]),
                    buffer_entry(2, &ray_index[1 - f]),
                    buffer_entry(3, local_index),
                    buffer_entry(4, global_index),
                ],
            })
        };

        Self {
            passes,
            local_count: pipeline("local_count"),
            global_count: pipeline("global_count"),
            shuffle_data: pipeline("shuffle_data"),
            bind_groups: [bind_group(0), bind_group(1)],
            block_count,
        }
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Record every digit pass. Each kernel gets its own compute pass so
    /// its writes are visible to the next; `flip` tracks the ray-index
    /// orientation and toggles once per digit pass.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, flip: &mut usize) {
        for (i, _) in self.passes.iter().enumerate() {
            let offset = [(i as u64 * PASS_STRIDE) as u32];
            let stages: [(&wgpu::ComputePipeline, u32); 3] = [
                (&self.local_count, self.block_count),
                (&self.global_count, 1),
                (&self.shuffle_data, self.block_count),
            ];
            for (pipeline, workgroups) in stages {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("radix pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.bind_groups[*flip], &offset);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
            *flip ^= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{RayIndex, SORT_BLOCK, UNIT_WIDTH};

    // ── CPU mirror of the three kernels ─────────────────────────────
    //
    // Same block structure, same digit function, same scan order as the
    // WGSL. The GPU's cross-thread rank scan reduces to sequential
    // in-block order here.

    fn digit_of(key: u32, pass: &SortPass) -> u32 {
        let shifted = (key & GROUP_ID_MASK) >> pass.shift;
        if pass.unmasked != 0 { shifted } else { shifted & pass.mask }
    }

    fn sort_pass(input: &[RayIndex], pass: &SortPass) -> Vec<RayIndex> {
        let block = (UNIT_WIDTH * SORT_BLOCK) as usize;
        assert_eq!(input.len() % block, 0);
        let block_count = input.len() / block;

        let mut local_index = vec![0u32; input.len()];
        let mut global_index = vec![0u32; RADIX_MAX as usize * block_count];
        for b in 0..block_count {
            let mut rank = [0u32; RADIX_MAX as usize];
            for k in 0..block {
                let d = digit_of(input[b * block + k].group.0, pass) as usize;
                local_index[b * block + k] = rank[d];
                rank[d] += 1;
            }
            for (d, &count) in rank.iter().enumerate() {
                global_index[d * block_count + b] = count;
            }
        }

        let mut carry = 0;
        for slot in global_index[..pass.digit_count as usize * block_count].iter_mut() {
            let v = *slot;
            *slot = carry;
            carry += v;
        }

        let mut out = vec![RayIndex { group: crate::layout::GroupId(0), ray: 0 }; input.len()];
        for b in 0..block_count {
            for k in 0..block {
                let i = b * block + k;
                let d = digit_of(input[i].group.0, pass) as usize;
                out[(global_index[d * block_count + b] + local_index[i]) as usize] = input[i];
            }
        }
        out
    }

    fn keys(entries: &[RayIndex]) -> Vec<u32> {
        entries.iter().map(|e| e.group.0 & GROUP_ID_MASK).collect()
    }

    #[test]
    fn three_groups_need_exactly_one_pass() {
        let passes = plan_passes(3);
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].shift, 0);
        assert_eq!(passes[0].digit_count, 3);
        assert_eq!(passes[0].unmasked, 1);
    }

    #[test]
    fn pass_count_is_bits_over_radix_shift() {
        assert_eq!(plan_passes(2).len(), 1);
        assert_eq!(plan_passes(32).len(), 1);
        assert_eq!(plan_passes(33).len(), 2);
        assert_eq!(plan_passes(1024).len(), 2);
        assert_eq!(plan_passes(4096).len(), 3);
        assert_eq!(plan_passes(1 << 24).len(), 5);
    }

    #[test]
    fn only_the_final_pass_elides_the_mask() {
        let passes = plan_passes(4096);
        assert_eq!(
            passes.iter().map(|p| p.unmasked).collect::<Vec<_>>(),
            vec![0, 0, 1],
        );
        // The elided pass still sorts against the whole remaining range.
        assert_eq!(passes[2].digit_count, 4);
    }

    #[test]
    fn sixteen_k_entries_match_a_stable_reference_sort() {
        // xorshift keys in [0, 4095]; the payload records arrival order so
        // stability violations are observable.
        let mut state = 0x9e37_79b9u32;
        let mut entries: Vec<RayIndex> = (0..16384)
            .map(|i| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                RayIndex { group: crate::layout::GroupId(state & 0xFFF), ray: i }
            })
            .collect();

        let mut expected = entries.clone();
        expected.sort_by_key(|e| e.group.0 & GROUP_ID_MASK);

        let passes = plan_passes(4096);
        assert_eq!(passes.len(), 3);
        let mut seen_mask = 0u32;
        for pass in &passes {
            entries = sort_pass(&entries, pass);
            // After each pass the stream is non-decreasing on the digits
            // considered so far.
            seen_mask |= if pass.unmasked != 0 {
                GROUP_ID_MASK & !((1 << pass.shift) - 1)
            } else {
                pass.mask << pass.shift
            };
            for w in keys(&entries).windows(2) {
                assert!(w[0] & seen_mask <= w[1] & seen_mask);
            }
        }
        assert_eq!(entries, expected);
    }

    #[test]
    fn sort_handles_keys_with_kind_bits_set() {
        // Packed ids carry shader/transform bits above the index; they ride
        // along without disturbing the index order.
        let mut entries: Vec<RayIndex> = (0..(UNIT_WIDTH * SORT_BLOCK))
            .map(|i| {
                let idx = (i * 37) % 96;
                RayIndex { group: crate::layout::GroupId(idx | 5 << 28), ray: i }
            })
            .collect();
        let mut expected = entries.clone();
        expected.sort_by_key(|e| e.group.0 & GROUP_ID_MASK);

        for pass in &plan_passes(96) {
            entries = sort_pass(&entries, pass);
        }
        assert_eq!(entries, expected);
    }
}
