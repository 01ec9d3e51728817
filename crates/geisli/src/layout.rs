//! # Layout — Device-Visible Data Model
//!
//! Everything the kernels see lives in flat storage buffers whose element
//! types are declared here, byte-for-byte identical to their WGSL
//! counterparts in `render/shaders/layout.wgsl`. All records are `#[repr(C)]`
//! + [`bytemuck::Pod`] so upload is a single cast.
//!
//! ## The packed group id
//!
//! A scene node ("group") is addressed by a single 32-bit key:
//!
//! ```text
//!  31      28 27      24 23                               0
//! ┌──────────┬──────────┬──────────────────────────────────┐
//! │ shader   │ transform│            group index           │
//! │ kind     │ kind     │          (into grp_list)         │
//! └──────────┴──────────┴──────────────────────────────────┘
//! ```
//!
//! The same key is the radix-sort key for the ray stream, so ordering by it
//! clusters rays by shader kind first, then transform kind, then node. The
//! shader kind is also the *only* discriminant for the [`Group`] payload —
//! the record itself is an untagged 16-byte union, exactly as the device
//! reads it.

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Vec3};

// ── Tunables ────────────────────────────────────────────────────────

/// SIMT lanes per hardware wavefront. Device ray counts stay a multiple of
/// this.
pub const WARP_WIDTH: u32 = 32;

/// Work-group size for every kernel dispatch. Group counts stay a multiple
/// of this.
pub const UNIT_WIDTH: u32 = 256;

/// Elements each sort work-group handles per radix pass, in units of
/// `UNIT_WIDTH`.
pub const SORT_BLOCK: u32 = 16;

/// Bits consumed per radix-sort pass.
pub const RADIX_SHIFT: u32 = 5;
/// Number of digit bins per pass.
pub const RADIX_MAX: u32 = 1 << RADIX_SHIFT;
/// Mask selecting one digit.
pub const RADIX_MASK: u32 = RADIX_MAX - 1;

/// Capacity of the per-ray queue of deferred AABB hits. When a traversal
/// step finds more child hits than fit, the farthest are dropped and the ray
/// shades against what it has — the queue never spills to memory.
pub const MAX_QUEUE_LEN: usize = 64;

// ── Packed group identifier ─────────────────────────────────────────

/// Bits [0..24): group index.
pub const GROUP_ID_MASK: u32 = 0x00FF_FFFF;
/// Shift/width of the transform-kind field.
pub const GROUP_TR_SHIFT: u32 = 24;
pub const GROUP_TR_MASK: u32 = 0xF;
/// Shift/width of the shader-kind field.
pub const GROUP_SH_SHIFT: u32 = 28;
pub const GROUP_SH_MASK: u32 = 0xF;

/// How a group's geometry is positioned relative to its parent.
///
/// The kind selects the code path the kernels use to move a ray into group
/// space: `Identity` skips the transform entirely, `Ortho` inverts by
/// transpose, `Affine` pays for a full inverse. `None` is for groups with no
/// geometry at all (spawn, sky, light, material).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TransformKind {
    None = 0,
    Identity = 1,
    Ortho = 2,
    Affine = 3,
}

/// Which kernel arm handles rays arriving at a group. Doubles as the active
/// arm of the [`Group`] union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShaderKind {
    /// Manufactures primary rays from the camera.
    Spawn = 0,
    /// Terminal miss shader.
    Sky = 1,
    /// Terminal emitter shader.
    Light = 2,
    /// Surface response; spawns the next bounce.
    Material = 3,
    /// Tests children boxes, queues hits.
    Aabb = 4,
    /// Intersects packed triangles.
    Mesh = 5,
}

impl TransformKind {
    fn from_bits(bits: u32) -> Self {
        match bits & GROUP_TR_MASK {
            0 => Self::None,
            1 => Self::Identity,
            2 => Self::Ortho,
            _ => Self::Affine,
        }
    }
}

impl ShaderKind {
    fn from_bits(bits: u32) -> Self {
        match bits & GROUP_SH_MASK {
            0 => Self::Spawn,
            1 => Self::Sky,
            2 => Self::Light,
            3 => Self::Material,
            4 => Self::Aabb,
            _ => Self::Mesh,
        }
    }
}

/// The packed 32-bit group identifier: node address and sort key in one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Pack an index and its transform/shader kinds.
    ///
    /// `index` must fit in 24 bits.
    pub fn pack(index: u32, transform: TransformKind, shader: ShaderKind) -> Self {
        debug_assert!(index <= GROUP_ID_MASK);
        Self(index | (transform as u32) << GROUP_TR_SHIFT | (shader as u32) << GROUP_SH_SHIFT)
    }

    /// The group-table index (bits 0..24).
    pub fn index(self) -> u32 {
        self.0 & GROUP_ID_MASK
    }

    pub fn transform(self) -> TransformKind {
        TransformKind::from_bits(self.0 >> GROUP_TR_SHIFT)
    }

    pub fn shader(self) -> ShaderKind {
        ShaderKind::from_bits(self.0 >> GROUP_SH_SHIFT)
    }
}

/// Group 0: every ray starts here and returns here when it retires.
pub const SPAWN_GROUP: GroupId = GroupId(0);
/// Group 1: terminal miss.
pub const SKY_GROUP: GroupId = GroupId(1 | (ShaderKind::Sky as u32) << GROUP_SH_SHIFT);
/// Group 2: terminal emitter.
pub const LIGHT_GROUP: GroupId = GroupId(2 | (ShaderKind::Light as u32) << GROUP_SH_SHIFT);

/// Number of group slots taken by the predefined groups above.
pub const PREDEFINED_GROUPS: u32 = 3;

// ── Node records ────────────────────────────────────────────────────

/// Flag on an AABB group: children overwrite lane 0 of the ray's local id
/// with their own `local_id` (per-instance matrix index).
pub const AABB_LOCAL0: u32 = 1;
/// Flag on an AABB group: children overwrite lane 1 of the ray's local id.
pub const AABB_LOCAL1: u32 = 2;

/// One slot of the group table: a 16-byte untagged union.
///
/// Which arm is valid is decided by the [`ShaderKind`] in the group's packed
/// id, never by the record itself. Constructors build an arm, accessors read
/// one; reading the wrong arm is a logic error the type can't catch (the
/// device certainly won't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct Group {
    words: [u32; 4],
}

impl Group {
    /// Material arm: RGB color, alpha = specular intensity.
    pub fn material(color: [f32; 4]) -> Self {
        Self {
            words: color.map(f32::to_bits),
        }
    }

    /// AABB-list arm: `aabb_count` children starting at `aabb_offs` in the
    /// global AABB table, plus `AABB_LOCAL*` flags.
    pub fn aabb_list(aabb_offs: u32, aabb_count: u32, flags: u32) -> Self {
        Self {
            words: [aabb_offs, aabb_count, flags, 0],
        }
    }

    /// Mesh arm: a block of `tri_count` packed triangles at `tri_offs`,
    /// indexing vertices at `vtx_offs`, shaded by the material group
    /// `material_id`.
    pub fn mesh(vtx_offs: u32, tri_offs: u32, tri_count: u32, material_id: GroupId) -> Self {
        Self {
            words: [vtx_offs, tri_offs, tri_count, material_id.0],
        }
    }

    pub fn material_color(&self) -> [f32; 4] {
        self.words.map(f32::from_bits)
    }

    pub fn aabb_offs(&self) -> u32 {
        self.words[0]
    }

    pub fn aabb_count(&self) -> u32 {
        self.words[1]
    }

    pub fn aabb_flags(&self) -> u32 {
        self.words[2]
    }

    pub fn vtx_offs(&self) -> u32 {
        self.words[0]
    }

    pub fn tri_offs(&self) -> u32 {
        self.words[1]
    }

    pub fn tri_count(&self) -> u32 {
        self.words[2]
    }

    pub fn material_id(&self) -> GroupId {
        GroupId(self.words[3])
    }
}

/// A bounding box in the global AABB table.
///
/// Laid out as two float4s whose fourth lanes carry the child's packed id
/// and its 32-bit local id. The intersection kernel loads each half with one
/// 4-wide read and gets the recursion metadata for free; only the first
/// three lanes of each half take part in the slab test.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: [f32; 3],
    pub group_id: GroupId,
    pub max: [f32; 3],
    pub local_id: u32,
}

impl Aabb {
    /// Build an entry from host-side bounds.
    pub fn new(min: Vec3, max: Vec3, group_id: GroupId, local_id: u32) -> Self {
        Self {
            min: min.to_array(),
            group_id,
            max: max.to_array(),
            local_id,
        }
    }
}

/// A mesh vertex: position and normal, each padded to a float4 slot.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GpuVertex {
    pub pos: [f32; 3],
    pub _pad0: f32,
    pub norm: [f32; 3],
    pub _pad1: f32,
}

impl GpuVertex {
    pub fn new(pos: Vec3, norm: Vec3) -> Self {
        Self {
            pos: pos.to_array(),
            _pad0: 0.0,
            norm: norm.to_array(),
            _pad1: 0.0,
        }
    }
}

/// Width of one local vertex index inside a packed triangle word.
pub const TRI_INDEX_BITS: u32 = 10;
/// Exclusive upper bound on vertices per mesh block.
pub const MAX_BLOCK_VERTICES: u32 = 1 << TRI_INDEX_BITS;

/// Pack three block-local vertex indices into one triangle word.
///
/// Each index must be below [`MAX_BLOCK_VERTICES`]; the subdivision step
/// guarantees this by splitting blocks before they grow that many vertices.
pub fn pack_triangle(i0: u32, i1: u32, i2: u32) -> u32 {
    debug_assert!(i0 < MAX_BLOCK_VERTICES && i1 < MAX_BLOCK_VERTICES && i2 < MAX_BLOCK_VERTICES);
    i0 | i1 << TRI_INDEX_BITS | i2 << (2 * TRI_INDEX_BITS)
}

/// Unpack a triangle word into its three local indices.
pub fn unpack_triangle(word: u32) -> [u32; 3] {
    [
        word & (MAX_BLOCK_VERTICES - 1),
        word >> TRI_INDEX_BITS & (MAX_BLOCK_VERTICES - 1),
        word >> (2 * TRI_INDEX_BITS) & (MAX_BLOCK_VERTICES - 1),
    ]
}

/// A 3×4 row-major affine matrix: rotation/scale in the 3×3, translation in
/// column 3. One per instance in `mat_list`.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Matrix {
    pub x: [f32; 4],
    pub y: [f32; 4],
    pub z: [f32; 4],
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        x: [1.0, 0.0, 0.0, 0.0],
        y: [0.0, 1.0, 0.0, 0.0],
        z: [0.0, 0.0, 1.0, 0.0],
    };

    /// Convert from glam's column-major affine representation.
    pub fn from_affine(mat: &Affine3A) -> Self {
        let m = mat.matrix3;
        let t = mat.translation;
        Self {
            x: [m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x],
            y: [m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y],
            z: [m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z],
        }
    }
}

// ── Global scene data ───────────────────────────────────────────────

/// Camera basis uploaded once per frame-size.
///
/// `top_left + x * dx + y * dy` is the unnormalized direction through pixel
/// (x, y). `root_group`/`root_local` name the scene node primary rays enter.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Camera {
    eye: [f32; 3],
    _pad0: f32,
    top_left: [f32; 3],
    _pad1: f32,
    dx: [f32; 3],
    _pad2: f32,
    dy: [f32; 3],
    _pad3: f32,
    pub width: u32,
    pub height: u32,
    pub root_group: GroupId,
    pub root_local: u32,
}

impl Camera {
    pub fn new(eye: Vec3, top_left: Vec3, dx: Vec3, dy: Vec3, width: u32, height: u32) -> Self {
        Self {
            eye: eye.to_array(),
            _pad0: 0.0,
            top_left: top_left.to_array(),
            _pad1: 0.0,
            dx: dx.to_array(),
            _pad2: 0.0,
            dy: dy.to_array(),
            _pad3: 0.0,
            width,
            height,
            root_group: SKY_GROUP,
            root_local: 0,
        }
    }

    /// Point primary rays at a scene node.
    pub fn with_root(mut self, root_group: GroupId, root_local: u32) -> Self {
        self.root_group = root_group;
        self.root_local = root_local;
        self
    }

    pub fn eye(&self) -> [f32; 3] {
        self.eye
    }

    pub fn top_left(&self) -> [f32; 3] {
        self.top_left
    }

    pub fn dx(&self) -> [f32; 3] {
        self.dx
    }

    pub fn dy(&self) -> [f32; 3] {
        self.dy
    }
}

/// The global state block, slot 0 of the `global` buffer.
///
/// `pixel_offset` is the number of pixels handed out so far; `old_count` is
/// the pixel base the upcoming spawn pass assigns from (set by the group
/// scan each step). `ray_count` stays a multiple of [`WARP_WIDTH`],
/// `group_count` a multiple of [`UNIT_WIDTH`].
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GlobalData {
    pub pixel_offset: u32,
    pub pixel_count: u32,
    pub group_count: u32,
    pub old_count: u32,
    pub ray_count: u32,
    _pad: [u32; 3],
    pub cam: Camera,
}

impl GlobalData {
    pub fn new(cam: Camera, group_count: u32, ray_count: u32) -> Self {
        Self {
            pixel_offset: 0,
            pixel_count: cam.width * cam.height,
            group_count,
            old_count: 0,
            ray_count,
            _pad: [0; 3],
            cam,
        }
    }
}

/// Per-group scheduling row, rewritten every step.
///
/// All three fields are `(primary, shadow)` lane pairs. `base` is where the
/// group's rays start after placement, `count` how many arrived this step,
/// `offset` the scatter cursor (starts at `base`, ends at `base + count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct GroupData {
    pub base: [u32; 2],
    pub count: [u32; 2],
    pub offset: [u32; 2],
}

// ── Ray records ─────────────────────────────────────────────────────

/// Primary rays accumulate into the image; shadow rays test occlusion.
pub const RAY_PRIMARY: u32 = 0;
pub const RAY_SHADOW: u32 = 1;

/// Origin + min distance, direction + max distance. Two float4 loads fetch
/// the whole thing.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Ray {
    pub start: [f32; 3],
    pub t_min: f32,
    pub dir: [f32; 3],
    pub t_max: f32,
}

/// A recorded intersection candidate: entry distance, the child group to
/// visit, and the two-lane local id that selects per-instance payloads.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RayHit {
    pub t: f32,
    pub group_id: GroupId,
    pub local_id: [u32; 2],
}

/// The full per-ray record in `ray_list`.
///
/// `root` is the best committed surface hit so far (its `group_id` is the
/// material group to shade with); `orig` is the hit currently being
/// traversed (its `local_id` selects the instance matrix). `queue` holds up
/// to [`MAX_QUEUE_LEN`] deferred AABB hits in ascending-`t` order.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RayState {
    pub weight: [f32; 4],
    pub pixel: u32,
    pub kind: u32,
    pub material_id: u32,
    pub queue_len: u32,
    pub ray: Ray,
    pub norm: [f32; 3],
    pub _pad: f32,
    pub root: RayHit,
    pub orig: RayHit,
    pub queue: [RayHit; MAX_QUEUE_LEN],
}

/// One entry of the ray-index stream: the sort key and the slot in
/// `ray_list` it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RayIndex {
    pub group: GroupId,
    pub ray: u32,
}

/// Round `val` up to a multiple of `unit`.
pub fn align_up(val: u32, unit: u32) -> u32 {
    val.div_ceil(unit) * unit
}
