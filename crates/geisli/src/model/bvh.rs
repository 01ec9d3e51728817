//! # Triangle BVH — Median-Axis Subdivision
//!
//! The mesh preprocessor carves a model into *blocks* small enough that
//! every block's vertices fit the 10-bit local indices of the packed
//! triangle word. The tree is built by recursive median split:
//!
//! - pick the widest axis of the current centroid bounds,
//! - sort the block's triangles by centroid along it,
//! - split at the middle, substituting the split coordinate into the
//!   children's bounds from the last/first centroid of each half,
//! - recurse until a block holds fewer than `tri_threshold` triangles.
//!
//! Not every internal node becomes a device AABB group. A subtree smaller
//! than `aabb_threshold` blocks is *inlined*: its leaves go straight into
//! the enclosing group's AABB array. This keeps fan-out high and the tree
//! shallow — a ray pays for one wide box test instead of a chain of binary
//! ones.

use crate::layout::{
    Aabb, Group, GroupId, MAX_BLOCK_VERTICES, ShaderKind, TransformKind, pack_triangle,
};
use crate::math::Bounds;
use crate::model::arena::ResourceManager;
use crate::model::{ModelTriangle, ModelVertex};

/// One node of the subdivision tree, covering `order[start..start + len]`.
///
/// `bounds` holds centroid bounds while building; after
/// [`fill`](TriangleBlock::fill) it is the world-space bounds of the
/// subtree's vertices.
pub struct TriangleBlock {
    bounds: Bounds,
    start: usize,
    len: usize,
    children: Option<Box<[TriangleBlock; 2]>>,
    /// Non-zero on internal nodes materialized as an AABB group: the number
    /// of descendant blocks collected into its AABB array.
    aabb_count: usize,
    /// Leaf only: number of distinct vertices after compaction.
    vtx_count: usize,
}

impl TriangleBlock {
    pub fn new(bounds: Bounds, start: usize, len: usize) -> Self {
        Self { bounds, start, len, children: None, aabb_count: 0, vtx_count: 0 }
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Split recursively; returns the number of blocks this subtree
    /// contributes to its enclosing AABB array (1 when the subtree is a
    /// leaf or was materialized as its own group).
    pub fn subdivide(
        &mut self,
        tris: &[ModelTriangle],
        order: &mut [u32],
        tri_threshold: usize,
        aabb_threshold: usize,
        root: bool,
    ) -> usize {
        assert!(self.children.is_none());
        if self.len < tri_threshold {
            return 1;
        }

        let axis = self.bounds.widest_axis();
        let range = &mut order[self.start..self.start + self.len];
        range.sort_unstable_by(|&a, &b| {
            tris[a as usize].center[axis].total_cmp(&tris[b as usize].center[axis])
        });

        let center = self.len / 2;
        let mut lo = TriangleBlock::new(self.bounds, self.start, center);
        let mut hi = TriangleBlock::new(self.bounds, self.start + center, self.len - center);
        lo.bounds.max[axis] = tris[range[center - 1] as usize].center[axis];
        hi.bounds.min[axis] = tris[range[center] as usize].center[axis];

        let block_count = lo.subdivide(tris, order, tri_threshold, aabb_threshold, false)
            + hi.subdivide(tris, order, tri_threshold, aabb_threshold, false);
        self.children = Some(Box::new([lo, hi]));

        if !root && block_count < aabb_threshold {
            return block_count;
        }
        self.aabb_count = block_count;
        1
    }

    /// Declare this subtree's arena footprint. Leaves also compute their
    /// compacted vertex count here; `scratch` must hold one `-1` slot per
    /// model vertex and is handed back clean.
    pub fn reserve(
        &mut self,
        mngr: &mut ResourceManager,
        tris: &[ModelTriangle],
        order: &[u32],
        scratch: &mut [i32],
    ) {
        if let Some(children) = &mut self.children {
            let [lo, hi] = children.as_mut();
            lo.reserve(mngr, tris, order, scratch);
            hi.reserve(mngr, tris, order, scratch);
            if self.aabb_count == 0 {
                return;
            }
            mngr.reserve_groups(1);
            mngr.reserve_aabbs(self.aabb_count);
            return;
        }

        mngr.reserve_groups(1);
        mngr.reserve_triangles(self.len);

        let mut pos = 0;
        for &t in &order[self.start..self.start + self.len] {
            for &v in &tris[t as usize].idx {
                if scratch[v as usize] < 0 {
                    scratch[v as usize] = pos as i32;
                    pos += 1;
                }
            }
        }
        for &t in &order[self.start..self.start + self.len] {
            for &v in &tris[t as usize].idx {
                scratch[v as usize] = -1;
            }
        }
        assert!(
            pos < MAX_BLOCK_VERTICES as usize,
            "mesh block holds {pos} vertices; lower tri_threshold",
        );
        self.vtx_count = pos;
        mngr.reserve_vertices(pos);
    }

    /// Write this subtree into the arena. Materialized nodes claim a group
    /// and an AABB range and collect their descendants; leaves compact
    /// vertices to block-local indices and emit packed triangle words.
    ///
    /// When `aabb_cursor` is set, the block appends its own world-space
    /// AABB entry at the cursor. Returns the block's group id, or `None`
    /// for inlined internal nodes (their descendants were appended
    /// directly).
    pub fn fill(
        &mut self,
        mngr: &mut ResourceManager,
        verts: &[ModelVertex],
        tris: &[ModelTriangle],
        order: &[u32],
        scratch: &mut [i32],
        material_id: GroupId,
        mut aabb_cursor: Option<&mut u32>,
    ) -> Option<GroupId> {
        if self.children.is_some() {
            if self.aabb_count > 0 {
                let grp_pos = mngr.get_groups(1);
                let aabb_offs = mngr.get_aabbs(self.aabb_count);
                *mngr.group_mut(grp_pos) = Group::aabb_list(aabb_offs, self.aabb_count as u32, 0);

                let mut sub = aabb_offs;
                let [lo, hi] = self.children.as_mut().unwrap().as_mut();
                lo.fill(mngr, verts, tris, order, scratch, material_id, Some(&mut sub));
                hi.fill(mngr, verts, tris, order, scratch, material_id, Some(&mut sub));
                assert_eq!(sub, aabb_offs + self.aabb_count as u32);
                self.bounds = lo.bounds.union(&hi.bounds);

                let id = GroupId::pack(grp_pos, TransformKind::Ortho, ShaderKind::Aabb);
                self.push_aabb(mngr, id, aabb_cursor);
                return Some(id);
            }

            let [lo, hi] = self.children.as_mut().unwrap().as_mut();
            lo.fill(mngr, verts, tris, order, scratch, material_id, aabb_cursor.as_deref_mut());
            hi.fill(mngr, verts, tris, order, scratch, material_id, aabb_cursor);
            self.bounds = lo.bounds.union(&hi.bounds);
            return None;
        }

        let grp_pos = mngr.get_groups(1);
        let vtx_offs = mngr.get_vertices(self.vtx_count);
        let tri_offs = mngr.get_triangles(self.len);
        *mngr.group_mut(grp_pos) = Group::mesh(vtx_offs, tri_offs, self.len as u32, material_id);

        let mut pos = 0u32;
        let mut bounds = Bounds::EMPTY;
        for (k, &t) in order[self.start..self.start + self.len].iter().enumerate() {
            let idx = tris[t as usize].idx;
            let local = idx.map(|v| {
                put_vertex(mngr, verts, scratch, v, vtx_offs, &mut pos, &mut bounds)
            });
            *mngr.triangle_mut(tri_offs + k as u32) = pack_triangle(local[0], local[1], local[2]);
        }
        for &t in &order[self.start..self.start + self.len] {
            for &v in &tris[t as usize].idx {
                scratch[v as usize] = -1;
            }
        }
        assert_eq!(pos as usize, self.vtx_count);
        self.bounds = bounds;

        let id = GroupId::pack(grp_pos, TransformKind::Ortho, ShaderKind::Mesh);
        self.push_aabb(mngr, id, aabb_cursor);
        Some(id)
    }

    fn push_aabb(&self, mngr: &mut ResourceManager, id: GroupId, cursor: Option<&mut u32>) {
        if let Some(cursor) = cursor {
            *mngr.aabb_mut(*cursor) = Aabb::new(self.bounds.min, self.bounds.max, id, 0);
            *cursor += 1;
        }
    }
}

/// Compact one vertex into the block, assigning it a fresh local index the
/// first time it is seen.
fn put_vertex(
    mngr: &mut ResourceManager,
    verts: &[ModelVertex],
    scratch: &mut [i32],
    v: u32,
    vtx_offs: u32,
    pos: &mut u32,
    bounds: &mut Bounds,
) -> u32 {
    if scratch[v as usize] >= 0 {
        return scratch[v as usize] as u32;
    }
    let local = *pos;
    scratch[v as usize] = local as i32;
    *pos += 1;
    let vertex = &verts[v as usize];
    *mngr.vertex_mut(vtx_offs + local) = crate::layout::GpuVertex::new(vertex.pos, vertex.norm);
    bounds.insert(vertex.pos);
    local
}
