//! # Resource Arena — Two-Phase Packing
//!
//! Device buffers want one flat array per record kind, but the mesh
//! preprocessor discovers its output sizes while walking trees. The
//! [`ResourceManager`] splits packing into two phases:
//!
//! 1. **Reserve** — every producer declares how many groups / AABBs /
//!    vertices / triangles it will write. Reservations are additive.
//! 2. **Fill** — after [`alloc`](ResourceManager::alloc), producers claim
//!    index ranges with `get_*` and write records through the checked
//!    accessors. Ranges are bump-allocated, so claim order is layout order.
//!
//! Every misuse — reserving after alloc, claiming more than reserved,
//! touching an unclaimed slot — is a programming error and panics via
//! `assert!`. [`full`](ResourceManager::full) asserts the contract the
//! other way: everything reserved was actually produced.

use crate::layout::{Aabb, GpuVertex, Group};

/// One bump-allocated channel: reserved capacity and a claim cursor.
#[derive(Debug, Default, Clone, Copy)]
struct Channel {
    reserved: usize,
    used: usize,
}

impl Channel {
    fn reserve(&mut self, count: usize) {
        self.reserved += count;
    }

    fn claim(&mut self, count: usize, what: &str) -> usize {
        assert!(
            self.used + count <= self.reserved,
            "claimed more {what} than reserved ({} + {count} > {})",
            self.used,
            self.reserved,
        );
        let first = self.used;
        self.used += count;
        first
    }
}

/// Two-phase bump arena with four channels: groups, AABBs, vertices,
/// triangles.
#[derive(Debug, Default)]
pub struct ResourceManager {
    groups: Vec<Group>,
    aabbs: Vec<Aabb>,
    vertices: Vec<GpuVertex>,
    triangles: Vec<u32>,
    ch_groups: Channel,
    ch_aabbs: Channel,
    ch_vertices: Channel,
    ch_triangles: Channel,
    allocated: bool,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Phase 1: reserve ────────────────────────────────────────────

    pub fn reserve_groups(&mut self, count: usize) {
        assert!(!self.allocated, "reserve_groups after alloc");
        self.ch_groups.reserve(count);
    }

    pub fn reserve_aabbs(&mut self, count: usize) {
        assert!(!self.allocated, "reserve_aabbs after alloc");
        self.ch_aabbs.reserve(count);
    }

    pub fn reserve_vertices(&mut self, count: usize) {
        assert!(!self.allocated, "reserve_vertices after alloc");
        self.ch_vertices.reserve(count);
    }

    pub fn reserve_triangles(&mut self, count: usize) {
        assert!(!self.allocated, "reserve_triangles after alloc");
        self.ch_triangles.reserve(count);
    }

    /// Close the reserve phase and allocate zeroed storage for every channel.
    pub fn alloc(&mut self) {
        assert!(!self.allocated, "alloc called twice");
        self.groups = vec![Group::aabb_list(0, 0, 0); self.ch_groups.reserved];
        self.aabbs = vec![bytemuck::Zeroable::zeroed(); self.ch_aabbs.reserved];
        self.vertices = vec![bytemuck::Zeroable::zeroed(); self.ch_vertices.reserved];
        self.triangles = vec![0; self.ch_triangles.reserved];
        self.allocated = true;
    }

    // ── Phase 2: claim + fill ───────────────────────────────────────

    /// Claim `count` group slots; returns the first index.
    pub fn get_groups(&mut self, count: usize) -> u32 {
        assert!(self.allocated, "get_groups before alloc");
        self.ch_groups.claim(count, "groups") as u32
    }

    pub fn get_aabbs(&mut self, count: usize) -> u32 {
        assert!(self.allocated, "get_aabbs before alloc");
        self.ch_aabbs.claim(count, "aabbs") as u32
    }

    pub fn get_vertices(&mut self, count: usize) -> u32 {
        assert!(self.allocated, "get_vertices before alloc");
        self.ch_vertices.claim(count, "vertices") as u32
    }

    pub fn get_triangles(&mut self, count: usize) -> u32 {
        assert!(self.allocated, "get_triangles before alloc");
        self.ch_triangles.claim(count, "triangles") as u32
    }

    /// Mutable access to a claimed group slot.
    pub fn group_mut(&mut self, index: u32) -> &mut Group {
        assert!((index as usize) < self.ch_groups.used, "group {index} not claimed");
        &mut self.groups[index as usize]
    }

    pub fn aabb_mut(&mut self, index: u32) -> &mut Aabb {
        assert!((index as usize) < self.ch_aabbs.used, "aabb {index} not claimed");
        &mut self.aabbs[index as usize]
    }

    pub fn vertex_mut(&mut self, index: u32) -> &mut GpuVertex {
        assert!((index as usize) < self.ch_vertices.used, "vertex {index} not claimed");
        &mut self.vertices[index as usize]
    }

    pub fn triangle_mut(&mut self, index: u32) -> &mut u32 {
        assert!((index as usize) < self.ch_triangles.used, "triangle {index} not claimed");
        &mut self.triangles[index as usize]
    }

    pub fn group(&self, index: u32) -> &Group {
        assert!((index as usize) < self.ch_groups.used, "group {index} not claimed");
        &self.groups[index as usize]
    }

    pub fn aabb(&self, index: u32) -> &Aabb {
        assert!((index as usize) < self.ch_aabbs.used, "aabb {index} not claimed");
        &self.aabbs[index as usize]
    }

    pub fn vertex(&self, index: u32) -> &GpuVertex {
        assert!((index as usize) < self.ch_vertices.used, "vertex {index} not claimed");
        &self.vertices[index as usize]
    }

    pub fn triangle(&self, index: u32) -> u32 {
        assert!((index as usize) < self.ch_triangles.used, "triangle {index} not claimed");
        self.triangles[index as usize]
    }

    // ── Totals + upload views ───────────────────────────────────────

    pub fn group_count(&self) -> usize {
        self.ch_groups.used
    }

    pub fn aabb_count(&self) -> usize {
        self.ch_aabbs.used
    }

    pub fn vertex_count(&self) -> usize {
        self.ch_vertices.used
    }

    pub fn triangle_count(&self) -> usize {
        self.ch_triangles.used
    }

    /// True when every reservation was consumed; the assertion to run after
    /// all fills.
    pub fn full(&self) -> bool {
        self.ch_groups.used == self.ch_groups.reserved
            && self.ch_aabbs.used == self.ch_aabbs.reserved
            && self.ch_vertices.used == self.ch_vertices.reserved
            && self.ch_triangles.used == self.ch_triangles.reserved
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn aabbs(&self) -> &[Aabb] {
        &self.aabbs
    }

    pub fn vertices(&self) -> &[GpuVertex] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[u32] {
        &self.triangles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{GroupId, ShaderKind, TransformKind};

    #[test]
    fn reserve_then_claim_hands_out_contiguous_ranges() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_groups(3);
        mngr.reserve_groups(2);
        mngr.alloc();

        assert_eq!(mngr.get_groups(3), 0);
        assert_eq!(mngr.get_groups(1), 3);
        assert_eq!(mngr.get_groups(1), 4);
        assert!(mngr.full());
    }

    #[test]
    fn claimed_slots_are_writable() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_groups(1);
        mngr.alloc();
        let pos = mngr.get_groups(1);
        *mngr.group_mut(pos) = Group::mesh(
            1,
            2,
            3,
            GroupId::pack(0, TransformKind::None, ShaderKind::Material),
        );
        assert_eq!(mngr.group(pos).tri_count(), 3);
    }

    #[test]
    #[should_panic(expected = "claimed more groups than reserved")]
    fn over_claiming_panics() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_groups(1);
        mngr.alloc();
        mngr.get_groups(2);
    }

    #[test]
    #[should_panic(expected = "before alloc")]
    fn claiming_before_alloc_panics() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_aabbs(4);
        mngr.get_aabbs(1);
    }

    #[test]
    #[should_panic(expected = "not claimed")]
    fn reading_unclaimed_slot_panics() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_aabbs(4);
        mngr.alloc();
        mngr.get_aabbs(2);
        mngr.aabb(2);
    }

    #[test]
    fn full_is_false_until_everything_is_claimed() {
        let mut mngr = ResourceManager::new();
        mngr.reserve_triangles(2);
        mngr.alloc();
        assert!(!mngr.full());
        mngr.get_triangles(2);
        assert!(mngr.full());
    }
}
