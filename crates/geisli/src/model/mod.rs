//! # Model — Mesh Preprocessing Pipeline
//!
//! A [`Model`] moves through a fixed sequence of states:
//!
//! ```text
//! load (PLY)  →  prepare (normals, centroids)  →  subdivide (BVH)
//!     →  reserve (arena counts)  →  fill (device records)  →  put (instances)
//! ```
//!
//! `load` and `prepare` run together; `subdivide` carves the triangle set
//! into blocks; `reserve`/`fill` are the two arena phases; `put` stamps out
//! world-space instance AABBs that all point at the one shared root group.
//! After `fill` the model's parsed arrays are only needed for `put` bounds —
//! the device data lives in the arena.

pub mod arena;
pub mod bvh;
pub mod ply;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use glam::{Affine3A, Vec3};

use crate::layout::{Aabb, GroupId};
use crate::math::Bounds;
use arena::ResourceManager;
use bvh::TriangleBlock;
use ply::{PlyError, PlyMesh};

/// A vertex with its accumulated (then normalized) surface normal.
#[derive(Debug, Clone, Copy)]
pub struct ModelVertex {
    pub pos: Vec3,
    pub norm: Vec3,
}

/// A triangle with its precomputed centroid, indexing [`Model::vertices`].
#[derive(Debug, Clone, Copy)]
pub struct ModelTriangle {
    pub center: Vec3,
    pub idx: [u32; 3],
}

/// A loaded and prepared mesh, ready for subdivision and packing.
pub struct Model {
    vertices: Vec<ModelVertex>,
    triangles: Vec<ModelTriangle>,
    /// Permutation of triangle indices the BVH sorts in place.
    order: Vec<u32>,
    root: Option<TriangleBlock>,
    root_group: Option<GroupId>,
}

impl Model {
    /// Load an ASCII PLY file and prepare it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlyError> {
        let path = path.as_ref();
        let mesh = ply::parse(BufReader::new(File::open(path)?))?;
        log::info!(
            "loaded {}: {} vertices, {} triangles",
            path.display(),
            mesh.positions.len(),
            mesh.faces.len(),
        );
        Ok(Self::from_mesh(mesh))
    }

    /// Build a model from an already-parsed mesh.
    pub fn from_mesh(mesh: PlyMesh) -> Self {
        let mut vertices: Vec<ModelVertex> = mesh
            .positions
            .iter()
            .map(|&pos| ModelVertex { pos, norm: Vec3::ZERO })
            .collect();

        // Accumulate unnormalized face normals into the corners; the sum is
        // normalized once at the end so large faces weigh more.
        let mut bounds = Bounds::EMPTY;
        let triangles: Vec<ModelTriangle> = mesh
            .faces
            .iter()
            .map(|&idx| {
                let [a, b, c] = idx.map(|i| vertices[i as usize].pos);
                let norm = (b - a).cross(c - a);
                for &i in &idx {
                    vertices[i as usize].norm += norm;
                }
                let center = (a + b + c) / 3.0;
                bounds.insert(center);
                ModelTriangle { center, idx }
            })
            .collect();
        for v in &mut vertices {
            v.norm = v.norm / v.norm.length();
        }

        let order = (0..triangles.len() as u32).collect();
        let root = TriangleBlock::new(bounds, 0, triangles.len());
        Self { vertices, triangles, order, root: Some(root), root_group: None }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Build the block tree. Returns the number of blocks in the root's
    /// AABB array.
    pub fn subdivide(&mut self, tri_threshold: usize, aabb_threshold: usize) -> usize {
        let root = self.root.as_mut().expect("model already filled");
        root.subdivide(&self.triangles, &mut self.order, tri_threshold, aabb_threshold, true)
    }

    /// Phase 1: declare the arena footprint of the whole tree.
    pub fn reserve(&mut self, mngr: &mut ResourceManager) {
        let root = self.root.as_mut().expect("model already filled");
        let mut scratch = vec![-1i32; self.vertices.len()];
        root.reserve(mngr, &self.triangles, &self.order, &mut scratch);
    }

    /// Phase 2: write groups, AABBs, compacted vertices, and packed
    /// triangle words. `material_id` is baked into every leaf block.
    pub fn fill(&mut self, mngr: &mut ResourceManager, material_id: GroupId) {
        let root = self.root.as_mut().expect("model already filled");
        let mut scratch = vec![-1i32; self.vertices.len()];
        let id = root
            .fill(mngr, &self.vertices, &self.triangles, &self.order, &mut scratch, material_id, None)
            .expect("root block is always materialized");
        self.root_group = Some(id);
    }

    /// The packed id of the root group, available after [`fill`](Self::fill).
    pub fn root_group(&self) -> GroupId {
        self.root_group.expect("fill the model first")
    }

    /// Build one instance entry: the model's bounds under `mat`, pointing
    /// back at the shared root group with this instance's `local_id`.
    pub fn put(&self, mat: &Affine3A, local_id: u32) -> Aabb {
        let group_id = self.root_group();
        let mut bounds = Bounds::EMPTY;
        for v in &self.vertices {
            bounds.insert(mat.transform_point3(v.pos));
        }
        Aabb::new(bounds.min, bounds.max, group_id, local_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{
        MAX_BLOCK_VERTICES, ShaderKind, TransformKind, unpack_triangle,
    };

    fn quad_mesh() -> PlyMesh {
        PlyMesh {
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            faces: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    /// A pseudo-random cloud of triangles, big enough to force subdivision.
    fn cloud_mesh(tri_count: usize) -> PlyMesh {
        let mut state = 0x2545_f491u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 8) as f32 / (1 << 24) as f32
        };
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        for _ in 0..tri_count {
            let base = positions.len() as u32;
            let origin = Vec3::new(next() * 10.0, next() * 10.0, next() * 10.0);
            positions.push(origin);
            positions.push(origin + Vec3::new(next() * 0.1, next() * 0.1, 0.0));
            positions.push(origin + Vec3::new(0.0, next() * 0.1, next() * 0.1));
            faces.push([base, base + 1, base + 2]);
        }
        PlyMesh { positions, faces }
    }

    fn pack(model: &mut Model, material: GroupId) -> ResourceManager {
        let mut mngr = ResourceManager::new();
        model.reserve(&mut mngr);
        mngr.alloc();
        model.fill(&mut mngr, material);
        assert!(mngr.full());
        mngr
    }

    fn material_id() -> GroupId {
        GroupId::pack(3, TransformKind::None, ShaderKind::Material)
    }

    #[test]
    fn shared_edge_quad_packs_into_one_block() {
        let mut model = Model::from_mesh(quad_mesh());
        assert_eq!(model.subdivide(128, 128), 1);
        let mngr = pack(&mut model, material_id());

        // One mesh group, four compacted vertices, two triangle words.
        assert_eq!(mngr.group_count(), 1);
        assert_eq!(mngr.vertex_count(), 4);
        assert_eq!(mngr.triangle_count(), 2);
        assert_eq!(model.root_group().shader(), ShaderKind::Mesh);

        // The shared edge (vertices 0 and 2) compacts to the same local
        // index in both triangles.
        let a = unpack_triangle(mngr.triangle(0));
        let b = unpack_triangle(mngr.triangle(1));
        assert_eq!(a[0], b[0]);
        assert_eq!(a[2], b[1]);
    }

    #[test]
    fn vertex_normals_average_adjacent_faces() {
        let model = Model::from_mesh(quad_mesh());
        for v in &model.vertices {
            // Both faces are coplanar in z = 0, so every normal is ±Z.
            assert!((v.norm.z.abs() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn every_triangle_word_indexes_inside_its_block() {
        let mut model = Model::from_mesh(cloud_mesh(2000));
        model.subdivide(128, 8);
        let mngr = pack(&mut model, material_id());

        // Every leaf block appears as exactly one AABB entry whose group id
        // carries the mesh shader kind.
        let mut found_mesh = false;
        for i in 0..mngr.aabb_count() as u32 {
            let entry = mngr.aabb(i);
            if entry.group_id.shader() != ShaderKind::Mesh {
                continue;
            }
            found_mesh = true;
            let grp = *mngr.group(entry.group_id.index());

            // Compaction hands out dense local indices, so the referenced
            // set must be exactly 0..n with n below the 10-bit cap.
            let mut seen = std::collections::BTreeSet::new();
            for t in grp.tri_offs()..grp.tri_offs() + grp.tri_count() {
                for local in unpack_triangle(mngr.triangle(t)) {
                    assert!(local < MAX_BLOCK_VERTICES);
                    seen.insert(local);
                }
            }
            let vtx_count = seen.len() as u32;
            assert!(seen.iter().copied().eq(0..vtx_count));
            assert!((grp.vtx_offs() + vtx_count) as usize <= mngr.vertex_count());
        }
        assert!(found_mesh);
    }

    #[test]
    fn leaf_bounds_contain_their_vertices() {
        let mut model = Model::from_mesh(cloud_mesh(1500));
        model.subdivide(64, 4);
        let mngr = pack(&mut model, material_id());

        // Every AABB entry that points at a mesh group must contain every
        // vertex its triangles reference.
        for i in 0..mngr.aabb_count() as u32 {
            let entry = mngr.aabb(i);
            if entry.group_id.shader() != ShaderKind::Mesh {
                continue;
            }
            let grp = *mngr.group(entry.group_id.index());
            let min = Vec3::from(entry.min);
            let max = Vec3::from(entry.max);
            for t in grp.tri_offs()..grp.tri_offs() + grp.tri_count() {
                for local in unpack_triangle(mngr.triangle(t)) {
                    let pos = Vec3::from(mngr.vertex(grp.vtx_offs() + local).pos);
                    assert!(pos.cmpge(min - 1e-5).all() && pos.cmple(max + 1e-5).all());
                }
            }
        }
    }

    #[test]
    fn packing_twice_is_deterministic() {
        let build = || {
            let mut model = Model::from_mesh(cloud_mesh(600));
            model.subdivide(64, 4);
            let mngr = pack(&mut model, material_id());
            (
                mngr.groups().to_vec(),
                mngr.triangles().to_vec(),
                mngr.aabbs().to_vec(),
            )
        };
        let (g1, t1, a1) = build();
        let (g2, t2, a2) = build();
        assert_eq!(g1, g2);
        assert_eq!(t1, t2);
        assert_eq!(a1, a2);
    }

    #[test]
    fn instances_share_one_root_group() {
        let mut model = Model::from_mesh(cloud_mesh(2000));
        model.subdivide(128, 8);
        let _mngr = pack(&mut model, material_id());
        let root = model.root_group();

        let mut instances = Vec::new();
        for i in 0..256u32 {
            let angle = i as f32 * 0.123;
            let mat = Affine3A::from_rotation_z(angle)
                * Affine3A::from_translation(Vec3::new(i as f32, 0.0, 0.0));
            instances.push(model.put(&mat, i));
        }
        assert_eq!(instances.len(), 256);
        for (i, inst) in instances.iter().enumerate() {
            assert_eq!(inst.group_id, root);
            assert_eq!(inst.local_id, i as u32);
            assert!(Vec3::from(inst.min).cmple(Vec3::from(inst.max)).all());
        }
    }

    #[test]
    fn transformed_instance_bounds_follow_the_matrix() {
        let mut model = Model::from_mesh(quad_mesh());
        model.subdivide(128, 128);
        let _mngr = pack(&mut model, material_id());

        let shift = Affine3A::from_translation(Vec3::new(5.0, 0.0, 0.0));
        let inst = model.put(&shift, 0);
        assert!((inst.min[0] - 5.0).abs() < 1e-6);
        assert!((inst.max[0] - 6.0).abs() < 1e-6);
    }
}
