//! # Scene Assembly
//!
//! Builds the flat device arrays the tracer uploads: the group table, the
//! instance matrices, the AABB/vertex/triangle arenas, and the global state
//! block. The demo scene mirrors the classic setup: up to two PLY models,
//! 256 randomly placed instances alternating between them, one material per
//! model, and a single instance AABB group the camera enters on primary
//! rays. With no models at all the camera points straight at the sky group,
//! which is the smallest scene the pipeline can run.

use std::path::Path;

use glam::{Affine3A, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::layout::{
    AABB_LOCAL0, Aabb, GlobalData, GpuVertex, Group, GroupId, LIGHT_GROUP, Matrix,
    PREDEFINED_GROUPS, SKY_GROUP, ShaderKind, TransformKind, UNIT_WIDTH, align_up,
};
use crate::math::look_at_camera;
use crate::model::arena::ResourceManager;
use crate::model::{Model, ply::PlyError};

/// Triangles per leaf block before subdivision stops.
const TRI_THRESHOLD: usize = 128;
/// Blocks per subtree before an internal node gets its own AABB group.
const AABB_THRESHOLD: usize = 128;
/// Instances stamped into the demo scene.
const INSTANCE_COUNT: usize = 256;

/// Material palette cycled across models: RGB + specular intensity.
const MATERIALS: [[f32; 4]; 2] = [
    [0.2, 0.9, 0.2, 0.1], // green
    [0.9, 0.2, 0.2, 0.1], // red
];

/// Sky and light colors, stored in the predefined group slots so the
/// terminal shaders can read them like any other material.
const SKY_COLOR: [f32; 4] = [0.35, 0.45, 0.7, 0.0];
const LIGHT_COLOR: [f32; 4] = [8.0, 7.6, 7.0, 0.0];

/// Everything the tracer needs to create its device buffers.
pub struct SceneData {
    pub global: GlobalData,
    pub groups: Vec<Group>,
    pub matrices: Vec<Matrix>,
    pub aabbs: Vec<Aabb>,
    pub vertices: Vec<GpuVertex>,
    pub triangles: Vec<u32>,
}

impl SceneData {
    /// Load `model_paths` and assemble the demo scene at the given
    /// resolution. An empty path list produces the sky-only scene.
    pub fn demo(
        width: u32,
        height: u32,
        ray_count: u32,
        model_paths: &[impl AsRef<Path>],
    ) -> Result<Self, PlyError> {
        let mut models = Vec::with_capacity(model_paths.len());
        for path in model_paths {
            models.push(Model::load(path)?);
        }
        Ok(Self::assemble(width, height, ray_count, models))
    }

    /// Assemble from already-loaded models (tests feed synthetic meshes in
    /// here directly).
    pub fn assemble(width: u32, height: u32, ray_count: u32, mut models: Vec<Model>) -> Self {
        let mut mngr = ResourceManager::new();
        mngr.reserve_groups(PREDEFINED_GROUPS as usize + models.len());
        if !models.is_empty() {
            mngr.reserve_groups(1);
            mngr.reserve_aabbs(INSTANCE_COUNT);
        }
        for model in &mut models {
            let blocks = model.subdivide(TRI_THRESHOLD, AABB_THRESHOLD);
            log::debug!("model subdivided into {blocks} root blocks");
            model.reserve(&mut mngr);
        }
        mngr.alloc();

        // Predefined slots: spawn stays zeroed, sky and light carry their
        // colors in the material arm.
        assert_eq!(mngr.get_groups(PREDEFINED_GROUPS as usize), 0);
        *mngr.group_mut(SKY_GROUP.index()) = Group::material(SKY_COLOR);
        *mngr.group_mut(LIGHT_GROUP.index()) = Group::material(LIGHT_COLOR);

        let material_ids: Vec<GroupId> = (0..models.len())
            .map(|i| {
                let slot = mngr.get_groups(1);
                *mngr.group_mut(slot) = Group::material(MATERIALS[i % MATERIALS.len()]);
                GroupId::pack(slot, TransformKind::None, ShaderKind::Material)
            })
            .collect();

        let mut matrices = Vec::new();
        let root = if models.is_empty() {
            SKY_GROUP
        } else {
            // The one instance group: every child AABB selects its matrix
            // through lane 0 of the local id.
            let slot = mngr.get_groups(1);
            let aabb_offs = mngr.get_aabbs(INSTANCE_COUNT);
            *mngr.group_mut(slot) =
                Group::aabb_list(aabb_offs, INSTANCE_COUNT as u32, AABB_LOCAL0);
            let aabb_id = GroupId::pack(slot, TransformKind::Identity, ShaderKind::Aabb);

            for (model, &material) in models.iter_mut().zip(&material_ids) {
                model.fill(&mut mngr, material);
            }

            let mut rng = StdRng::seed_from_u64(0x6765_6973_6c69);
            for i in 0..INSTANCE_COUNT {
                let angle = rng.r#gen::<f32>() * std::f32::consts::TAU;
                let translation = Vec3::new(
                    rng.r#gen::<f32>() * 4.0 - 2.0,
                    rng.r#gen::<f32>() * 4.0,
                    rng.r#gen::<f32>() * 2.0 - 1.0,
                );
                let mat = Affine3A::from_translation(translation)
                    * Affine3A::from_rotation_y(angle);
                matrices.push(Matrix::from_affine(&mat));

                let model = &models[i % models.len()];
                *mngr.aabb_mut(aabb_offs + i as u32) = model.put(&mat, i as u32);
            }
            aabb_id
        };
        assert!(mngr.full());

        let cam = look_at_camera(
            Vec3::new(0.0, -0.3, 0.0),
            Vec3::Y,
            Vec3::Z,
            1.0,
            width,
            height,
        )
        .with_root(root, 0);

        // The group table and scheduler rows are padded to a whole number
        // of work-group units.
        let group_count = align_up(mngr.group_count() as u32 + 1, UNIT_WIDTH);
        let mut groups = mngr.groups().to_vec();
        groups.resize(group_count as usize, Group::material([0.0; 4]));

        let global = GlobalData::new(cam, group_count, ray_count);
        log::info!(
            "scene: {} groups ({} padded), {} aabbs, {} vertices, {} triangles",
            mngr.group_count(),
            group_count,
            mngr.aabb_count(),
            mngr.vertex_count(),
            mngr.triangle_count(),
        );

        // Zero-length storage bindings are not a thing; keep one zeroed
        // element in channels an empty scene never touches.
        let mut scene = Self {
            global,
            groups,
            matrices,
            aabbs: mngr.aabbs().to_vec(),
            vertices: mngr.vertices().to_vec(),
            triangles: mngr.triangles().to_vec(),
        };
        if scene.matrices.is_empty() {
            scene.matrices.push(Matrix::IDENTITY);
        }
        if scene.aabbs.is_empty() {
            scene.aabbs.push(Aabb::new(Vec3::ZERO, Vec3::ZERO, SKY_GROUP, 0));
        }
        if scene.vertices.is_empty() {
            scene.vertices.push(GpuVertex::new(Vec3::ZERO, Vec3::Z));
        }
        if scene.triangles.is_empty() {
            scene.triangles.push(0);
        }
        scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ply::PlyMesh;

    fn grid_mesh(n: usize) -> Model {
        let mut positions = Vec::new();
        let mut faces = Vec::new();
        for i in 0..n {
            for j in 0..n {
                positions.push(Vec3::new(i as f32, j as f32, ((i * 7 + j) % 5) as f32 * 0.1));
            }
        }
        let at = |i: usize, j: usize| (i * n + j) as u32;
        for i in 0..n - 1 {
            for j in 0..n - 1 {
                faces.push([at(i, j), at(i + 1, j), at(i + 1, j + 1)]);
                faces.push([at(i, j), at(i + 1, j + 1), at(i, j + 1)]);
            }
        }
        Model::from_mesh(PlyMesh { positions, faces })
    }

    #[test]
    fn empty_scene_targets_the_sky() {
        let scene = SceneData::assemble(64, 64, 4096, Vec::new());
        assert_eq!(scene.global.cam.root_group, SKY_GROUP);
        assert_eq!(scene.global.pixel_count, 64 * 64);
        assert_eq!(scene.global.group_count % UNIT_WIDTH, 0);
        // Padded placeholder entries keep every channel non-empty.
        assert_eq!(scene.aabbs.len(), 1);
        assert_eq!(scene.matrices.len(), 1);
    }

    #[test]
    fn instanced_scene_shares_one_mesh_tree() {
        let scene = SceneData::assemble(64, 64, 4096, vec![grid_mesh(40)]);
        let root = scene.global.cam.root_group;
        assert_eq!(root.shader(), ShaderKind::Aabb);

        let grp = &scene.groups[root.index() as usize];
        assert_eq!(grp.aabb_count() as usize, INSTANCE_COUNT);
        assert_eq!(grp.aabb_flags(), AABB_LOCAL0);

        // All 256 instance entries point at the same mesh root group and
        // carry their own matrix index.
        let offs = grp.aabb_offs() as usize;
        let first = scene.aabbs[offs].group_id;
        for (i, entry) in scene.aabbs[offs..offs + INSTANCE_COUNT].iter().enumerate() {
            assert_eq!(entry.group_id, first);
            assert_eq!(entry.local_id, i as u32);
        }
        assert_eq!(scene.matrices.len(), INSTANCE_COUNT);
    }

    #[test]
    fn two_models_alternate_between_instances() {
        let scene = SceneData::assemble(64, 64, 4096, vec![grid_mesh(40), grid_mesh(25)]);
        let root = scene.global.cam.root_group;
        let grp = &scene.groups[root.index() as usize];
        let offs = grp.aabb_offs() as usize;
        let even = scene.aabbs[offs].group_id;
        let odd = scene.aabbs[offs + 1].group_id;
        assert_ne!(even, odd);
        for (i, entry) in scene.aabbs[offs..offs + INSTANCE_COUNT].iter().enumerate() {
            assert_eq!(entry.group_id, if i % 2 == 0 { even } else { odd });
        }
    }
}
