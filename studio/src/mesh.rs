//! Mesh assembler: joins VTX topology with VVD vertex data and emits one
//! deduplicated triangle list per (body part, sub-model, mesh), each tagged
//! with its resolved material.

use std::collections::HashMap;

use common::vfile::AssetResolver;
use glam::{Vec3, Vec4};

use crate::error::{DecodeError, Result};
use crate::mdl::{Mdl, MdlEyeball, MdlModel};
use crate::model::{
    BBox, MaterialHandle, MaterialLoader, Mesh, MeshMaterial, MeshVertex, ModelBuilder,
};
use crate::vtx::{StripFlags, Vtx, VtxStripGroup};
use crate::vvd::{Vvd, VERTEX_SIZE};

pub fn assemble_meshes(
    mdl: &Mdl,
    vvd: &Vvd,
    vtx: &Vtx,
    resolver: &dyn AssetResolver,
    materials: &dyn MaterialLoader,
    builder: &mut ModelBuilder,
) -> Result<()> {
    let textures = mdl.textures()?;
    let cd_paths = mdl.cd_texture_paths()?;
    let mdl_parts = mdl.body_parts()?;
    let vtx_parts = vtx.body_parts()?;

    let mut material_cache: HashMap<i32, Option<MaterialHandle>> = HashMap::new();
    let mut resolve = |texture: i32| -> Option<MaterialHandle> {
        *material_cache.entry(texture).or_insert_with(|| {
            resolve_material(texture, &textures, &cd_paths, resolver, materials)
        })
    };

    let root_lod = mdl.root_lod();
    let vertex_count = vvd.vertex_count(root_lod);

    let mut meshes: Vec<(Mesh, String, usize)> = Vec::new();
    let mut bounds = BBox::EMPTY;

    for (mdl_part, vtx_part) in mdl_parts.iter().zip(&vtx_parts) {
        for (sub_model, (mdl_model, vtx_model)) in
            mdl_part.models.iter().zip(&vtx_part.0).enumerate()
        {
            if mdl_model.meshes.is_empty() {
                continue;
            }

            // The mdl stores a byte offset into the 48-byte vvd stream;
            // vtx speaks in vertex counts.
            if mdl_model.vertex_index < 0 || mdl_model.vertex_index as usize % VERTEX_SIZE != 0 {
                return Err(DecodeError::Malformed("model vertex index misaligned"));
            }
            let model_vertex_offset = mdl_model.vertex_index as usize / VERTEX_SIZE;

            let eye_by_texture = eyeball_map(mdl_model);

            let Some(vtx_lod) = vtx_model
                .0
                .get((root_lod as usize).min(vtx_model.0.len().saturating_sub(1)))
            else {
                continue;
            };

            for (mdl_mesh, vtx_mesh) in mdl_model.meshes.iter().zip(&vtx_lod.0) {
                let material = match resolve(mdl_mesh.material) {
                    Some(handle) => match eye_by_texture.get(&mdl_mesh.material) {
                        Some(eye) => eye_material(handle, eye),
                        None => MeshMaterial::Plain(handle),
                    },
                    None => MeshMaterial::None,
                };

                if mdl_mesh.vertex_offset < 0 {
                    return Err(DecodeError::Malformed("mesh vertex offset negative"));
                }
                let base = model_vertex_offset + mdl_mesh.vertex_offset as usize;

                let mut dedup: HashMap<usize, u32> = HashMap::new();
                let mut vertices: Vec<MeshVertex> = Vec::new();
                let mut indices: Vec<u32> = Vec::new();

                for group in &vtx_mesh.strip_groups {
                    emit_strip_group(
                        group,
                        base,
                        vertex_count,
                        vvd,
                        &mut dedup,
                        &mut vertices,
                        &mut indices,
                    )?;
                }

                if vertices.is_empty() {
                    continue;
                }
                for vertex in &vertices {
                    bounds.grow(vertex.position);
                }
                meshes.push((
                    Mesh {
                        material,
                        vertices,
                        indices,
                        bounds: BBox::EMPTY,
                        lod: root_lod,
                        body_part: String::new(),
                        sub_model: 0,
                    },
                    mdl_part.name.clone(),
                    sub_model,
                ));
            }
        }
    }

    for (mut mesh, body_part, sub_model) in meshes {
        mesh.bounds = bounds;
        builder.add_mesh(mesh, root_lod, &body_part, sub_model);
    }
    Ok(())
}

/// First eyeball per named texture-table index.
fn eyeball_map(model: &MdlModel) -> HashMap<i32, &MdlEyeball> {
    let mut map = HashMap::new();
    for eye in &model.eyeballs {
        map.entry(eye.texture).or_insert(eye);
    }
    map
}

/// Iris projection rows for an eye shader: project positions along the
/// iris right/up axes, centered on the eyeball origin.
fn eye_material(handle: MaterialHandle, eye: &MdlEyeball) -> MeshMaterial {
    let iris_radius = eye.radius * eye.iris_scale;
    if iris_radius <= 0.0 {
        return MeshMaterial::Plain(handle);
    }
    let scale = 0.5 / iris_radius;
    let right = eye.forward.cross(eye.up).normalize_or_zero();
    let row = |axis: Vec3| {
        let scaled = axis * scale;
        Vec4::new(
            scaled.x,
            scaled.y,
            scaled.z,
            0.5 - scaled.dot(eye.origin),
        )
    };
    MeshMaterial::Eye {
        handle,
        iris_u: row(right),
        iris_v: row(eye.up),
    }
}

fn emit_strip_group(
    group: &VtxStripGroup,
    base: usize,
    vertex_count: usize,
    vvd: &Vvd,
    dedup: &mut HashMap<usize, u32>,
    vertices: &mut Vec<MeshVertex>,
    indices: &mut Vec<u32>,
) -> Result<()> {
    // Strip-group index -> global vvd index, through the vertex refs.
    let global = |index: u16| -> Result<usize> {
        let vert = group
            .verts
            .get(index as usize)
            .ok_or(DecodeError::Malformed("strip index out of range"))?;
        let g = base + vert.orig_mesh_vert_id as usize;
        if g >= vertex_count {
            return Err(DecodeError::Malformed("vertex reference out of range"));
        }
        Ok(g)
    };

    for strip in &group.strips {
        let end = strip
            .index_offset
            .checked_add(strip.num_indices)
            .filter(|&end| end <= group.indices.len())
            .ok_or(DecodeError::Malformed("strip range out of bounds"))?;
        let window = &group.indices[strip.index_offset..end];

        if strip.flags.contains(StripFlags::IsTriList) {
            for tri in window.chunks_exact(3) {
                emit_triangle(
                    [global(tri[0])?, global(tri[1])?, global(tri[2])?],
                    vvd,
                    dedup,
                    vertices,
                    indices,
                )?;
            }
        } else if strip.flags.contains(StripFlags::IsTriStrip) {
            for w in 0..window.len().saturating_sub(2) {
                // Alternate winding flips on odd positions.
                let (a, b) = if w % 2 == 1 {
                    (window[w + 1], window[w])
                } else {
                    (window[w], window[w + 1])
                };
                emit_triangle(
                    [global(a)?, global(b)?, global(window[w + 2])?],
                    vvd,
                    dedup,
                    vertices,
                    indices,
                )?;
            }
        }
    }
    Ok(())
}

fn emit_triangle(
    tri: [usize; 3],
    vvd: &Vvd,
    dedup: &mut HashMap<usize, u32>,
    vertices: &mut Vec<MeshVertex>,
    indices: &mut Vec<u32>,
) -> Result<()> {
    if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
        return Ok(());
    }
    let mut emitted = [0u32; 3];
    for (slot, &g) in emitted.iter_mut().zip(&tri) {
        *slot = match dedup.get(&g) {
            Some(&index) => index,
            None => {
                let index = vertices.len() as u32;
                vertices.push(build_vertex(vvd, g)?);
                dedup.insert(g, index);
                index
            }
        };
    }
    // Source winds clockwise; flip for the right-handed output.
    indices.push(emitted[0]);
    indices.push(emitted[2]);
    indices.push(emitted[1]);
    Ok(())
}

fn build_vertex(vvd: &Vvd, global: usize) -> Result<MeshVertex> {
    let vert = vvd.vertex(global)?;
    let tangent = vvd.tangent(global)?;
    let (bone_indices, bone_weights) = quantize_weights(&vert);
    Ok(MeshVertex {
        position: vert.pos,
        normal: vert.norm,
        tangent: tangent.truncate(),
        uv: vert.uv,
        bone_indices,
        bone_weights,
    })
}

/// 8-bit fixed-point weights. Rounding residue (either sign) lands on the
/// largest weight; ties pick the first.
fn quantize_weights(vert: &crate::vvd::VvdVertex) -> ([u8; 3], [u8; 3]) {
    let (weights, bone_ids) = (vert.bone_weight, vert.bone_id);
    let used = (vert.num_bones as usize).min(3);
    let mut ids = [0u8; 3];
    let mut q = [0i32; 3];
    for i in 0..used {
        ids[i] = bone_ids[i];
        q[i] = (weights[i] * 255.0).round() as i32;
    }
    let residual = 255 - q.iter().sum::<i32>();
    let mut largest = 0;
    for i in 1..3 {
        if q[i] > q[largest] {
            largest = i;
        }
    }
    q[largest] += residual;
    (ids, q.map(|w| w.clamp(0, 255) as u8))
}

fn resolve_material(
    texture: i32,
    textures: &[String],
    cd_paths: &[String],
    resolver: &dyn AssetResolver,
    materials: &dyn MaterialLoader,
) -> Option<MaterialHandle> {
    let name = usize::try_from(texture).ok().and_then(|i| textures.get(i))?;
    for search in cd_paths {
        let logical = if search.is_empty() {
            format!("materials/{name}")
        } else {
            format!("materials/{search}/{name}")
        };
        if resolver.exists(&format!("{logical}.vmt")) {
            if let Some(handle) = materials.load(&logical) {
                return Some(handle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vert(weights: [f32; 3], num_bones: u8) -> crate::vvd::VvdVertex {
        crate::vvd::VvdVertex {
            bone_weight: weights,
            bone_id: [0, 1, 2],
            num_bones,
            pos: Vec3::ZERO,
            norm: Vec3::Z,
            uv: glam::Vec2::ZERO,
        }
    }

    #[test]
    fn weights_always_sum_to_255() {
        for weights in [
            [1.0, 0.0, 0.0],
            [0.5, 0.5, 0.0],
            [0.333, 0.333, 0.334],
            [0.6, 0.3, 0.1],
            [0.7071, 0.2929, 0.0],
        ] {
            let (_, q) = quantize_weights(&vert(weights, 3));
            assert_eq!(
                q.iter().map(|&w| w as i32).sum::<i32>(),
                255,
                "weights {weights:?} -> {q:?}"
            );
        }
    }

    #[test]
    fn residual_prefers_first_on_tie() {
        // 0.5/0.5 rounds to 128+128 = 256; the extra comes off the first.
        let (_, q) = quantize_weights(&vert([0.5, 0.5, 0.0], 2));
        assert_eq!(q, [127, 128, 0]);
    }

    #[test]
    fn unused_slots_stay_zero() {
        let (ids, q) = quantize_weights(&vert([1.0, 0.25, 0.25], 1));
        assert_eq!(q, [255, 0, 0]);
        assert_eq!(ids[1], 0);
        assert_eq!(ids[2], 0);
    }

    #[test]
    fn eye_material_projects_iris() {
        let eye = MdlEyeball {
            origin: Vec3::new(0.0, 2.0, 0.0),
            up: Vec3::Z,
            forward: Vec3::X,
            radius: 0.5,
            iris_scale: 1.0,
            texture: 0,
        };
        match eye_material(MaterialHandle(7), &eye) {
            MeshMaterial::Eye {
                handle,
                iris_u,
                iris_v,
            } => {
                assert_eq!(handle, MaterialHandle(7));
                // right = forward x up = -Y; scale = 1.
                assert!(iris_u.abs_diff_eq(Vec4::new(0.0, -1.0, 0.0, 2.5), 1e-5));
                assert!(iris_v.abs_diff_eq(Vec4::new(0.0, 0.0, 1.0, 0.5), 1e-5));
            }
            other => panic!("unexpected material {other:?}"),
        }
    }

    #[test]
    fn zero_radius_eye_falls_back_to_plain() {
        let eye = MdlEyeball {
            origin: Vec3::ZERO,
            up: Vec3::Z,
            forward: Vec3::X,
            radius: 0.0,
            iris_scale: 1.0,
            texture: 0,
        };
        assert!(matches!(
            eye_material(MaterialHandle(1), &eye),
            MeshMaterial::Plain(MaterialHandle(1))
        ));
    }
}
