//! MDL (`studiohdr_t`) reader. A borrowed view over the buffer: header
//! fields are validated once up front, every table is bounds-checked as it
//! is walked, and only decoded strings are allocated.

pub mod headers;

use glam::{Quat, Vec3};

use crate::binaries::{fixed_str, offset_at, read_str, BinaryData};
use crate::error::{DecodeError, Result};

pub use headers::*;

#[derive(Debug)]
pub struct Mdl<'a> {
    pub bytes: &'a [u8],
    header: StudioHeader,
}

/// One bone-table entry, decoded. Scales apply to the compressed
/// animation tracks targeting this bone.
#[derive(Clone, Debug)]
pub struct MdlBone {
    pub name: String,
    pub parent: Option<usize>,
    pub pos: Vec3,
    pub quat: Quat,
    pub rot: Vec3,
    pub pos_scale: Vec3,
    pub rot_scale: Vec3,
}

#[derive(Clone, Debug)]
pub struct MdlEyeball {
    pub origin: Vec3,
    pub up: Vec3,
    pub forward: Vec3,
    pub radius: f32,
    pub iris_scale: f32,
    pub texture: i32,
}

#[derive(Clone, Copy, Debug)]
pub struct MdlMesh {
    pub material: i32,
    pub vertex_offset: i32,
    pub num_vertices: i32,
}

#[derive(Clone, Debug)]
pub struct MdlModel {
    pub name: String,
    /// Byte offset of this model's first vertex in the vvd stream.
    pub vertex_index: i32,
    pub meshes: Vec<MdlMesh>,
    pub eyeballs: Vec<MdlEyeball>,
}

#[derive(Clone, Debug)]
pub struct MdlBodyPart {
    pub name: String,
    pub models: Vec<MdlModel>,
}

#[derive(Clone, Debug)]
pub struct MdlAnimDesc {
    /// Absolute offset of the descriptor; anim and section offsets are
    /// relative to it.
    pub offset: usize,
    pub name: String,
    pub fps: f32,
    pub flags: i32,
    pub num_frames: i32,
    pub anim_block: i32,
    pub anim_offset: i32,
    pub section_offset: i32,
    pub section_frames: i32,
}

impl MdlAnimDesc {
    pub fn is_delta(&self) -> bool {
        self.flags & STUDIO_DELTA != 0
    }

    pub fn is_looping(&self) -> bool {
        self.flags & STUDIO_LOOPING != 0
    }
}

#[derive(Clone, Debug)]
pub struct MdlSequence {
    pub name: String,
    pub flags: i32,
    /// Local animation index from blend-table entry (0, 0), when readable.
    pub anim_index: Option<usize>,
}

impl<'a> Mdl<'a> {
    pub fn read(bytes: &'a [u8]) -> Result<Self> {
        let mut id = [0u8; 4];
        id.copy_from_slice(bytes.get(0..4).unwrap_or(&[0; 4]));
        let version = bytes
            .get(4..8)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .unwrap_or(0);
        if id != STUDIO_ID || !(STUDIO_MIN_VERSION..=STUDIO_MAX_VERSION).contains(&version) {
            return Err(DecodeError::NotAStudioModel { id, version });
        }
        if bytes.len() < STUDIO_HEADER_SIZE {
            return Err(DecodeError::Malformed("mdl header truncated"));
        }
        let header = StudioHeader::read(bytes, 0)?;
        Ok(Self { bytes, header })
    }

    pub fn header(&self) -> &StudioHeader {
        &self.header
    }

    pub fn version(&self) -> i32 {
        self.header.version
    }

    pub fn checksum(&self) -> i32 {
        self.header.checksum
    }

    pub fn name(&self) -> String {
        fixed_str(&self.header.name)
    }

    pub fn root_lod(&self) -> u8 {
        self.header.root_lod
    }

    pub fn bones(&self) -> Result<Vec<MdlBone>> {
        let mut bones = Vec::with_capacity(self.header.bone.len());
        for (at, bone) in self.header.bone.read(self.bytes, 0)? {
            let parent = bone.parent;
            bones.push(MdlBone {
                name: bone.name_offset.read_str(self.bytes, at)?,
                parent: (parent >= 0).then_some(parent as usize),
                pos: bone.pos,
                quat: bone.quat,
                rot: bone.rot,
                pos_scale: bone.pos_scale,
                rot_scale: bone.rot_scale,
            });
        }
        Ok(bones)
    }

    /// Texture table names, lowercased and forward-slashed.
    pub fn textures(&self) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(self.header.texture.len());
        for (at, texture) in self.header.texture.read(self.bytes, 0)? {
            names.push(common::vpath::normalize(
                &texture.name_offset.read_str(self.bytes, at)?,
            ));
        }
        Ok(names)
    }

    /// `$cdmaterials` search paths, normalized with trailing slash removed.
    pub fn cd_texture_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::with_capacity(self.header.cd_texture.len());
        for (_, string_offset) in self.header.cd_texture.read(self.bytes, 0)? {
            let at = offset_at(self.bytes, 0, string_offset, "cd path out of bounds")?;
            let mut path = common::vpath::normalize(&read_str(self.bytes, at)?);
            while path.ends_with('/') {
                path.pop();
            }
            paths.push(path);
        }
        Ok(paths)
    }

    pub fn body_parts(&self) -> Result<Vec<MdlBodyPart>> {
        let mut parts = Vec::with_capacity(self.header.body_part.len());
        for (part_at, part) in self.header.body_part.read(self.bytes, 0)? {
            let models_at = offset_at(
                self.bytes,
                part_at,
                part.model_offset,
                "model table out of bounds",
            )?;
            let num_models = part.num_models;
            if num_models < 0 {
                return Err(DecodeError::Malformed("negative model count"));
            }
            let mut models = Vec::with_capacity(num_models as usize);
            for (model_at, model) in
                crate::binaries::read_array::<StudioModel>(self.bytes, models_at, num_models as usize)?
            {
                let mut meshes = Vec::with_capacity(model.meshes.len());
                for (_, mesh) in model.meshes.read(self.bytes, model_at)? {
                    meshes.push(MdlMesh {
                        material: mesh.material,
                        vertex_offset: mesh.vertex_offset,
                        num_vertices: mesh.num_vertices,
                    });
                }
                let mut eyeballs = Vec::with_capacity(model.eyeballs.len());
                for (_, eye) in model.eyeballs.read(self.bytes, model_at)? {
                    eyeballs.push(MdlEyeball {
                        origin: eye.origin,
                        up: eye.up,
                        forward: eye.forward,
                        radius: eye.radius,
                        iris_scale: eye.iris_scale,
                        texture: eye.texture,
                    });
                }
                models.push(MdlModel {
                    name: fixed_str(&model.name),
                    vertex_index: model.vertex_index,
                    meshes,
                    eyeballs,
                });
            }
            parts.push(MdlBodyPart {
                name: part.name_offset.read_str(self.bytes, part_at)?,
                models,
            });
        }
        Ok(parts)
    }

    pub fn anim_descs(&self) -> Result<Vec<MdlAnimDesc>> {
        let mut descs = Vec::with_capacity(self.header.local_anim.len());
        for (at, desc) in self.header.local_anim.read(self.bytes, 0)? {
            descs.push(MdlAnimDesc {
                offset: at,
                name: desc.name_offset.read_str(self.bytes, at)?,
                fps: desc.fps,
                flags: desc.flags,
                num_frames: desc.num_frames,
                anim_block: desc.anim_block,
                anim_offset: desc.anim_offset,
                section_offset: desc.section_offset,
                section_frames: desc.section_frames,
            });
        }
        Ok(descs)
    }

    pub fn sequences(&self) -> Result<Vec<MdlSequence>> {
        let anim_count = self.header.local_anim.len();
        let mut seqs = Vec::with_capacity(self.header.local_seq.len());
        for (at, seq) in self.header.local_seq.read(self.bytes, 0)? {
            // Blend-table entry (0, 0). A broken table only loses this
            // sequence, not the decode.
            let anim_index = offset_at(self.bytes, at, seq.anim_index_offset, "blend table")
                .and_then(|entry_at| i16::read(self.bytes, entry_at))
                .ok()
                .map(|idx| idx as usize)
                .filter(|&idx| idx < anim_count);
            seqs.push(MdlSequence {
                name: seq.name_offset.read_str(self.bytes, at)?,
                flags: seq.flags,
                anim_index,
            });
        }
        Ok(seqs)
    }

    /// Include-model file paths, in declaration order.
    pub fn include_model_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::with_capacity(self.header.include_model.len());
        for (at, group) in self.header.include_model.read(self.bytes, 0)? {
            let path = group.name_offset.read_str(self.bytes, at)?;
            if !path.is_empty() {
                paths.push(common::vpath::normalize(&path));
            }
        }
        Ok(paths)
    }

    pub fn anim_blocks(&self) -> Result<Vec<StudioAnimBlock>> {
        Ok(self
            .header
            .anim_block
            .read(self.bytes, 0)?
            .into_iter()
            .map(|(_, block)| block)
            .collect())
    }
}
