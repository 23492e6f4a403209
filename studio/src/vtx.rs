//! VTX (version 7) topology reader: body parts → models → LODs → meshes →
//! strip groups → (vertex refs, indices, strips).
//!
//! Strip groups and strips grew two trailing topology fields when the MDL
//! format hit version 49; the VTX version stayed at 7, so the owning MDL's
//! version decides the stride.

use flagset::{flags, FlagSet};

use crate::binaries::{offset_at, BinArray, BinaryData};
use crate::error::{DecodeError, Result};

pub const VTX_VERSION: i32 = 7;

flags! {
    pub enum StripFlags: u8 {
        IsTriList = 0x01,
        IsTriStrip = 0x02,
    }
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxHeader {
    pub version: i32, // OPTIMIZED_MODEL_FILE_VERSION, 7

    // hardware params the model was optimized against
    pub vert_cache_size: i32,
    pub max_bones_per_strip: u16,
    pub max_bones_per_tri: u16,
    pub max_bones_per_vert: i32,

    pub check_sum: i32, // must match the .mdl

    pub num_lods: i32,
    pub material_replacement_list_offset: i32,

    pub body_parts: BinArray<VtxBodyPartHeader>,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxBodyPartHeader {
    pub models: BinArray<VtxModelHeader>,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxModelHeader {
    pub lods: BinArray<VtxModelLodHeader>,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxModelLodHeader {
    pub meshes: BinArray<VtxMeshHeader>,
    pub switch_point: f32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxMeshHeader {
    pub strip_groups: BinArray<()>, // stride is version-dependent
    pub flags: u8,
}

/// Fixed 25-byte prefix of a strip group; versions ≥ 49 append
/// `numTopologyIndices`/`topologyOffset`.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxStripGroupHeader {
    pub verts: BinArray<VtxVertex>,
    pub indices: BinArray<u16>,
    pub strips: BinArray<()>, // stride is version-dependent
    pub flags: u8,
}

/// Fixed 27-byte prefix of a strip, same version caveat as above.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxStripHeader {
    pub num_indices: i32,
    pub index_offset: i32,

    pub num_verts: i32,
    pub vert_offset: i32,

    pub num_bones: i16,
    pub flags: u8,

    pub num_bone_state_changes: i32,
    pub bone_state_change_offset: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VtxVertex {
    pub bone_weight_index: [u8; 3],
    pub num_bones: u8,

    /// Index of the referenced vertex, relative to the owning mdl mesh.
    pub orig_mesh_vert_id: u16,

    pub bone_id: [i8; 3],
}

pub struct VtxStrip {
    pub flags: FlagSet<StripFlags>,
    pub num_indices: usize,
    pub index_offset: usize,
}

pub struct VtxStripGroup {
    pub verts: Vec<VtxVertex>,
    pub indices: Vec<u16>,
    pub strips: Vec<VtxStrip>,
}

pub struct VtxMesh {
    pub flags: u8,
    pub strip_groups: Vec<VtxStripGroup>,
}

pub struct VtxLod(pub Vec<VtxMesh>);

pub struct VtxModel(pub Vec<VtxLod>);

pub struct VtxBodyPart(pub Vec<VtxModel>);

#[derive(Debug)]
pub struct Vtx<'a> {
    bytes: &'a [u8],
    header: VtxHeader,
    strip_group_stride: usize,
    strip_stride: usize,
}

impl<'a> Vtx<'a> {
    pub fn read(bytes: &'a [u8], mdl_version: i32) -> Result<Self> {
        if bytes.len() < std::mem::size_of::<VtxHeader>() {
            return Err(DecodeError::MissingRequiredSibling("vtx"));
        }
        let header = VtxHeader::read(bytes, 0)?;
        if header.version != VTX_VERSION {
            return Err(DecodeError::MissingRequiredSibling("vtx"));
        }
        let extra = if mdl_version >= 49 { 8 } else { 0 };
        Ok(Self {
            bytes,
            header,
            strip_group_stride: std::mem::size_of::<VtxStripGroupHeader>() + extra,
            strip_stride: std::mem::size_of::<VtxStripHeader>() + extra,
        })
    }

    pub fn checksum(&self) -> i32 {
        self.header.check_sum
    }

    pub fn num_lods(&self) -> i32 {
        self.header.num_lods
    }

    pub fn body_parts(&self) -> Result<Vec<VtxBodyPart>> {
        let mut body = Vec::with_capacity(self.header.body_parts.len());
        for (part_at, part) in self.header.body_parts.read(self.bytes, 0)? {
            let mut models = Vec::with_capacity(part.models.len());
            for (model_at, model) in part.models.read(self.bytes, part_at)? {
                let mut lods = Vec::with_capacity(model.lods.len());
                for (lod_at, lod) in model.lods.read(self.bytes, model_at)? {
                    let mut meshes = Vec::with_capacity(lod.meshes.len());
                    for (mesh_at, mesh) in lod.meshes.read(self.bytes, lod_at)? {
                        meshes.push(VtxMesh {
                            flags: mesh.flags,
                            strip_groups: self.read_strip_groups(mesh_at, &mesh)?,
                        });
                    }
                    lods.push(VtxLod(meshes));
                }
                models.push(VtxModel(lods));
            }
            body.push(VtxBodyPart(models));
        }
        Ok(body)
    }

    fn read_strip_groups(&self, mesh_at: usize, mesh: &VtxMeshHeader) -> Result<Vec<VtxStripGroup>> {
        let (count, offset) = {
            let groups = mesh.strip_groups;
            (groups.count, groups.offset)
        };
        if count < 0 {
            return Err(DecodeError::Malformed("negative strip group count"));
        }
        let base = offset_at(self.bytes, mesh_at, offset, "strip groups out of bounds")?;

        let mut strip_groups = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let sg_at = base + i * self.strip_group_stride;
            let sg = VtxStripGroupHeader::read(self.bytes, sg_at)?;

            let verts = sg
                .verts
                .read(self.bytes, sg_at)?
                .into_iter()
                .map(|(_, v)| v)
                .collect();
            let indices = sg
                .indices
                .read(self.bytes, sg_at)?
                .into_iter()
                .map(|(_, v)| v)
                .collect();

            let (strip_count, strip_offset) = {
                let strips = sg.strips;
                (strips.count, strips.offset)
            };
            if strip_count < 0 {
                return Err(DecodeError::Malformed("negative strip count"));
            }
            let strips_at =
                offset_at(self.bytes, sg_at, strip_offset, "strips out of bounds")?;
            let mut strips = Vec::with_capacity(strip_count as usize);
            for s in 0..strip_count as usize {
                let strip = VtxStripHeader::read(self.bytes, strips_at + s * self.strip_stride)?;
                let (num_indices, index_offset) = (strip.num_indices, strip.index_offset);
                if num_indices < 0 || index_offset < 0 {
                    return Err(DecodeError::Malformed("strip index range out of bounds"));
                }
                strips.push(VtxStrip {
                    flags: FlagSet::new_truncated(strip.flags),
                    num_indices: num_indices as usize,
                    index_offset: index_offset as usize,
                });
            }

            strip_groups.push(VtxStripGroup {
                verts,
                indices,
                strips,
            });
        }
        Ok(strip_groups)
    }
}
