//! VVD (`vertexFileHeader_t`) reader: the 48-byte vertex stream, the
//! parallel 16-byte tangent stream, and the LOD fixup remapping.

use glam::{Vec2, Vec3, Vec4};

use crate::binaries::{read_array, BinaryData};
use crate::error::{DecodeError, Result};

pub const VVD_ID: [u8; 4] = *b"IDSV";
pub const VVD_VERSION: i32 = 4;

pub const VERTEX_SIZE: usize = 48;
pub const TANGENT_SIZE: usize = 16;

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VertexFileHeader {
    pub id: [u8; 4],  // MODEL_VERTEX_FILE_ID
    pub version: i32, // MODEL_VERTEX_FILE_VERSION
    pub checksum: i32, // same as studiohdr_t, ensures sync
    pub num_lods: i32,
    pub num_lod_vertexes: [i32; 8], // num verts for desired root lod
    pub num_fixups: i32,
    pub fixup_table_start: i32,
    pub vertex_data_start: i32,
    pub tangent_data_start: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct VvdFixup {
    lod: i32,
    src: i32,
    count: i32,
}

/// `mstudiovertex_t`: exactly 48 bytes.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VvdVertex {
    pub bone_weight: [f32; 3],
    pub bone_id: [u8; 3],
    pub num_bones: u8,
    pub pos: Vec3,
    pub norm: Vec3,
    pub uv: Vec2,
}

/// A fixup with its destination start precomputed for the selected root
/// LOD window.
#[derive(Copy, Clone, Debug)]
struct Fixup {
    dst: i32,
    src: i32,
    count: i32,
}

#[derive(Debug)]
pub struct Vvd<'a> {
    bytes: &'a [u8],
    header: VertexFileHeader,
    /// Fixups with `lod >= root_lod`, in table order; empty when the file
    /// has no fixup table.
    fixups: Vec<Fixup>,
}

impl<'a> Vvd<'a> {
    pub fn read(bytes: &'a [u8], root_lod: u8) -> Result<Self> {
        if bytes.len() < std::mem::size_of::<VertexFileHeader>() {
            return Err(DecodeError::MissingRequiredSibling("vvd"));
        }
        let header = VertexFileHeader::read(bytes, 0)?;
        if header.id != VVD_ID || header.version != VVD_VERSION {
            return Err(DecodeError::MissingRequiredSibling("vvd"));
        }

        let num_fixups = header.num_fixups;
        if num_fixups < 0 {
            return Err(DecodeError::Malformed("negative fixup count"));
        }
        let table_at = header.fixup_table_start;
        if table_at < 0 {
            return Err(DecodeError::Malformed("fixup table out of bounds"));
        }
        let raw: Vec<(usize, VvdFixup)> =
            read_array(bytes, table_at as usize, num_fixups as usize)?;

        // The root-LOD vertex stream is the concatenation of every fixup
        // at that LOD or finer; dst positions accumulate across the kept
        // entries only.
        let mut fixups = Vec::with_capacity(raw.len());
        let mut dst = 0;
        for (_, fixup) in raw {
            if fixup.lod < root_lod as i32 {
                continue;
            }
            if fixup.count < 0 || fixup.src < 0 {
                return Err(DecodeError::Malformed("fixup range out of bounds"));
            }
            fixups.push(Fixup {
                dst,
                src: fixup.src,
                count: fixup.count,
            });
            dst += fixup.count;
        }

        Ok(Self {
            bytes,
            header,
            fixups,
        })
    }

    pub fn checksum(&self) -> i32 {
        self.header.checksum
    }

    /// Vertices in the root-LOD stream.
    pub fn vertex_count(&self, root_lod: u8) -> usize {
        let counts = self.header.num_lod_vertexes;
        counts[(root_lod as usize).min(7)].max(0) as usize
    }

    /// Map a stream index through the fixup table to a raw array index.
    fn resolve(&self, index: usize) -> usize {
        if self.fixups.is_empty() {
            return index;
        }
        for fixup in &self.fixups {
            let rel = index as i32 - fixup.dst;
            if rel >= 0 && rel < fixup.count {
                return (fixup.src + rel) as usize;
            }
        }
        // No fixup covers this vertex; use it untranslated.
        index
    }

    pub fn vertex(&self, index: usize) -> Result<VvdVertex> {
        let raw = self.resolve(index);
        let start = self.header.vertex_data_start;
        if start < 0 {
            return Err(DecodeError::Malformed("vertex data out of bounds"));
        }
        VvdVertex::read(self.bytes, start as usize + raw * VERTEX_SIZE)
    }

    pub fn tangent(&self, index: usize) -> Result<Vec4> {
        let raw = self.resolve(index);
        let start = self.header.tangent_data_start;
        if start < 0 {
            return Err(DecodeError::Malformed("tangent data out of bounds"));
        }
        Vec4::read(self.bytes, start as usize + raw * TANGENT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn struct_sizes() {
        assert_eq!(size_of::<VertexFileHeader>(), 64);
        assert_eq!(size_of::<VvdVertex>(), VERTEX_SIZE);
        assert_eq!(size_of::<VvdFixup>(), 12);
    }

    fn build_vvd(fixups: &[(i32, i32, i32)], verts: &[f32]) -> Vec<u8> {
        // verts: one per vertex, stored in pos.x for identification.
        let header_size = 64usize;
        let fixup_bytes = fixups.len() * 12;
        let vert_start = header_size + fixup_bytes;
        let tangent_start = vert_start + verts.len() * VERTEX_SIZE;

        let mut b = Vec::new();
        b.extend_from_slice(&VVD_ID);
        b.extend_from_slice(&VVD_VERSION.to_le_bytes());
        b.extend_from_slice(&0x1234i32.to_le_bytes());
        b.extend_from_slice(&1i32.to_le_bytes()); // num_lods
        for _ in 0..8 {
            b.extend_from_slice(&(verts.len() as i32).to_le_bytes());
        }
        b.extend_from_slice(&(fixups.len() as i32).to_le_bytes());
        b.extend_from_slice(&(header_size as i32).to_le_bytes());
        b.extend_from_slice(&(vert_start as i32).to_le_bytes());
        b.extend_from_slice(&(tangent_start as i32).to_le_bytes());
        for (lod, src, count) in fixups {
            b.extend_from_slice(&lod.to_le_bytes());
            b.extend_from_slice(&src.to_le_bytes());
            b.extend_from_slice(&count.to_le_bytes());
        }
        for &v in verts {
            let mut vert = [0u8; VERTEX_SIZE];
            vert[0..4].copy_from_slice(&1.0f32.to_le_bytes()); // weight
            vert[15] = 1; // num_bones
            vert[16..20].copy_from_slice(&v.to_le_bytes()); // pos.x
            b.extend_from_slice(&vert);
        }
        for _ in verts {
            b.extend_from_slice(&[0u8; TANGENT_SIZE]);
        }
        b
    }

    #[test]
    fn fixup_free_and_full_cover_fixup_agree() {
        let verts = [10.0, 20.0, 30.0, 40.0];
        let plain = build_vvd(&[], &verts);
        let fixed = build_vvd(&[(0, 0, 4)], &verts);

        let a = Vvd::read(&plain, 0).unwrap();
        let b = Vvd::read(&fixed, 0).unwrap();
        for i in 0..4 {
            let (plain_pos, fixed_pos) = (a.vertex(i).unwrap().pos, b.vertex(i).unwrap().pos);
            assert_eq!(plain_pos, fixed_pos);
        }
    }

    #[test]
    fn fixups_below_root_lod_are_skipped() {
        // Two fixups: lod 0 covers raw [0..2), lod 1 covers raw [2..4).
        // At root lod 1 the stream is just the second range.
        let verts = [10.0, 20.0, 30.0, 40.0];
        let bytes = build_vvd(&[(1, 2, 2), (0, 0, 2)], &verts);
        let vvd = Vvd::read(&bytes, 1).unwrap();
        let first = vvd.vertex(0).unwrap().pos;
        let second = vvd.vertex(1).unwrap().pos;
        assert_eq!(first.x, 30.0);
        assert_eq!(second.x, 40.0);
    }

    #[test]
    fn out_of_range_vertex_is_error() {
        let bytes = build_vvd(&[], &[1.0]);
        let vvd = Vvd::read(&bytes, 0).unwrap();
        assert!(vvd.vertex(0).is_ok());
        assert!(vvd.vertex(1).is_err());
    }

    #[test]
    fn bad_magic_is_missing_sibling() {
        let mut bytes = build_vvd(&[], &[1.0]);
        bytes[0] = b'X';
        assert_eq!(
            Vvd::read(&bytes, 0).unwrap_err(),
            DecodeError::MissingRequiredSibling("vvd")
        );
    }
}
