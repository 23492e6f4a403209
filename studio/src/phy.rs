//! PHY reader: the 16-byte file header, the size-prefixed per-solid
//! collision blobs, the trailing ragdoll KeyValues text, and the IVP
//! compact-surface ledge walk that turns a blob into convex hulls.

use glam::{vec3, Vec3};

use crate::binaries::BinaryData;
use crate::error::{DecodeError, Result};

/// IVP stores meters; the engine wants inches.
pub const METERS_TO_INCHES: f32 = 39.3701;

pub const PHY_HEADER_SIZE: usize = 16;
pub const MAX_SOLIDS: i32 = 128;

const VPHY_ID: [u8; 4] = *b"VPHY";
const LEGACY_IDS: [[u8; 4]; 3] = [[0; 4], *b"IVPS", *b"SPVI"];

const COLLIDE_HEADER_SIZE: usize = 8; // vphysicsID + version + modelType
const COMPACT_SURFACE_HEADER_SIZE: usize = 20; // size + dragAxisAreas + axisMapSize
const LEDGE_NODE_SIZE: usize = 28;
const LEDGE_SIZE: usize = 16;
const TRIANGLE_SIZE: usize = 16;
const POLY_POINT_SIZE: usize = 16;

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PhyHeader {
    pub header_size: i32,
    pub id: i32,
    pub solid_count: i32,
    pub checksum: i32,
}

pub struct Phy<'a> {
    bytes: &'a [u8],
    header: PhyHeader,
    /// Byte ranges of the solid blobs, in file order.
    solids: Vec<(usize, usize)>,
    /// Start of the trailing KeyValues text.
    text_start: usize,
}

impl<'a> Phy<'a> {
    pub fn read(bytes: &'a [u8]) -> Result<Self> {
        let header = PhyHeader::read(bytes, 0)?;
        let (header_size, solid_count) = (header.header_size, header.solid_count);
        if header_size != PHY_HEADER_SIZE as i32 {
            return Err(DecodeError::Malformed("phy header size"));
        }
        if !(1..=MAX_SOLIDS).contains(&solid_count) {
            return Err(DecodeError::Malformed("phy solid count out of range"));
        }

        let mut solids = Vec::with_capacity(solid_count as usize);
        let mut at = PHY_HEADER_SIZE;
        for _ in 0..solid_count {
            let size = i32::read(bytes, at)?;
            if size < 0 {
                return Err(DecodeError::Malformed("negative solid size"));
            }
            let start = at + 4;
            let end = start
                .checked_add(size as usize)
                .filter(|&end| end <= bytes.len())
                .ok_or(DecodeError::Malformed("solid blob out of bounds"))?;
            solids.push((start, end));
            at = end;
        }

        Ok(Self {
            bytes,
            header,
            solids,
            text_start: at,
        })
    }

    pub fn header(&self) -> &PhyHeader {
        &self.header
    }

    pub fn solid_count(&self) -> usize {
        self.solids.len()
    }

    pub fn solid(&self, index: usize) -> Option<&'a [u8]> {
        let &(start, end) = self.solids.get(index)?;
        Some(&self.bytes[start..end])
    }

    /// The ragdoll KeyValues text after the last solid blob.
    pub fn keyvalues_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes[self.text_start..]).into_owned()
    }
}

/// Decode one solid blob into convex hulls, already converted to Source
/// space. Each hull is the distinct point set of one compact ledge, in
/// first-walked order; ledges with fewer than four distinct points are
/// dropped.
pub fn decode_solid(blob: &[u8]) -> Result<Vec<Vec<Vec3>>> {
    let surface = locate_compact_surface(blob)?;
    let root_rel = i32::read(surface, 32)?;
    let root = checked_node_offset(surface, 0, root_rel)?;

    let mut hulls = Vec::new();
    let mut stack = vec![root];
    // A corrupt tree cannot visit more nodes than could possibly exist.
    let mut budget = surface.len() / LEDGE_NODE_SIZE + 1;

    while let Some(node_at) = stack.pop() {
        if budget == 0 {
            return Err(DecodeError::Malformed("ledge tree does not terminate"));
        }
        budget -= 1;

        let right = i32::read(surface, node_at)?;
        let ledge = i32::read(surface, node_at + 4)?;
        if ledge != 0 {
            let ledge_at = checked_node_offset(surface, node_at, ledge)?;
            if let Some(points) = decode_ledge(surface, ledge_at)? {
                hulls.push(points);
            }
        }
        if right != 0 {
            stack.push(checked_node_offset(surface, node_at, right)?);
            stack.push(checked_node_offset(surface, node_at, LEDGE_NODE_SIZE as i32)?);
        }
    }
    Ok(hulls)
}

/// Find the compact surface inside a blob: either behind a `VPHY` collide
/// header, or the blob itself in the legacy layout.
fn locate_compact_surface(blob: &[u8]) -> Result<&[u8]> {
    if blob.get(0..4) == Some(&VPHY_ID) {
        // collideheader_t with modelType at byte 6; only convex (0).
        let model_type = i16::read(blob, 6)?;
        if model_type != 0 {
            return Err(DecodeError::Malformed("unsupported collide model type"));
        }
        let body = blob
            .get(COLLIDE_HEADER_SIZE + COMPACT_SURFACE_HEADER_SIZE..)
            .ok_or(DecodeError::Malformed("collide header out of bounds"))?;
        if body.len() < 48 {
            return Err(DecodeError::Malformed("compact surface truncated"));
        }
        return Ok(body);
    }

    let ident = blob
        .get(44..48)
        .ok_or(DecodeError::Malformed("compact surface truncated"))?;
    if !LEGACY_IDS.iter().any(|id| id == ident) {
        return Err(DecodeError::Malformed("unknown solid ident"));
    }
    Ok(blob)
}

fn checked_node_offset(surface: &[u8], base: usize, rel: i32) -> Result<usize> {
    let at = base as i64 + rel as i64;
    if at < 0 || at as usize + LEDGE_SIZE > surface.len() {
        return Err(DecodeError::Malformed("ledge tree offset out of bounds"));
    }
    Ok(at as usize)
}

/// Distinct points of one compact ledge, converted to Source space.
/// `None` when the ledge has fewer than four distinct points.
fn decode_ledge(surface: &[u8], ledge_at: usize) -> Result<Option<Vec<Vec3>>> {
    let point_rel = i32::read(surface, ledge_at)?;
    let n_triangles = i16::read(surface, ledge_at + 12)?;
    if n_triangles < 0 {
        return Err(DecodeError::Malformed("negative triangle count"));
    }

    let points_at = ledge_at as i64 + point_rel as i64;
    if points_at < 0 || points_at as usize > surface.len() {
        return Err(DecodeError::Malformed("ledge points out of bounds"));
    }
    let points_at = points_at as usize;

    let mut indices: Vec<u16> = Vec::new();
    for t in 0..n_triangles as usize {
        let tri_at = ledge_at + LEDGE_SIZE + t * TRIANGLE_SIZE;
        for e in 0..3 {
            let edge = u32::read(surface, tri_at + 4 + e * 4)?;
            let start_point = (edge & 0xFFFF) as u16;
            if !indices.contains(&start_point) {
                indices.push(start_point);
            }
        }
    }
    if indices.len() < 4 {
        return Ok(None);
    }

    let mut hull = Vec::with_capacity(indices.len());
    for index in indices {
        let at = points_at + index as usize * POLY_POINT_SIZE;
        let x = f32::read(surface, at)?;
        let y = f32::read(surface, at + 4)?;
        let z = f32::read(surface, at + 8)?;
        hull.push(ivp_to_source(vec3(x, y, z)));
    }
    Ok(Some(hull))
}

/// IVP is y-up meters; Source is z-up inches.
pub fn ivp_to_source(p: Vec3) -> Vec3 {
    vec3(p.x, p.z, -p.y) * METERS_TO_INCHES
}

#[cfg(test)]
pub mod test_support {
    //! Byte builders shared with the integration tests.

    use super::*;

    /// A legacy-layout solid blob holding one ledge over `points`, with
    /// `tris` indexing into them.
    pub fn legacy_solid_blob(points: &[[f32; 3]], tris: &[[u16; 3]]) -> Vec<u8> {
        let node_at = 48usize;
        let ledge_at = node_at + LEDGE_NODE_SIZE;
        let tris_at = ledge_at + LEDGE_SIZE;
        let points_at = tris_at + tris.len() * TRIANGLE_SIZE;

        let mut b = vec![0u8; points_at + points.len() * POLY_POINT_SIZE];
        b[32..36].copy_from_slice(&(node_at as i32).to_le_bytes());
        b[44..48].copy_from_slice(b"IVPS");

        // Leaf node: no right child, ledge immediately after.
        b[node_at..node_at + 4].copy_from_slice(&0i32.to_le_bytes());
        b[node_at + 4..node_at + 8]
            .copy_from_slice(&(LEDGE_NODE_SIZE as i32).to_le_bytes());

        let point_rel = (points_at - ledge_at) as i32;
        b[ledge_at..ledge_at + 4].copy_from_slice(&point_rel.to_le_bytes());
        b[ledge_at + 12..ledge_at + 14].copy_from_slice(&(tris.len() as i16).to_le_bytes());

        for (t, tri) in tris.iter().enumerate() {
            let tri_at = tris_at + t * TRIANGLE_SIZE;
            for (e, &start_point) in tri.iter().enumerate() {
                let edge = start_point as u32;
                b[tri_at + 4 + e * 4..tri_at + 8 + e * 4].copy_from_slice(&edge.to_le_bytes());
            }
        }
        for (i, p) in points.iter().enumerate() {
            let at = points_at + i * POLY_POINT_SIZE;
            b[at..at + 4].copy_from_slice(&p[0].to_le_bytes());
            b[at + 4..at + 8].copy_from_slice(&p[1].to_le_bytes());
            b[at + 8..at + 12].copy_from_slice(&p[2].to_le_bytes());
        }
        b
    }

    /// Unit tetrahedron in IVP space.
    pub fn tetra_points() -> Vec<[f32; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
        ]
    }

    pub fn tetra_tris() -> Vec<[u16; 3]> {
        vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]]
    }

    /// A complete `.phy` file from pre-built solid blobs plus trailing
    /// KeyValues text.
    pub fn phy_file(solids: &[Vec<u8>], text: &str) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&(PHY_HEADER_SIZE as i32).to_le_bytes());
        b.extend_from_slice(&0i32.to_le_bytes());
        b.extend_from_slice(&(solids.len() as i32).to_le_bytes());
        b.extend_from_slice(&0x1234i32.to_le_bytes());
        for solid in solids {
            b.extend_from_slice(&(solid.len() as i32).to_le_bytes());
            b.extend_from_slice(solid);
        }
        b.extend_from_slice(text.as_bytes());
        b
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn splits_solids_and_text() {
        let blob = legacy_solid_blob(&tetra_points(), &tetra_tris());
        let file = phy_file(&[blob.clone()], "solid { \"index\" \"0\" }");
        let phy = Phy::read(&file).unwrap();
        assert_eq!(phy.solid_count(), 1);
        assert_eq!(phy.solid(0).unwrap(), &blob[..]);
        assert!(phy.keyvalues_text().contains("solid"));
    }

    #[test]
    fn solid_count_range_enforced() {
        let mut file = phy_file(&[], "");
        file[8..12].copy_from_slice(&0i32.to_le_bytes());
        assert!(Phy::read(&file).is_err());
        file[8..12].copy_from_slice(&129i32.to_le_bytes());
        assert!(Phy::read(&file).is_err());
    }

    #[test]
    fn tetra_decodes_to_one_hull_in_source_space() {
        let blob = legacy_solid_blob(&tetra_points(), &tetra_tris());
        let hulls = decode_solid(&blob).unwrap();
        assert_eq!(hulls.len(), 1);
        let hull = &hulls[0];
        assert_eq!(hull.len(), 4);
        // (1, 0, 0) meters -> (K, 0, 0) inches; (0, 1, 0) -> (0, 0, -K).
        assert!(hull.contains(&vec3(METERS_TO_INCHES, 0.0, 0.0)));
        assert!(hull.contains(&vec3(0.0, 0.0, -METERS_TO_INCHES)));
        assert!(hull.contains(&vec3(0.0, METERS_TO_INCHES, 0.0)));
    }

    #[test]
    fn degenerate_ledge_yields_no_hull() {
        // A single triangle only references three points.
        let blob = legacy_solid_blob(&tetra_points(), &[[0, 1, 2]]);
        assert!(decode_solid(&blob).unwrap().is_empty());
    }

    #[test]
    fn unknown_ident_rejected() {
        let mut blob = legacy_solid_blob(&tetra_points(), &tetra_tris());
        blob[44..48].copy_from_slice(b"XXXX");
        assert!(decode_solid(&blob).is_err());
    }

    #[test]
    fn vphy_header_skipped() {
        let legacy = legacy_solid_blob(&tetra_points(), &tetra_tris());
        let mut blob = vec![0u8; 28];
        blob[0..4].copy_from_slice(b"VPHY");
        // modelType 0 at byte 6 already zeroed.
        blob.extend_from_slice(&legacy);
        let hulls = decode_solid(&blob).unwrap();
        assert_eq!(hulls.len(), 1);
    }
}
