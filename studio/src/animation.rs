//! Animation decode: expands each sequence's compressed per-bone tracks
//! into dense per-frame transform arrays. Handles raw quaternion 48/64 and
//! half-float payloads, RLE value tracks, sectioned storage, `.ani` block
//! side-files, and include-model sequences remapped onto the main skeleton.

use glam::{Quat, Vec3};
use half::f16;

use crate::binaries::BinaryData;
use crate::error::Result;
use crate::mdl::{Mdl, MdlAnimDesc, StudioAnim, StudioAnimBlock, StudioAnimSection};
use crate::model::{ModelBuilder, Transform};
use crate::skeleton::Skeleton;

/// Per-bone record flags (`mstudioanim_t`).
const ANIM_RAWPOS: u8 = 0x01;
const ANIM_RAWROT: u8 = 0x02;
const ANIM_ANIMPOS: u8 = 0x04;
const ANIM_ANIMROT: u8 = 0x08;
const ANIM_RAWROT2: u8 = 0x20;

/// Upper bound on records per frame chain; real chains carry at most one
/// record per bone.
const MAX_CHAIN_RECORDS: usize = 1024;

/// One MDL contributing sequences: the main model itself, or an include
/// model with its bone indices remapped onto the main skeleton.
pub struct AnimSource<'a> {
    pub mdl: &'a Mdl<'a>,
    /// Skeleton of the contributing MDL (base poses and track scales).
    pub skeleton: &'a Skeleton,
    pub ani: Option<&'a [u8]>,
    /// Local bone index -> main bone index; `None` entries are dropped.
    /// Absent for the main model (identity mapping).
    pub remap: Option<Vec<Option<usize>>>,
}

/// Decode every sequence of `source` into the builder. Frame-level
/// problems are local: a frame that cannot be located is skipped, and a
/// sequence with no decodable frames emits nothing.
pub fn decode_animations(
    source: &AnimSource,
    main_skeleton: &Skeleton,
    builder: &mut ModelBuilder,
) -> Result<()> {
    let descs = source.mdl.anim_descs()?;
    let blocks = source.mdl.anim_blocks()?;
    let sequences = source.mdl.sequences()?;

    let main_base: Vec<Transform> = (0..main_skeleton.len())
        .map(|b| main_skeleton.local(b))
        .collect();

    for sequence in &sequences {
        let Some(desc) = sequence.anim_index.and_then(|i| descs.get(i)) else {
            continue;
        };
        if desc.num_frames <= 0 {
            continue;
        }

        let delta = desc.is_delta();
        let mut frames = Vec::with_capacity(desc.num_frames as usize);
        for frame in 0..desc.num_frames as usize {
            let Some((buffer, at, data_frame)) = locate_frame_data(source, &blocks, desc, frame)
            else {
                log::debug!(
                    "animation {:?} frame {frame} has no reachable data",
                    sequence.name
                );
                continue;
            };

            let mut transforms: Vec<Transform> = if delta {
                vec![Transform::IDENTITY; main_skeleton.len()]
            } else {
                main_base.clone()
            };
            decode_frame(source, buffer, at, data_frame, delta, &mut transforms);
            frames.push(transforms);
        }

        if frames.is_empty() {
            continue;
        }
        let mut animation = builder
            .add_animation(&sequence.name, desc.fps)
            .with_looping(desc.is_looping())
            .with_delta(delta);
        for frame in frames {
            animation.add_frame(frame);
        }
    }
    Ok(())
}

/// Resolve the (buffer, offset, frame) to decode for `frame`. Sectioned
/// storage can remap the frame: the special final-frame section decodes
/// at relative frame 0.
fn locate_frame_data<'a>(
    source: &AnimSource<'a>,
    blocks: &[StudioAnimBlock],
    desc: &MdlAnimDesc,
    frame: usize,
) -> Option<(&'a [u8], usize, usize)> {
    let (block, index, data_frame) = if desc.section_frames != 0 {
        let section_frames = desc.section_frames as usize;
        let num_frames = desc.num_frames as usize;
        // The final frame maps past the regular sections and decodes at
        // relative frame 0. Matches the engine's section arithmetic even
        // where its intent is unclear.
        let (section, data_frame) = if frame == num_frames - 1 {
            (num_frames / section_frames + 1, 0)
        } else {
            (frame / section_frames, frame)
        };
        let entry_at = (desc.offset as i64 + desc.section_offset as i64) as usize
            + section * std::mem::size_of::<StudioAnimSection>();
        let entry = StudioAnimSection::read(source.mdl.bytes, entry_at).ok()?;
        (entry.anim_block, entry.anim_offset, data_frame)
    } else {
        (desc.anim_block, desc.anim_offset, frame)
    };

    if block == 0 {
        let at = desc.offset as i64 + index as i64;
        (0..=source.mdl.bytes.len() as i64)
            .contains(&at)
            .then_some((source.mdl.bytes, at as usize, data_frame))
    } else {
        let ani = source.ani?;
        let block = usize::try_from(block).ok()?;
        let data_start = blocks.get(block)?.data_start;
        let at = data_start as i64 + index as i64;
        (0..=ani.len() as i64)
            .contains(&at)
            .then_some((ani, at as usize, data_frame))
    }
}

/// Walk one frame's record chain, writing decoded bones into `transforms`
/// (indexed by main-model bone). A malformed record ends the chain,
/// keeping whatever was decoded before it.
fn decode_frame(
    source: &AnimSource,
    buffer: &[u8],
    mut at: usize,
    frame: usize,
    delta: bool,
    transforms: &mut [Transform],
) {
    let local_bones = source.skeleton;
    for _ in 0..MAX_CHAIN_RECORDS {
        let Ok(record) = StudioAnim::read(buffer, at) else {
            return;
        };
        let payload = at + std::mem::size_of::<StudioAnim>();

        let local = record.bone as usize;
        if local < local_bones.len() {
            let dest = match &source.remap {
                Some(remap) => remap.get(local).copied().flatten(),
                None => Some(local),
            };
            if let Some(dest) = dest.filter(|&d| d < transforms.len()) {
                decode_bone(
                    buffer,
                    payload,
                    record.flags,
                    frame,
                    delta,
                    &local_bones.bones[local],
                    &mut transforms[dest],
                );
            }
        }

        let next = record.next_offset;
        if next == 0 {
            return;
        }
        let Some(next_at) = at.checked_add_signed(next as isize) else {
            return;
        };
        at = next_at;
    }
}

fn decode_bone(
    buffer: &[u8],
    payload: usize,
    flags: u8,
    frame: usize,
    delta: bool,
    bone: &crate::mdl::MdlBone,
    out: &mut Transform,
) {
    if flags & ANIM_RAWROT2 != 0 {
        if let Ok(raw) = u64::read(buffer, payload) {
            out.rotation = quaternion64(raw);
        }
    } else if flags & ANIM_RAWROT != 0 {
        if let Ok(q) = read_quaternion48(buffer, payload) {
            out.rotation = q;
        }
    } else if flags & ANIM_ANIMROT != 0 {
        if let Some(mut euler) = read_value_tracks(buffer, payload, frame, bone.rot_scale) {
            if !delta {
                euler += bone.rot;
            }
            out.rotation = quat_from_euler(euler);
        }
    }

    // Position payload sits behind whatever rotation payload is present.
    let mut pos_at = payload;
    if flags & ANIM_RAWROT != 0 {
        pos_at += 6;
    }
    if flags & ANIM_RAWROT2 != 0 {
        pos_at += 8;
    }
    if flags & ANIM_ANIMROT != 0 {
        pos_at += 6;
    }

    if flags & ANIM_RAWPOS != 0 {
        if let Ok(pos) = read_vector48(buffer, pos_at) {
            out.position = pos;
        }
    } else if flags & ANIM_ANIMPOS != 0 {
        if let Some(mut pos) = read_value_tracks(buffer, pos_at, frame, bone.pos_scale) {
            if !delta {
                pos += bone.pos;
            }
            out.position = pos;
        }
    }
}

/// Three per-axis RLE tracks behind a `mstudioanim_valueptr_t` (three i16
/// sub-offsets); a zero sub-offset contributes zero for that axis.
fn read_value_tracks(buffer: &[u8], at: usize, frame: usize, scale: Vec3) -> Option<Vec3> {
    let mut out = Vec3::ZERO;
    for axis in 0..3 {
        let sub_offset = i16::read(buffer, at + axis * 2).ok()?;
        if sub_offset > 0 {
            let track_at = (at as i64 + sub_offset as i64) as usize;
            out[axis] = extract_anim_value(buffer, track_at, frame) * scale[axis];
        }
    }
    Some(out)
}

/// Valve's RLE track walk: runs of `(valid, total)` byte pairs followed by
/// `valid` i16 values. Within a run, frames past `valid` hold the last
/// stored value. Overruns decode as 0.
pub fn extract_anim_value(buffer: &[u8], mut at: usize, mut frame: usize) -> f32 {
    loop {
        let Ok(valid) = u8::read(buffer, at) else {
            return 0.0;
        };
        let Ok(total) = u8::read(buffer, at + 1) else {
            return 0.0;
        };
        if total == 0 {
            return 0.0;
        }
        if frame < total as usize {
            if valid == 0 {
                return 0.0;
            }
            let k = frame.min(valid as usize - 1);
            let Ok(value) = i16::read(buffer, at + 2 + k * 2) else {
                return 0.0;
            };
            return value as f32;
        }
        frame -= total as usize;
        at += 2 + valid as usize * 2;
    }
}

fn read_vector48(buffer: &[u8], at: usize) -> Result<Vec3> {
    let x = u16::read(buffer, at)?;
    let y = u16::read(buffer, at + 2)?;
    let z = u16::read(buffer, at + 4)?;
    Ok(Vec3::new(
        f16::from_bits(x).to_f32(),
        f16::from_bits(y).to_f32(),
        f16::from_bits(z).to_f32(),
    ))
}

fn read_quaternion48(buffer: &[u8], at: usize) -> Result<Quat> {
    let x_raw = u16::read(buffer, at)?;
    let y_raw = u16::read(buffer, at + 2)?;
    let z_raw = u16::read(buffer, at + 4)?;
    Ok(quaternion48(x_raw, y_raw, z_raw))
}

pub fn quaternion48(x_raw: u16, y_raw: u16, z_raw: u16) -> Quat {
    let x = (x_raw as f32 - 32768.0) / 32768.0;
    let y = (y_raw as f32 - 32768.0) / 32768.0;
    let z = ((z_raw & 0x7FFF) as f32 - 16384.0) / 16384.0;
    let mut w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
    if z_raw & 0x8000 != 0 {
        w = -w;
    }
    Quat::from_xyzw(x, y, z, w)
}

pub fn quaternion64(raw: u64) -> Quat {
    let field = |shift: u32| {
        let bits = ((raw >> shift) & 0x1F_FFFF) as f32;
        (bits - 1_048_576.0) / 1_048_576.5
    };
    let x = field(0);
    let y = field(21);
    let z = field(42);
    let mut w = (1.0 - x * x - y * y - z * z).max(0.0).sqrt();
    if raw >> 63 != 0 {
        w = -w;
    }
    Quat::from_xyzw(x, y, z, w)
}

/// XYZ half-angle Euler-to-quaternion, matching the engine's
/// `AngleQuaternion`.
pub fn quat_from_euler(euler: Vec3) -> Quat {
    let (sx, cx) = (euler.x * 0.5).sin_cos();
    let (sy, cy) = (euler.y * 0.5).sin_cos();
    let (sz, cz) = (euler.z * 0.5).sin_cos();
    Quat::from_xyzw(
        sx * cy * cz - cx * sy * sz,
        cx * sy * cz + sx * cy * sz,
        cx * cy * sz - sx * sy * cz,
        cx * cy * cz + sx * sy * sz,
    )
    .normalize()
}

/// Case-insensitive bone-name remap from an include model's skeleton onto
/// the main skeleton. Unmatched bones map to `None` and are dropped from
/// any frame that references them.
pub fn build_bone_remap(include: &Skeleton, main: &Skeleton) -> Vec<Option<usize>> {
    include
        .bones
        .iter()
        .map(|bone| main.bone_index(&bone.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quaternion48_sign_bit_only_flips_w() {
        let plus = quaternion48(40000, 30000, 0x1234);
        let minus = quaternion48(40000, 30000, 0x1234 | 0x8000);
        assert_eq!(plus.x, minus.x);
        assert_eq!(plus.y, minus.y);
        assert_eq!(plus.z, minus.z);
        assert_eq!(plus.w, -minus.w);
    }

    #[test]
    fn quaternion48_identity() {
        let q = quaternion48(32768, 32768, 16384);
        assert!(q.abs_diff_eq(Quat::IDENTITY, 1e-4));
    }

    #[test]
    fn quaternion64_identity() {
        let raw = 1_048_576u64 | (1_048_576u64 << 21) | (1_048_576u64 << 42);
        assert!(quaternion64(raw).abs_diff_eq(Quat::IDENTITY, 1e-4));
    }

    #[test]
    fn euler_single_axis_matches_glam() {
        for (euler, axis) in [
            (Vec3::new(0.7, 0.0, 0.0), Quat::from_rotation_x(0.7)),
            (Vec3::new(0.0, 0.7, 0.0), Quat::from_rotation_y(0.7)),
            (Vec3::new(0.0, 0.0, 0.7), Quat::from_rotation_z(0.7)),
        ] {
            assert!(quat_from_euler(euler).abs_diff_eq(axis, 1e-5));
        }
    }

    fn track(runs: &[(u8, u8, &[i16])]) -> Vec<u8> {
        let mut b = Vec::new();
        for (valid, total, values) in runs {
            b.push(*valid);
            b.push(*total);
            for v in *values {
                b.extend_from_slice(&v.to_le_bytes());
            }
        }
        b
    }

    #[test]
    fn anim_value_reads_within_valid_run() {
        let bytes = track(&[(3, 5, &[10, 20, 30])]);
        assert_eq!(extract_anim_value(&bytes, 0, 0), 10.0);
        assert_eq!(extract_anim_value(&bytes, 0, 2), 30.0);
    }

    #[test]
    fn anim_value_holds_last_valid() {
        let bytes = track(&[(2, 6, &[10, 20])]);
        assert_eq!(extract_anim_value(&bytes, 0, 4), 20.0);
    }

    #[test]
    fn anim_value_walks_runs() {
        let bytes = track(&[(1, 2, &[7]), (2, 4, &[100, 200])]);
        assert_eq!(extract_anim_value(&bytes, 0, 1), 7.0); // held
        assert_eq!(extract_anim_value(&bytes, 0, 2), 100.0);
        assert_eq!(extract_anim_value(&bytes, 0, 3), 200.0);
    }

    #[test]
    fn anim_value_overrun_is_zero() {
        let bytes = track(&[(1, 2, &[7])]);
        assert_eq!(extract_anim_value(&bytes, 0, 10), 0.0);
    }
}
