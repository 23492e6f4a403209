//! `studiohdr_t` and friends, straight from Valve's studio.h. All structs
//! are the packed on-disk layout; offsets inside an element are relative to
//! that element's own start unless noted.

use glam::{Quat, Vec3};

use crate::binaries::{BinArray, BinOffset};

pub const STUDIO_ID: [u8; 4] = *b"IDST";
/// Format versions this decoder accepts (HL2 through late Source 2013).
pub const STUDIO_MIN_VERSION: i32 = 44;
pub const STUDIO_MAX_VERSION: i32 = 49;
pub const STUDIO_HEADER_SIZE: usize = 408;

/// Sequence / animation descriptor flags.
pub const STUDIO_LOOPING: i32 = 0x0001;
pub const STUDIO_DELTA: i32 = 0x0004;

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioHeader {
    pub id: [u8; 4], // "IDST"
    pub version: i32,
    pub checksum: i32, // must match vvd/vtx
    pub name: [u8; 64],
    pub data_length: i32,

    pub eye_position: Vec3,
    pub illum_position: Vec3,
    pub hull_min: Vec3,
    pub hull_max: Vec3,
    pub view_bb_min: Vec3,
    pub view_bb_max: Vec3,

    pub flags: i32,

    pub bone: BinArray<StudioBone>,
    pub bone_controller: BinArray<()>,
    pub hitbox_set: BinArray<()>,
    pub local_anim: BinArray<StudioAnimDesc>,
    pub local_seq: BinArray<StudioSeqDesc>,

    pub activity_list_version: i32,
    pub events_indexed: i32,

    pub texture: BinArray<StudioTexture>,
    // Each entry is itself an offset (from file start) to a search path.
    pub cd_texture: BinArray<i32>,

    pub skin_reference_count: i32,
    pub skin_family_count: i32,
    pub skin_reference_index: i32,

    pub body_part: BinArray<StudioBodyPart>,
    pub attachment: BinArray<()>,

    pub local_node_count: i32,
    pub local_node_offset: i32,
    pub local_node_name_offset: i32,

    pub flex_desc: BinArray<()>,
    pub flex_controller: BinArray<()>,
    pub flex_rules: BinArray<()>,
    pub ik_chain: BinArray<()>,
    pub mouths: BinArray<()>,
    pub local_pose_param: BinArray<()>,

    pub surface_prop_offset: BinOffset,

    // Index first, then count.
    pub key_value_offset: i32,
    pub key_value_count: i32,

    pub ik_lock: BinArray<()>,

    pub mass: f32,
    pub contents: i32,

    pub include_model: BinArray<StudioModelGroup>,

    pub virtual_model: i32, // void* placeholder

    pub anim_block_name_offset: BinOffset,
    pub anim_block: BinArray<StudioAnimBlock>,
    pub anim_block_model: i32, // void* placeholder

    pub bone_table_name_offset: i32,

    pub vertex_base: i32, // void* placeholder
    pub offset_base: i32, // void* placeholder

    pub directional_dot_product: u8,
    pub root_lod: u8,
    pub num_allowed_root_lods: u8,
    unused_0: u8,
    pub zero_frame_cache_index: i32,

    pub flex_controller_ui: BinArray<()>,

    pub vert_anim_fixed_point_scale: f32,
    unused_1: i32,

    pub header_2_offset: i32,
    unused_2: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioBone {
    pub name_offset: BinOffset,
    pub parent: i32, // -1 for roots
    pub bone_controller: [i32; 6],

    pub pos: Vec3,
    pub quat: Quat,
    pub rot: Vec3, // radian euler, animation-track base
    pub pos_scale: Vec3,
    pub rot_scale: Vec3,

    pub pose_to_bone: [f32; 12],
    pub q_alignment: [f32; 4],

    pub flags: i32,
    pub procedural_rule_type: i32,
    pub procedural_rule_offset: i32,
    pub physics_bone: i32,
    pub surface_prop_offset: BinOffset,
    pub contents: i32,

    unused: [i32; 8],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioTexture {
    pub name_offset: BinOffset,
    pub flags: i32,
    pub used: i32,
    unused_0: i32,
    pub material: i32,        // IMaterial placeholder
    pub client_material: i32, // void* placeholder
    unused_1: [i32; 10],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioBodyPart {
    pub name_offset: BinOffset,
    pub num_models: i32,
    pub base: i32,
    pub model_offset: i32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioModel {
    pub name: [u8; 64],
    pub kind: i32,
    pub bounding_radius: f32,

    pub meshes: BinArray<StudioMesh>,

    pub num_vertices: i32,
    /// Byte offset into the vvd vertex stream; always a multiple of 48.
    pub vertex_index: i32,
    pub tangents_index: i32,

    pub num_attachments: i32,
    pub attachment_index: i32,

    pub eyeballs: BinArray<StudioEyeball>,

    pub vertex_data_p: i32,
    pub tangent_data_p: i32,

    unused: [i32; 8],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioMesh {
    pub material: i32, // texture table index
    pub model_offset: i32,

    pub num_vertices: i32,
    /// First vertex, relative to the owning model's vertex window.
    pub vertex_offset: i32,

    pub num_flexes: i32,
    pub flex_offset: i32,

    pub material_type: i32,
    pub material_param: i32,

    pub id: i32,
    pub center: Vec3,

    pub vertex_data_p: i32,
    pub lod_vertex_counts: [i32; 8],

    unused: [i32; 8],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioEyeball {
    pub name_offset: BinOffset,
    pub bone: i32,
    pub origin: Vec3,
    pub z_offset: f32,
    pub radius: f32,
    pub up: Vec3,
    pub forward: Vec3,
    pub texture: i32, // texture table index the iris is applied to

    unused_0: i32,
    pub iris_scale: f32,
    unused_1: i32,

    pub upper_flex_desc: [i32; 3],
    pub lower_flex_desc: [i32; 3],
    pub upper_target: [f32; 3],
    pub lower_target: [f32; 3],

    pub upper_lid_flex_desc: i32,
    pub lower_lid_flex_desc: i32,
    unused_2: [f32; 4],
    pub non_facs: u8,
    unused_3: [u8; 3],
    unused_4: [i32; 7],
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioAnimDesc {
    pub base_ptr: i32,
    pub name_offset: BinOffset,

    pub fps: f32,
    pub flags: i32,
    pub num_frames: i32,

    pub num_movements: i32,
    pub movement_offset: i32,

    pub ik_rule_zero_frame_offset: i32,
    unused_0: [i32; 5],

    /// 0 = data lives in the mdl buffer, otherwise an `.ani` block index.
    pub anim_block: i32,
    pub anim_offset: i32,

    pub num_ik_rules: i32,
    pub ik_rule_offset: i32,
    pub anim_block_ik_rule_offset: i32,

    pub num_local_hierarchy: i32,
    pub local_hierarchy_offset: i32,

    pub section_offset: i32,
    pub section_frames: i32,

    pub zero_frame_span: i16,
    pub zero_frame_count: i16,
    pub zero_frame_offset: i32,
    pub zero_frame_stall_time: f32,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioSeqDesc {
    pub base_ptr: i32,
    pub name_offset: BinOffset,
    pub activity_name_offset: i32,

    pub flags: i32,
    pub activity: i32,
    pub activity_weight: i32,

    pub num_events: i32,
    pub event_offset: i32,

    pub bb_min: Vec3,
    pub bb_max: Vec3,

    pub num_blends: i32,
    /// Offset to a `groupsize[0] * groupsize[1]` table of i16 animation
    /// indices; entry (0, 0) names the sequence's animation.
    pub anim_index_offset: i32,

    pub movement_index: i32,
    pub group_size: [i32; 2],
    pub param_index: [i32; 2],
    pub param_start: [f32; 2],
    pub param_end: [f32; 2],
    pub param_parent: i32,

    pub fade_in_time: f32,
    pub fade_out_time: f32,

    pub local_entry_node: i32,
    pub local_exit_node: i32,
    pub node_flags: i32,

    pub entry_phase: f32,
    pub exit_phase: f32,
    pub last_frame: f32,

    pub next_seq: i32,
    pub pose: i32,

    pub num_ik_rules: i32,
    pub num_auto_layers: i32,
    pub auto_layer_offset: i32,
    pub weight_offset: i32,
    pub pose_key_offset: i32,

    pub num_ik_locks: i32,
    pub ik_lock_offset: i32,

    pub key_value_offset: i32,
    pub key_value_size: i32,

    pub cycle_pose_index: i32,

    pub activity_modifier_offset: i32,
    pub num_activity_modifiers: i32,

    unused: [i32; 5],
}

/// `$includemodel` reference: a label and the model file to pull in.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioModelGroup {
    pub label_offset: BinOffset,
    pub name_offset: BinOffset,
}

#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioAnimBlock {
    pub data_start: i32,
    pub data_end: i32,
}

/// One (block, offset) entry of a sectioned animation's section table.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioAnimSection {
    pub anim_block: i32,
    pub anim_offset: i32,
}

/// Head of one per-bone animation record; the flag-dependent payload
/// follows at +4 and `next_offset == 0` ends the chain.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StudioAnim {
    pub bone: u8,
    pub flags: u8,
    pub next_offset: i16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    // Stride mistakes corrupt every table walk, so pin the layouts.
    #[test]
    fn struct_sizes_match_studio_h() {
        assert_eq!(size_of::<StudioHeader>(), STUDIO_HEADER_SIZE);
        assert_eq!(size_of::<StudioBone>(), 216);
        assert_eq!(size_of::<StudioTexture>(), 64);
        assert_eq!(size_of::<StudioBodyPart>(), 16);
        assert_eq!(size_of::<StudioModel>(), 148);
        assert_eq!(size_of::<StudioMesh>(), 116);
        assert_eq!(size_of::<StudioEyeball>(), 172);
        assert_eq!(size_of::<StudioAnimDesc>(), 100);
        assert_eq!(size_of::<StudioSeqDesc>(), 212);
        assert_eq!(size_of::<StudioModelGroup>(), 8);
        assert_eq!(size_of::<StudioAnimBlock>(), 8);
        assert_eq!(size_of::<StudioAnim>(), 4);
    }
}
