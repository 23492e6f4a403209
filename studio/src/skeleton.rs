//! Skeleton pass: one walk over the bone table, composing world
//! transforms as it goes. Parents precede children in the table, so a
//! single forward pass is enough.

use crate::error::{DecodeError, Result};
use crate::mdl::MdlBone;
use crate::model::{ModelBuilder, Transform};

pub struct Skeleton {
    pub bones: Vec<MdlBone>,
    pub world: Vec<Transform>,
}

/// Zeroed quaternions appear in hand-damaged files; treat them as
/// identity instead of letting NaN spread through the hierarchy.
fn safe_normalize(q: glam::Quat) -> glam::Quat {
    if q.length_squared() > 1e-12 {
        q.normalize()
    } else {
        glam::Quat::IDENTITY
    }
}

impl Skeleton {
    pub fn build(bones: Vec<MdlBone>) -> Result<Self> {
        let mut world = Vec::with_capacity(bones.len());
        for (index, bone) in bones.iter().enumerate() {
            let local = Transform::new(bone.pos, safe_normalize(bone.quat));
            let transform = match bone.parent {
                Some(parent) => {
                    if parent >= index {
                        return Err(DecodeError::Malformed("bone parent out of order"));
                    }
                    let parent_world: &Transform = &world[parent];
                    parent_world.mul(local)
                }
                None => local,
            };
            world.push(transform);
        }
        Ok(Self { bones, world })
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones
            .iter()
            .position(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// Local bind transform used as the non-delta animation base.
    pub fn local(&self, index: usize) -> Transform {
        let bone = &self.bones[index];
        Transform::new(bone.pos, safe_normalize(bone.quat))
    }

    pub fn emit(&self, builder: &mut ModelBuilder) {
        for (index, bone) in self.bones.iter().enumerate() {
            let world = &self.world[index];
            let parent = bone.parent.map(|p| self.bones[p].name.as_str());
            builder.add_bone(&bone.name, world.position, world.rotation, parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn bone(name: &str, parent: Option<usize>, pos: Vec3, quat: Quat) -> MdlBone {
        MdlBone {
            name: name.to_owned(),
            parent,
            pos,
            quat,
            rot: Vec3::ZERO,
            pos_scale: Vec3::ONE,
            rot_scale: Vec3::ONE,
        }
    }

    #[test]
    fn world_is_parent_compose_local() {
        let rot = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let skeleton = Skeleton::build(vec![
            bone("root", None, Vec3::ZERO, rot),
            bone("child", Some(0), Vec3::X, Quat::IDENTITY),
        ])
        .unwrap();
        let expected = skeleton.world[0].mul(skeleton.local(1));
        assert!(skeleton.world[1]
            .position
            .abs_diff_eq(expected.position, 1e-6));
        // The child's +X offset rotates into +Y.
        assert!(skeleton.world[1].position.abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn forward_parent_reference_rejected() {
        let result = Skeleton::build(vec![
            bone("a", Some(1), Vec3::ZERO, Quat::IDENTITY),
            bone("b", None, Vec3::ZERO, Quat::IDENTITY),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn name_lookup_ignores_case() {
        let skeleton =
            Skeleton::build(vec![bone("ValveBiped.Bip01", None, Vec3::ZERO, Quat::IDENTITY)])
                .unwrap();
        assert_eq!(skeleton.bone_index("valvebiped.bip01"), Some(0));
        assert_eq!(skeleton.bone_index("other"), None);
    }
}
