//! Decoded model output and the builder the decode stages populate.
//!
//! Everything here is freshly allocated and owned; nothing borrows the
//! input buffers. Cross-references (bone parents, joint bodies) are plain
//! indices into the flat lists, never pointers.

use glam::{Quat, Vec2, Vec3, Vec4};

/// A rigid transform (rotation then translation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// `self ∘ local`: apply `local` in this transform's space.
    pub fn mul(&self, local: Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * local.position,
            rotation: (self.rotation * local.rotation).normalize(),
        }
    }

    pub fn inverse(&self) -> Transform {
        let inv_rot = self.rotation.inverse();
        Transform {
            position: inv_rot * -self.position,
            rotation: inv_rot,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned bounds grown point by point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BBox {
    pub const EMPTY: BBox = BBox {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn grow(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }
}

impl Default for BBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Opaque handle produced by the caller's material loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialHandle(pub u32);

/// Resolves a logical material name (`materials/<dir>/<texture>`, no
/// extension) to a handle, or `None` when the material cannot be loaded.
pub trait MaterialLoader {
    fn load(&self, name: &str) -> Option<MaterialHandle>;
}

/// Material slot attached to an emitted mesh. Eye materials carry the iris
/// projection rows consumed by an eye shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeshMaterial {
    None,
    Plain(MaterialHandle),
    Eye {
        handle: MaterialHandle,
        iris_u: Vec4,
        iris_v: Vec4,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub uv: Vec2,
    /// Up to three influencing bones; unused slots are zero with weight 0.
    pub bone_indices: [u8; 3],
    /// Fixed-point weights summing to exactly 255.
    pub bone_weights: [u8; 3],
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub material: MeshMaterial,
    pub vertices: Vec<MeshVertex>,
    /// Triangles, CCW winding.
    pub indices: Vec<u32>,
    pub bounds: BBox,
    pub lod: u8,
    pub body_part: String,
    pub sub_model: usize,
}

#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent: Option<usize>,
    pub world: Transform,
}

#[derive(Clone, Debug)]
pub struct PhysicsBody {
    pub mass: f32,
    pub surface: Option<String>,
    /// Bone this body follows, by name. Empty when the ragdoll text names
    /// no solid for the collision blob.
    pub bone: String,
    /// Convex hulls, each an ordered point cloud of at least four points.
    pub hulls: Vec<Vec<Vec3>>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JointKind {
    Fixed,
    Hinge,
    Ball,
}

#[derive(Clone, Debug)]
pub struct Joint {
    pub kind: JointKind,
    pub parent_body: usize,
    pub child_body: usize,
    pub frame1: Transform,
    pub frame2: Transform,
    pub swing_limit: Option<f32>,
    pub twist_limit: Option<(f32, f32)>,
}

#[derive(Clone, Debug)]
pub struct Animation {
    pub name: String,
    pub fps: f32,
    pub looping: bool,
    pub delta: bool,
    /// One transform array per frame, indexed by main-model bone index.
    pub frames: Vec<Vec<Transform>>,
}

/// Everything the five buffers decode to.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub name: String,
    pub bones: Vec<Bone>,
    pub meshes: Vec<Mesh>,
    pub bodies: Vec<PhysicsBody>,
    pub joints: Vec<Joint>,
    pub animations: Vec<Animation>,
}

/// Collecting sink the decode stages write into.
#[derive(Default)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            model: Model {
                name: name.to_owned(),
                ..Default::default()
            },
        }
    }

    pub fn add_bone(&mut self, name: &str, world_pos: Vec3, world_rot: Quat, parent: Option<&str>) {
        let parent = parent.and_then(|p| self.bone_index(p));
        self.model.bones.push(Bone {
            name: name.to_owned(),
            parent,
            world: Transform::new(world_pos, world_rot),
        });
    }

    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.model
            .bones
            .iter()
            .position(|b| b.name.eq_ignore_ascii_case(name))
    }

    pub fn add_mesh(&mut self, mut mesh: Mesh, lod: u8, body_part: &str, sub_model: usize) {
        mesh.lod = lod;
        mesh.body_part = body_part.to_owned();
        mesh.sub_model = sub_model;
        self.model.meshes.push(mesh);
    }

    pub fn add_body(&mut self, mass: f32, surface: Option<String>, bone: &str) -> BodyHandle<'_> {
        self.model.bodies.push(PhysicsBody {
            mass,
            surface,
            bone: bone.to_owned(),
            hulls: Vec::new(),
        });
        let index = self.model.bodies.len() - 1;
        BodyHandle {
            model: &mut self.model,
            index,
        }
    }

    pub fn add_fixed_joint(&mut self, parent: usize, child: usize, frame1: Transform, frame2: Transform) {
        self.push_joint(JointKind::Fixed, parent, child, frame1, frame2);
    }

    pub fn add_hinge_joint(
        &mut self,
        parent: usize,
        child: usize,
        frame1: Transform,
        frame2: Transform,
    ) -> JointHandle<'_> {
        self.push_joint(JointKind::Hinge, parent, child, frame1, frame2)
    }

    pub fn add_ball_joint(
        &mut self,
        parent: usize,
        child: usize,
        frame1: Transform,
        frame2: Transform,
    ) -> JointHandle<'_> {
        self.push_joint(JointKind::Ball, parent, child, frame1, frame2)
    }

    fn push_joint(
        &mut self,
        kind: JointKind,
        parent: usize,
        child: usize,
        frame1: Transform,
        frame2: Transform,
    ) -> JointHandle<'_> {
        debug_assert_ne!(parent, child);
        self.model.joints.push(Joint {
            kind,
            parent_body: parent,
            child_body: child,
            frame1,
            frame2,
            swing_limit: None,
            twist_limit: None,
        });
        let index = self.model.joints.len() - 1;
        JointHandle {
            model: &mut self.model,
            index,
        }
    }

    pub fn add_animation(&mut self, name: &str, fps: f32) -> AnimationHandle<'_> {
        self.model.animations.push(Animation {
            name: name.to_owned(),
            fps,
            looping: false,
            delta: false,
            frames: Vec::new(),
        });
        let index = self.model.animations.len() - 1;
        AnimationHandle {
            model: &mut self.model,
            index,
        }
    }

    pub fn finish(self) -> Model {
        self.model
    }
}

pub struct BodyHandle<'a> {
    model: &'a mut Model,
    index: usize,
}

impl BodyHandle<'_> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn add_hull(&mut self, points: Vec<Vec3>) {
        self.model.bodies[self.index].hulls.push(points);
    }
}

pub struct JointHandle<'a> {
    model: &'a mut Model,
    index: usize,
}

impl JointHandle<'_> {
    pub fn with_swing_limit(self, swing: f32) -> Self {
        self.model.joints[self.index].swing_limit = Some(swing);
        self
    }

    pub fn with_twist_limit(self, min: f32, max: f32) -> Self {
        self.model.joints[self.index].twist_limit = Some((min, max));
        self
    }
}

pub struct AnimationHandle<'a> {
    model: &'a mut Model,
    index: usize,
}

impl AnimationHandle<'_> {
    pub fn with_looping(self, looping: bool) -> Self {
        self.model.animations[self.index].looping = looping;
        self
    }

    pub fn with_delta(self, delta: bool) -> Self {
        self.model.animations[self.index].delta = delta;
        self
    }

    pub fn add_frame(&mut self, transforms: Vec<Transform>) {
        self.model.animations[self.index].frames.push(transforms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::EulerRot;

    #[test]
    fn transform_compose_matches_parent_child() {
        let parent = Transform::new(
            Vec3::new(0.0, 1.0, 0.0),
            Quat::from_euler(EulerRot::XYZ, 0.0, 0.0, std::f32::consts::FRAC_PI_2),
        );
        let child = Transform::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        let world = parent.mul(child);
        // Rotated 90 degrees about Z, the child's +X offset becomes +Y.
        assert!(world.position.abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn transform_inverse_roundtrip() {
        let t = Transform::new(
            Vec3::new(3.0, -2.0, 5.0),
            Quat::from_euler(EulerRot::XYZ, 0.3, 1.1, -0.4),
        );
        let round = t.mul(t.inverse());
        assert!(round.position.abs_diff_eq(Vec3::ZERO, 1e-5));
        assert!(round.rotation.abs_diff_eq(Quat::IDENTITY, 1e-5));
    }

    #[test]
    fn builder_links_parents_by_name() {
        let mut builder = ModelBuilder::new("test");
        builder.add_bone("root", Vec3::ZERO, Quat::IDENTITY, None);
        builder.add_bone("spine", Vec3::Y, Quat::IDENTITY, Some("root"));
        builder.add_bone("orphan", Vec3::X, Quat::IDENTITY, Some("missing"));
        let model = builder.finish();
        assert_eq!(model.bones[1].parent, Some(0));
        assert_eq!(model.bones[2].parent, None);
    }

    #[test]
    fn joint_builder_sets_limits() {
        let mut builder = ModelBuilder::new("test");
        builder.add_body(1.0, None, "a");
        builder.add_body(1.0, None, "b");
        builder
            .add_ball_joint(0, 1, Transform::IDENTITY, Transform::IDENTITY)
            .with_swing_limit(45.0)
            .with_twist_limit(-10.0, 10.0);
        let model = builder.finish();
        assert_eq!(model.joints[0].kind, JointKind::Ball);
        assert_eq!(model.joints[0].swing_limit, Some(45.0));
        assert_eq!(model.joints[0].twist_limit, Some((-10.0, 10.0)));
    }
}
