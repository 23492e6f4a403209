//! Physics decode: collision blobs into bodies, ragdoll KeyValues into
//! joints. Everything in here is non-fatal; a bad blob or constraint is
//! logged and skipped without touching the rest of the model.

use std::collections::HashMap;

use crate::keyvalues::{self, KvBlock};
use crate::model::{BBox, ModelBuilder, Transform};
use crate::phy::{decode_solid, Phy};
use crate::skeleton::Skeleton;

/// Axis ranges narrower than this (degrees) are locked.
const FREE_AXIS_THRESHOLD: f32 = 5.0;

/// Solids whose hull extent is at or below this (inches, any axis) are
/// collision shims, not bodies.
const DEGENERATE_EXTENT: f32 = 0.01;

#[derive(Debug, Default)]
struct SolidInfo {
    name: String,
    mass: Option<f32>,
    surface: Option<String>,
}

#[derive(Debug)]
struct Constraint {
    parent: i32,
    child: i32,
    limits: [(f32, f32); 3], // (min, max) for x, y, z
}

pub fn decode_physics(bytes: &[u8], skeleton: &Skeleton, builder: &mut ModelBuilder) {
    let phy = match Phy::read(bytes) {
        Ok(phy) => phy,
        Err(err) => {
            log::warn!("discarding phy data: {err}");
            return;
        }
    };

    let root = keyvalues::parse(&phy.keyvalues_text());
    let solid_infos = read_solid_infos(&root);
    let constraints = read_constraints(&root);

    // Only solids that produced a body take part in joints.
    let mut body_of_solid: HashMap<i32, usize> = HashMap::new();

    for index in 0..phy.solid_count() {
        let Some(blob) = phy.solid(index) else {
            continue;
        };
        let hulls = match decode_solid(blob) {
            Ok(hulls) => hulls,
            Err(err) => {
                log::warn!("skipping phy solid {index}: {err}");
                continue;
            }
        };

        let mut bounds = BBox::EMPTY;
        for point in hulls.iter().flatten() {
            bounds.grow(*point);
        }
        if hulls.is_empty() || bounds.size().min_element() <= DEGENERATE_EXTENT {
            log::debug!("phy solid {index} is degenerate, no body emitted");
            continue;
        }

        let info = solid_infos.get(&(index as i32));
        let mass = info.and_then(|i| i.mass).unwrap_or(1.0);
        let surface = info.and_then(|i| i.surface.clone());
        let bone = info.map(|i| i.name.as_str()).unwrap_or("");

        let mut body = builder.add_body(mass, surface, bone);
        let body_index = body.index();
        for hull in hulls {
            body.add_hull(hull);
        }
        body_of_solid.insert(index as i32, body_index);
    }

    for constraint in constraints {
        let (Some(&parent_body), Some(&child_body)) = (
            body_of_solid.get(&constraint.parent),
            body_of_solid.get(&constraint.child),
        ) else {
            continue;
        };
        if parent_body == child_body {
            continue;
        }

        let (frame1, frame2) = joint_frames(&constraint, &solid_infos, skeleton);
        emit_joint(builder, &constraint, parent_body, child_body, frame1, frame2);
    }
}

fn read_solid_infos(root: &KvBlock) -> HashMap<i32, SolidInfo> {
    let mut infos = HashMap::new();
    for solid in root.blocks("solid") {
        let Some(index) = solid.get_i32("index") else {
            continue;
        };
        infos.insert(
            index,
            SolidInfo {
                name: solid.get_str("name").unwrap_or("").to_owned(),
                mass: solid.get_f32("mass"),
                surface: solid
                    .get_str("surfaceprop")
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned),
            },
        );
    }
    infos
}

fn read_constraints(root: &KvBlock) -> Vec<Constraint> {
    let mut constraints = Vec::new();
    for kv in root.blocks("ragdollconstraint") {
        let (Some(parent), Some(child)) = (kv.get_i32("parent"), kv.get_i32("child")) else {
            continue;
        };
        let limit = |min: &str, max: &str| {
            (
                kv.get_f32(min).unwrap_or(0.0),
                kv.get_f32(max).unwrap_or(0.0),
            )
        };
        constraints.push(Constraint {
            parent,
            child,
            limits: [
                limit("xmin", "xmax"),
                limit("ymin", "ymax"),
                limit("zmin", "zmax"),
            ],
        });
    }
    constraints
}

/// Child expressed in the parent's space when both solids resolve to bones
/// by name; identity frames otherwise.
fn joint_frames(
    constraint: &Constraint,
    infos: &HashMap<i32, SolidInfo>,
    skeleton: &Skeleton,
) -> (Transform, Transform) {
    let bone_of = |solid: i32| {
        infos
            .get(&solid)
            .filter(|info| !info.name.is_empty())
            .and_then(|info| skeleton.bone_index(&info.name))
    };
    if let (Some(parent_bone), Some(child_bone)) =
        (bone_of(constraint.parent), bone_of(constraint.child))
    {
        let frame1 = skeleton.world[parent_bone]
            .inverse()
            .mul(skeleton.world[child_bone]);
        (frame1, Transform::IDENTITY)
    } else {
        (Transform::IDENTITY, Transform::IDENTITY)
    }
}

fn emit_joint(
    builder: &mut ModelBuilder,
    constraint: &Constraint,
    parent: usize,
    child: usize,
    frame1: Transform,
    frame2: Transform,
) {
    let free: Vec<usize> = (0..3)
        .filter(|&axis| {
            let (min, max) = constraint.limits[axis];
            max - min > FREE_AXIS_THRESHOLD
        })
        .collect();

    match free.len() {
        0 => builder.add_fixed_joint(parent, child, frame1, frame2),
        1 => {
            let (min, max) = constraint.limits[free[0]];
            builder
                .add_hinge_joint(parent, child, frame1, frame2)
                .with_twist_limit(min, max);
        }
        _ => {
            let swing = constraint.limits[1..]
                .iter()
                .flat_map(|&(min, max)| [min.abs(), max.abs()])
                .fold(0.0f32, f32::max);
            let (twist_min, twist_max) = constraint.limits[0];
            builder
                .add_ball_joint(parent, child, frame1, frame2)
                .with_swing_limit(swing)
                .with_twist_limit(twist_min, twist_max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JointKind;
    use crate::phy::test_support::*;

    fn classify(limits: [(f32, f32); 3]) -> crate::model::Joint {
        let mut builder = ModelBuilder::new("test");
        builder.add_body(1.0, None, "a");
        builder.add_body(1.0, None, "b");
        let constraint = Constraint {
            parent: 0,
            child: 1,
            limits,
        };
        emit_joint(
            &mut builder,
            &constraint,
            0,
            1,
            Transform::IDENTITY,
            Transform::IDENTITY,
        );
        builder.finish().joints.remove(0)
    }

    #[test]
    fn all_locked_is_fixed() {
        let joint = classify([(0.0, 0.0), (-2.0, 2.0), (0.0, 0.0)]);
        assert_eq!(joint.kind, JointKind::Fixed);
        assert_eq!(joint.twist_limit, None);
    }

    #[test]
    fn single_free_axis_is_hinge() {
        let joint = classify([(-30.0, 30.0), (0.0, 0.0), (0.0, 0.0)]);
        assert_eq!(joint.kind, JointKind::Hinge);
        assert_eq!(joint.twist_limit, Some((-30.0, 30.0)));

        let z_hinge = classify([(0.0, 0.0), (0.0, 0.0), (-15.0, 40.0)]);
        assert_eq!(z_hinge.kind, JointKind::Hinge);
        assert_eq!(z_hinge.twist_limit, Some((-15.0, 40.0)));
    }

    #[test]
    fn two_or_more_free_axes_are_ball() {
        let joint = classify([(-10.0, 10.0), (-25.0, 5.0), (-5.0, 35.0)]);
        assert_eq!(joint.kind, JointKind::Ball);
        assert_eq!(joint.swing_limit, Some(35.0));
        assert_eq!(joint.twist_limit, Some((-10.0, 10.0)));
    }

    #[test]
    fn bodies_and_hinge_from_phy_file() {
        let text = r#"
            solid { "index" "0" "name" "a" "mass" "5" }
            solid { "index" "1" "name" "b" "mass" "5" }
            ragdollconstraint {
                "parent" "0" "child" "1"
                "xmin" "-30" "xmax" "30"
                "ymin" "0" "ymax" "0"
                "zmin" "0" "zmax" "0"
            }
        "#;
        let blob = legacy_solid_blob(&tetra_points(), &tetra_tris());
        let file = phy_file(&[blob.clone(), blob], text);

        let skeleton = Skeleton::build(Vec::new()).unwrap();
        let mut builder = ModelBuilder::new("test");
        decode_physics(&file, &skeleton, &mut builder);
        let model = builder.finish();

        assert_eq!(model.bodies.len(), 2);
        assert!(model.bodies.iter().all(|b| b.mass == 5.0));
        assert_eq!(model.bodies[0].hulls.len(), 1);
        assert_eq!(model.joints.len(), 1);
        let joint = &model.joints[0];
        assert_eq!(joint.kind, JointKind::Hinge);
        assert_eq!(joint.twist_limit, Some((-30.0, 30.0)));
        assert_eq!(joint.frame1, Transform::IDENTITY);
        assert_ne!(joint.parent_body, joint.child_body);
    }

    #[test]
    fn constraint_to_missing_solid_is_dropped() {
        let text = r#"
            solid { "index" "0" "name" "a" }
            ragdollconstraint { "parent" "0" "child" "7" "xmin" "-30" "xmax" "30" }
        "#;
        let blob = legacy_solid_blob(&tetra_points(), &tetra_tris());
        let file = phy_file(&[blob], text);

        let skeleton = Skeleton::build(Vec::new()).unwrap();
        let mut builder = ModelBuilder::new("test");
        decode_physics(&file, &skeleton, &mut builder);
        let model = builder.finish();
        assert_eq!(model.bodies.len(), 1);
        assert_eq!(model.bodies[0].mass, 1.0);
        assert!(model.joints.is_empty());
    }
}
