pub use crate::decoder::{decode_model, ModelBuffers};
pub use crate::error::DecodeError;
pub use crate::mdl::Mdl;
pub use crate::model::{
    Animation, BBox, Bone, Joint, JointKind, MaterialHandle, MaterialLoader, Mesh, MeshMaterial,
    MeshVertex, Model, ModelBuilder, PhysicsBody, Transform,
};
pub use crate::phy::Phy;
pub use crate::vtx::Vtx;
pub use crate::vvd::Vvd;
