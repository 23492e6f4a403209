//! Decoder for Source-engine studio models: MDL/VVD/VTX plus optional
//! ANI and PHY side files, decoded in one pass into a [`model::Model`]
//! (skeleton, skinned meshes, ragdoll bodies and joints, and per-sequence
//! animation frames).

pub mod animation;
pub mod binaries;
pub mod decoder;
pub mod error;
pub mod keyvalues;
pub mod mdl;
pub mod mesh;
pub mod model;
pub mod phy;
pub mod physics;
pub mod prelude;
pub mod skeleton;
pub mod vtx;
pub mod vvd;

pub use decoder::{decode_model, ModelBuffers};
pub use error::DecodeError;
