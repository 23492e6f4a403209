//! Decoder entry point: five buffers in, one [`Model`] out.
//!
//! The decode is single-shot and synchronous. Input buffers are only
//! borrowed for the call; the returned model owns all of its data. The
//! resolver is consulted again mid-decode for include models and their
//! `.ani` siblings, so it must be reentrant.

use common::vfile::AssetResolver;
use common::vpath::{VGlobalPath, VPath, VSplitPath};

use crate::animation::{build_bone_remap, decode_animations, AnimSource};
use crate::error::{DecodeError, Result};
use crate::mdl::Mdl;
use crate::mesh::assemble_meshes;
use crate::model::{MaterialLoader, Model, ModelBuilder};
use crate::physics::decode_physics;
use crate::skeleton::Skeleton;
use crate::vtx::Vtx;
use crate::vvd::Vvd;

/// The five per-model buffers. `ani` and `phy` are optional side files.
#[derive(Clone, Copy)]
pub struct ModelBuffers<'a> {
    pub mdl: &'a [u8],
    pub vvd: &'a [u8],
    pub vtx: &'a [u8],
    pub ani: Option<&'a [u8]>,
    pub phy: Option<&'a [u8]>,
}

pub fn decode_model(
    buffers: ModelBuffers<'_>,
    path: &str,
    resolver: &dyn AssetResolver,
    materials: &dyn MaterialLoader,
) -> Result<Model> {
    let mdl = Mdl::read(buffers.mdl)?;
    let vvd = Vvd::read(buffers.vvd, mdl.root_lod())?;
    let vtx = Vtx::read(buffers.vtx, mdl.version())?;

    if vvd.checksum() != mdl.checksum() {
        return Err(DecodeError::ChecksumMismatch {
            mdl: mdl.checksum(),
            sibling: "vvd",
            other: vvd.checksum(),
        });
    }
    if vtx.checksum() != mdl.checksum() {
        return Err(DecodeError::ChecksumMismatch {
            mdl: mdl.checksum(),
            sibling: "vtx",
            other: vtx.checksum(),
        });
    }

    let skeleton = Skeleton::build(mdl.bones()?)?;

    let mut builder = ModelBuilder::new(path);
    skeleton.emit(&mut builder);

    assemble_meshes(&mdl, &vvd, &vtx, resolver, materials, &mut builder)?;

    if let Some(phy) = buffers.phy {
        decode_physics(phy, &skeleton, &mut builder);
    }

    let main = AnimSource {
        mdl: &mdl,
        skeleton: &skeleton,
        ani: buffers.ani,
        remap: None,
    };
    decode_animations(&main, &skeleton, &mut builder)?;

    decode_include_models(&mdl, &skeleton, resolver, &mut builder)?;

    Ok(builder.finish())
}

/// Pull in sequences from `$includemodel` references. An include that
/// fails to resolve or validate is skipped; its bones are matched onto
/// the main skeleton by name.
fn decode_include_models(
    mdl: &Mdl,
    skeleton: &Skeleton,
    resolver: &dyn AssetResolver,
    builder: &mut ModelBuilder,
) -> Result<()> {
    for include_path in mdl.include_model_paths()? {
        let Some(bytes) = resolver.read(&include_path) else {
            log::debug!("include model {include_path:?} not found");
            continue;
        };
        let include = match Mdl::read(&bytes) {
            Ok(include) => include,
            Err(err) => {
                log::warn!("skipping include model {include_path:?}: {err}");
                continue;
            }
        };
        let include_skeleton = match include.bones().and_then(Skeleton::build) {
            Ok(skeleton) => skeleton,
            Err(err) => {
                log::warn!("skipping include model {include_path:?}: {err}");
                continue;
            }
        };

        let ani_bytes = resolver.read(&sibling_path(&include_path, "ani"));

        let source = AnimSource {
            mdl: &include,
            skeleton: &include_skeleton,
            ani: ani_bytes.as_deref(),
            remap: Some(build_bone_remap(&include_skeleton, skeleton)),
        };
        if let Err(err) = decode_animations(&source, skeleton, builder) {
            log::warn!("include model {include_path:?} animations dropped: {err}");
        }
    }
    Ok(())
}

/// Same directory and stem, different extension.
fn sibling_path(path: &str, ext: &str) -> String {
    let path = VGlobalPath::from(path);
    let dir = path.dir();
    VSplitPath::new(&dir, path.filename(), ext).resolver_key()
}
