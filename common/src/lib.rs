pub mod vfile;
pub mod vpath;

pub mod prelude {
    pub use crate::vfile::{AssetResolver, VFile, VFileSystem};
    pub use crate::vpath::{VGlobalPath, VLocalPath, VPath, VSplitPath};
}
