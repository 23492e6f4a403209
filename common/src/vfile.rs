use std::collections::HashMap;
use std::sync::Arc;

use crate::vpath::{normalize, VPath};

/// Where model bytes come from. Implementations must be reentrant: a decode
/// in progress will call back into the resolver for include models and
/// side files, possibly from several threads decoding unrelated models.
pub trait AssetResolver {
    fn exists(&self, path: &str) -> bool;

    /// Full contents of the file at `path`, or `None` if absent.
    fn read(&self, path: &str) -> Option<Vec<u8>>;

    fn read_path(&self, path: &dyn VPath) -> Option<Vec<u8>> {
        self.read(&path.resolver_key())
    }
}

#[derive(Default, Clone)]
pub struct VFile {
    pub data: Vec<u8>,
}

impl From<Vec<u8>> for VFile {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// In-memory file map keyed by normalized logical path.
#[derive(Default, Clone)]
pub struct VFileSystem {
    pub files: Arc<HashMap<String, VFile>>,
}

impl VFileSystem {
    pub fn new(files: HashMap<String, VFile>) -> Self {
        Self {
            files: Arc::new(files),
        }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(path, data)| (normalize(&path), VFile { data }))
                .collect(),
        )
    }
}

impl AssetResolver for VFileSystem {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.files.get(&normalize(path)) {
            Some(file) => Some(file.data.clone()),
            None => {
                log::debug!("{:?} file not found", path);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let fs = VFileSystem::from_pairs([("Models/Test.MDL".to_owned(), vec![1, 2, 3])]);
        assert!(fs.exists("models/test.mdl"));
        assert_eq!(fs.read("MODELS\\TEST.MDL"), Some(vec![1, 2, 3]));
        assert!(!fs.exists("models/other.mdl"));
    }
}
