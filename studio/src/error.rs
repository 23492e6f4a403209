use thiserror::Error;

/// Fatal decode outcomes. Physics and animation problems are handled at the
/// offending element and never surface here (spec'd local-skip behaviour);
/// these four cover everything that aborts a decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("not a studio model (id {id:?}, version {version})")]
    NotAStudioModel { id: [u8; 4], version: i32 },

    #[error("missing or invalid required sibling file: {0}")]
    MissingRequiredSibling(&'static str),

    #[error("checksum mismatch between mdl ({mdl}) and {sibling} ({other})")]
    ChecksumMismatch {
        mdl: i32,
        sibling: &'static str,
        other: i32,
    },

    #[error("malformed file: {0}")]
    Malformed(&'static str),
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;
