/// Reasons an ACL request is refused before any privileged action runs.
///
/// These surface to clients as `success = false` results, never as RPC errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("target path must not be empty")]
    EmptyPath,

    #[error("target path must be absolute: {0}")]
    RelativePath(String),

    #[error("target path contains a NUL byte")]
    NulInPath,

    #[error("unsupported ACL action: {0}")]
    UnsupportedAction(String),

    #[error("unsupported entity type: {0}")]
    UnsupportedEntityType(String),

    #[error("invalid permissions {0:?}: expected 1-3 characters from r, w, x, -")]
    InvalidPermissions(String),

    #[error("invalid entity {0:?}: must not contain ':', ',', whitespace or control characters")]
    InvalidEntity(String),
}
