use thiserror::Error;

/// Errors surfaced by the façade and every collaborator beneath it.
///
/// Each variant is a distinct observable signal (see `.code()` and
/// `.http_status()`); business failures are values, never exceptions.
#[derive(Debug, Error)]
pub enum TodoError {
    #[error("list '{0}' not found")]
    ListNotFound(String),

    #[error("item '{item}' not found in list '{list}'")]
    ItemNotFound { list: String, item: String },

    #[error("tag '{0}' not found")]
    TagNotFound(String),

    #[error("property '{0}' not found")]
    PropertyNotFound(String),

    #[error("list key '{0}' already exists")]
    DuplicateListKey(String),

    #[error("item key '{key}' already exists under this parent in list '{list}'")]
    DuplicateItemKey { list: String, key: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("access denied: list '{0}' is outside the configured tag scope")]
    AccessDenied(String),

    #[error("item '{0}' has children; delete or move them first")]
    HasChildren(String),

    #[error("cannot remove tag '{tag}' from list '{list}': tag is in the force-tags scope")]
    CannotRemoveForceTag { list: String, tag: String },

    #[error("operation would create a cycle")]
    WouldCreateCycle,

    #[error("tag palette is full (maximum 12 tags)")]
    TagLimit,

    #[error("no actionable item available")]
    Blocked,

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<rusqlite::Error> for TodoError {
    fn from(e: rusqlite::Error) -> Self {
        TodoError::StorageFailure(e.to_string())
    }
}

impl TodoError {
    /// Stable snake_case identifier for this error kind, used by the CLI
    /// diagnostic line and by callers that need to branch on error kind
    /// without matching the enum directly.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ListNotFound(_) => "not_found",
            Self::ItemNotFound { .. } => "not_found",
            Self::TagNotFound(_) => "not_found",
            Self::PropertyNotFound(_) => "not_found",
            Self::DuplicateListKey(_) => "duplicate_key",
            Self::DuplicateItemKey { .. } => "duplicate_key",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AccessDenied(_) => "access_denied",
            Self::HasChildren(_) => "has_children",
            Self::CannotRemoveForceTag { .. } => "cannot_remove_force_tag",
            Self::WouldCreateCycle => "would_create_cycle",
            Self::TagLimit => "tag_limit",
            Self::Blocked => "blocked",
            Self::StorageFailure(_) => "storage_failure",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
        }
    }

    /// The HTTP status an adapter should map this error kind to (§7).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ListNotFound(_)
            | Self::ItemNotFound { .. }
            | Self::TagNotFound(_)
            | Self::PropertyNotFound(_) => 404,
            Self::AccessDenied(_) => 403,
            Self::DuplicateListKey(_)
            | Self::DuplicateItemKey { .. }
            | Self::InvalidArgument(_)
            | Self::WouldCreateCycle
            | Self::HasChildren(_)
            | Self::CannotRemoveForceTag { .. }
            | Self::TagLimit => 400,
            Self::Blocked => 200,
            Self::StorageFailure(_) | Self::Io(_) | Self::Json(_) | Self::Yaml(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, TodoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(TodoError::ListNotFound("x".into()).http_status(), 404);
        assert_eq!(TodoError::AccessDenied("x".into()).http_status(), 403);
        assert_eq!(TodoError::WouldCreateCycle.http_status(), 400);
        assert_eq!(TodoError::StorageFailure("x".into()).http_status(), 500);
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(TodoError::TagLimit.code(), "tag_limit");
        assert_eq!(
            TodoError::HasChildren("p1".into()).code(),
            "has_children"
        );
    }
}
