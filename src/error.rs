//! Error taxonomy for ProseQL.

use thiserror::Error;

/// Result type for ProseQL operations.
pub type Result<T> = std::result::Result<T, ProseError>;

/// A single field-scoped validation issue.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The full ProseQL error taxonomy. Every failure mode the collection engine
/// can produce is represented as a typed variant rather than a generic
/// exception, carrying whatever structured fields the caller needs to
/// discriminate on.
#[derive(Error, Debug)]
pub enum ProseError {
    #[error("{collection}: entity {id} not found")]
    NotFound { collection: String, id: String },

    #[error("validation failed: {issues:?}")]
    Validation { issues: Vec<ValidationIssue> },

    #[error("{collection}: duplicate id {id}")]
    DuplicateKey { collection: String, id: String },

    #[error(
        "{collection}: unique constraint {constraint:?} violated by {values:?} (held by {holder_id})"
    )]
    UniqueConstraint {
        collection: String,
        constraint: Vec<String>,
        values: Vec<String>,
        holder_id: String,
    },

    #[error("{collection}.{field}: foreign key {value} not found in {target_collection}")]
    ForeignKey {
        collection: String,
        field: String,
        value: String,
        target_collection: String,
    },

    #[error("{collection}: concurrent modification of {id}, retry the operation")]
    Concurrency { collection: String, id: String },

    #[error("operation precondition violated: {0}")]
    Operation(String),

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("{collection}.{field}: dangling reference {value} while populating")]
    DanglingReference {
        collection: String,
        field: String,
        value: String,
    },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("hook vetoed operation: {0}")]
    Hook(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ProseError {
    fn from(e: std::io::Error) -> Self {
        ProseError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ProseError {
    fn from(e: serde_json::Error) -> Self {
        ProseError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ProseError {
    fn from(e: serde_yaml::Error) -> Self {
        ProseError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ProseError {
    fn from(e: toml::de::Error) -> Self {
        ProseError::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for ProseError {
    fn from(e: toml::ser::Error) -> Self {
        ProseError::Serialization(e.to_string())
    }
}

impl ProseError {
    /// HTTP status code an external REST boundary should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            ProseError::NotFound { .. } | ProseError::CollectionNotFound(_) => 404,
            ProseError::Validation { .. }
            | ProseError::Operation(_)
            | ProseError::UnsupportedFormat(_) => 400,
            ProseError::DuplicateKey { .. }
            | ProseError::UniqueConstraint { .. }
            | ProseError::Concurrency { .. } => 409,
            ProseError::ForeignKey { .. } | ProseError::DanglingReference { .. } | ProseError::Hook(_) => {
                422
            }
            ProseError::Storage(_)
            | ProseError::Serialization(_)
            | ProseError::Migration(_)
            | ProseError::Transaction(_)
            | ProseError::Plugin(_)
            | ProseError::Internal(_) => 500,
        }
    }

    /// Stable string tag for this variant, for change-event/RPC consumers
    /// that discriminate by tag rather than by downcasting.
    pub fn code(&self) -> &'static str {
        match self {
            ProseError::NotFound { .. } => "NotFoundError",
            ProseError::Validation { .. } => "ValidationError",
            ProseError::DuplicateKey { .. } => "DuplicateKeyError",
            ProseError::UniqueConstraint { .. } => "UniqueConstraintError",
            ProseError::ForeignKey { .. } => "ForeignKeyError",
            ProseError::Concurrency { .. } => "ConcurrencyError",
            ProseError::Operation(_) => "OperationError",
            ProseError::Transaction(_) => "TransactionError",
            ProseError::DanglingReference { .. } => "DanglingReferenceError",
            ProseError::CollectionNotFound(_) => "CollectionNotFoundError",
            ProseError::Storage(_) => "StorageError",
            ProseError::Serialization(_) => "SerializationError",
            ProseError::UnsupportedFormat(_) => "UnsupportedFormatError",
            ProseError::Migration(_) => "MigrationError",
            ProseError::Hook(_) => "HookError",
            ProseError::Plugin(_) => "PluginError",
            ProseError::Internal(_) => "InternalError",
        }
    }
}
