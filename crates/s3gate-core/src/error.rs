//! Error types for the gateway.

/// Gateway error taxonomy.
///
/// `NotFound`, `NotModified` and `PreconditionFailed` are expected outcomes that
/// map to specific HTTP answers. `RemovalFolder` and `ObjectExists` are request
/// validation failures. Everything else is opaque and rendered as an internal
/// server error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The object (or index document) does not exist.
    #[error("not found")]
    NotFound,

    /// A conditional GET matched and the client copy is current.
    #[error("not modified")]
    NotModified,

    /// A conditional GET precondition did not hold.
    #[error("precondition failed")]
    PreconditionFailed,

    /// DELETE was requested on a folder path.
    #[error("can't remove folder")]
    RemovalFolder,

    /// PUT found an existing object while override is disallowed.
    #[error("file detected on path {key} for PUT request and override isn't allowed")]
    ObjectExists {
        /// The final object key.
        key: String,
    },

    /// The inbound request is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// A template failed to parse or render.
    #[error("template error: {0}")]
    Template(String),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Whether this error is the normalized "object does not exist" outcome.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Convenience result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
