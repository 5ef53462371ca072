use thiserror::Error;

/// Contract violations reported by object operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("Bad catalog object: {0}")]
    BadCatalogObject(String),

    #[error("Bad object id {oid}: {reason}")]
    BadObjectId { oid: String, reason: String },

    #[error("Object length {0} cannot be stored")]
    BadLength(usize),

    #[error("Object of {length} bytes exceeds the large-object threshold of {threshold} bytes")]
    NotSupported { length: usize, threshold: usize },
}

impl ObjectError {
    pub(crate) fn bad_oid(oid: impl ToString, reason: impl Into<String>) -> Self {
        ObjectError::BadObjectId {
            oid: oid.to_string(),
            reason: reason.into(),
        }
    }
}
