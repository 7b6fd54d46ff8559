use thiserror::Error;

use crate::id::BlockId;

/// Errors that can occur when talking to a block store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO errors related to payload handling.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors stemming from the reqwest client while sending a request or reading its response.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// The operation that failed.
        context: String,
        /// The underlying client error.
        #[source]
        cause: reqwest::Error,
    },

    /// The store answered with an unexpected HTTP status.
    #[error("{context}: HTTP {status}: {body}")]
    Status {
        /// The operation that failed.
        context: String,
        /// The status returned by the store.
        status: reqwest::StatusCode,
        /// The response body, usually an XML error document.
        body: String,
    },

    /// A block list referenced a block that has not been staged.
    #[error("block {id} has not been staged")]
    MissingBlock {
        /// The unstaged block.
        id: BlockId,
    },

    /// An identifier does not encode a block index.
    #[error("invalid block id `{0}`")]
    InvalidBlockId(String),

    /// Any other error from one of the backends.
    #[error("storage backend error: {context}")]
    Generic {
        /// The operation that failed.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub(crate) fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T, E = StoreError> = std::result::Result<T, E>;
