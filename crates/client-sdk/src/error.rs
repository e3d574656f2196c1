use thiserror::Error;

/// Every failure the client pipeline can surface, one kind per §7 of the
/// protocol contract. Soft per-replica failures (`NodeUnreachable`,
/// `FragmentNotFound`) are consumed internally while a replica remains;
/// everything else aborts the pipeline.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("directory returned {have} candidate nodes, need {need}")]
    InsufficientNodes { have: usize, need: usize },

    #[error("all node attempts exhausted for shard {shard}")]
    DistributionFailed { shard: usize },

    #[error("cannot reconstruct: {have} valid shards, need {need}")]
    InsufficientShards { have: usize, need: usize },

    #[error("authentication failed: ciphertext does not match its tag")]
    AuthenticationFailed,

    #[error("incorrect master password")]
    IncorrectPassword,

    #[error("manifest is password protected and no password was supplied")]
    PasswordRequired,

    #[error("integrity check failed at stage {stage}")]
    IntegrityFailure { stage: &'static str },

    #[error("unsupported manifest version {version}")]
    UnsupportedManifest { version: String },

    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("fragment not found on node")]
    FragmentNotFound,

    #[error("manifest is not valid JSON: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("malformed {field}: {reason}")]
    MalformedField {
        field: &'static str,
        reason: String,
    },

    // The AEAD encrypt path cannot fail on well-formed keys, but the
    // cipher API still returns a Result.
    #[error("cipher failure")]
    CipherFailure,
}

impl StorageError {
    pub fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedField {
            field,
            reason: reason.into(),
        }
    }
}
