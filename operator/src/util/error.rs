/// Errors produced anywhere in the operator. AWS SDK errors are
/// collapsed into a single [`Error::Aws`] variant via [`Error::aws`]
/// rather than one `#[from]` per service error type: `SdkError<E, R>`
/// is generic per-operation, so a blanket conversion would collide with
/// the `#[from]` impls below. Call sites do `.map_err(Error::aws)?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    KubeError {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInputError(String),

    #[error("Failed to parse DateTime: {source}")]
    ChronoError {
        #[from]
        source: chrono::ParseError,
    },

    #[error("Out of range: {source}")]
    OutOfRangeError {
        #[from]
        source: chrono::OutOfRangeError,
    },

    #[error("Json error: {source}")]
    JsonError {
        #[from]
        source: serde_json::Error,
    },

    #[error("AWS API error: {0}")]
    Aws(String),

    /// The pool-wide account limit (fed by the total-account watcher)
    /// has been reached. Non-terminal: retried on the watcher's next tick.
    #[error("AWS organization account limit exceeded")]
    AccountLimitExceeded,

    /// The provider rejected a new support case because too many are
    /// already open.
    #[error("support case creation limit exceeded")]
    CaseCreationLimitExceeded,

    /// A BYOC claim is missing `byocAwsAccountId`.
    #[error("BYOC claim is missing byocAwsAccountId")]
    ByocAccountIdMissing,

    /// A BYOC claim is missing or incomplete `byocSecretRef`.
    #[error("BYOC claim is missing byocSecretRef")]
    ByocSecretRefMissing,

    /// An account reached a state that requires a federated access role
    /// that could not be found or assumed.
    #[error("federated access role not found for account {0}")]
    FederatedAccessRoleNotFound(String),

    /// An account's `Creating` condition is older than the stuck-creating
    /// timeout; the caller should transition to `Failed`.
    #[error("account stuck in Creating beyond the timeout")]
    StuckCreating,
}

impl Error {
    /// Wraps any displayable AWS SDK error (typically a `SdkError<E, R>`)
    /// into [`Error::Aws`].
    pub fn aws(err: impl std::fmt::Display) -> Self {
        Error::Aws(err.to_string())
    }
}
