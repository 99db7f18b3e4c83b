use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error code EC2 returns when a "DryRun" request would have succeeded.
/// ref. https://docs.aws.amazon.com/AWSEC2/latest/APIReference/errors-overview.html
pub const DRY_RUN_OPERATION_CODE: &str = "DryRunOperation";

/// Backing errors for all provisioning operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid provisioning request: {0}")]
    Validation(#[from] ValidationError),

    /// Always carries the provider error code (e.g., "DryRunOperation",
    /// "InsufficientInstanceCapacity"), never needs type inspection.
    #[error("failed API (code '{code}'): {message}")]
    Provider {
        code: String,
        message: String,
        is_retryable: bool,
    },

    /// The attach loop stopped early, some instances have no volume.
    /// Already attached instances and created volumes are left as-is.
    #[error("{attached} instance(s) attached, {pending} instance(s) without volume: {cause}")]
    PartialProvisioningFailure {
        attached: usize,
        pending: usize,
        cause: Box<Error>,
    },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("provisioning cancelled")]
    Cancelled,

    #[error("failed for other reasons: {message}")]
    Other { message: String },
}

impl Error {
    /// Creates a provider error from the code and message.
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            code: code.into(),
            message: message.into(),
            is_retryable: false,
        }
    }

    /// Returns the error message in "String".
    #[inline]
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Error::Provider { message, .. }
            | Error::Timeout { message }
            | Error::Other { message } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Returns the provider error code, if any.
    #[inline]
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Provider { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    /// Returns true if the provider validated the request in "DryRun" mode
    /// without creating any resource.
    #[inline]
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.code() == Some(DRY_RUN_OPERATION_CODE)
    }

    /// Returns if the error is retryable.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { is_retryable, .. } => *is_retryable,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Rejected input, always raised before any provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("number of nodes must be >0 (got {0})")]
    InvalidNodeCount(usize),

    #[error("volume size must be in [{min}, {max}] GiB (got {got})")]
    InvalidVolumeSize { got: u32, min: u32, max: u32 },

    #[error("must specify subnets")]
    MissingSubnets,

    #[error("must specify security groups")]
    MissingSecurityGroups,

    #[error("'{field}' has an empty entry at index {index}")]
    EmptyEntry { field: &'static str, index: usize },

    #[error("number of {field} ({got}) must equal number of nodes ({expected})")]
    ResourceCountMismatch {
        field: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("invalid '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// RUST_LOG=debug cargo test --package fleet-ops --lib -- errors::test_error --exact --show-output
#[test]
fn test_error() {
    let _ = env_logger::builder().is_test(true).try_init();

    let e = Error::provider(DRY_RUN_OPERATION_CODE, "Request would have succeeded");
    assert!(e.is_dry_run());
    assert!(!e.is_retryable());
    assert_eq!(e.code(), Some("DryRunOperation"));
    assert_eq!(e.message(), "Request would have succeeded");

    let e = Error::provider("InsufficientInstanceCapacity", "no capacity");
    assert!(!e.is_dry_run());

    let e: Error = ValidationError::InvalidNodeCount(0).into();
    assert!(!e.is_dry_run());
    assert_eq!(e.code(), None);
    assert_eq!(
        e.to_string(),
        "invalid provisioning request: number of nodes must be >0 (got 0)"
    );

    let e = Error::PartialProvisioningFailure {
        attached: 3,
        pending: 2,
        cause: Box::new(Error::provider("VolumeInUse", "busy")),
    };
    assert!(e.to_string().starts_with("3 instance(s) attached, 2 instance(s)"));
}
