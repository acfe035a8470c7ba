use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;

/// The error type for all filter operations.
///
/// `AuthFailed` and `DecryptFailed` mark the session as terminal: the host
/// is expected to stop processing and call finish. Key-cache problems never
/// surface here; they degrade to "no cache" with a logged warning.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The volume configuration bytes have none of the recognized lengths.
    #[error("invalid volume configuration data")]
    BadConfig,

    /// The underlying password hash failed.
    #[error("key derivation failed")]
    KdfFailed,

    /// The derived key does not match the volume fingerprint.
    #[error("invalid password")]
    BadPassword,

    /// Per-block HMAC mismatch during decryption.
    #[error("HMAC mismatch (invalid password/key file or broken data)")]
    AuthFailed,

    /// Block decryption failed: bad padding or a truncated frame.
    #[error("decryption failed (invalid password/key file or broken data)")]
    DecryptFailed,

    /// Salt or fingerprint-salt generation failed.
    #[error("random generator failure")]
    RngFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A host-provided service (password prompt, meta store) refused.
    #[error(transparent)]
    Host(#[from] anyhow::Error),
}
