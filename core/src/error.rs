//! The error-reporting object.
//!
//! Fallible constructors return `Err(Error)` carrying a domain, the relevant
//! system code and a static message. Operations whose only failure mode is a
//! caller or backend fault (lock, unlock, join) report `false`/`-1` with a
//! log diagnostic instead; see the per-function contracts.

/// Result alias used by every fallible constructor in the crate.
pub type SysResult<T> = core::result::Result<T, Error>;

/// Broad classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorDomain {
    /// Resource exhaustion: an allocation or kernel-object creation failed.
    #[error("no resources")]
    NoResources,
    /// A null handle, invalid priority or otherwise malformed argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// The platform backend refused the operation.
    #[error("backend failure")]
    Backend,
}

/// A failure report: domain, system code and message.
///
/// The core populates these on failure paths that can fail; it never frees
/// or retains an error it did not create.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{domain}: {message} (system code {code})")]
pub struct Error {
    domain: ErrorDomain,
    code: i32,
    message: &'static str,
}

impl Error {
    /// Builds an error with an explicit system code.
    pub fn new(domain: ErrorDomain, code: i32, message: &'static str) -> Error {
        Error {
            domain,
            code,
            message,
        }
    }

    /// Builds an error capturing the calling thread's last system code.
    pub fn with_system(domain: ErrorDomain, message: &'static str) -> Error {
        Error::new(domain, last_system_code(), message)
    }

    /// The failure classification.
    pub fn domain(&self) -> ErrorDomain {
        self.domain
    }

    /// The system code captured at construction; `0` when none applied.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Human-readable description of the failure site.
    pub fn message(&self) -> &'static str {
        self.message
    }
}

/// Last system error code of the calling thread (`errno` / `GetLastError`).
pub fn last_system_code() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
