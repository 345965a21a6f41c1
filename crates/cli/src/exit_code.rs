//! Process exit codes
//!
//! Scripts rely on these values; never renumber them.

use cs_core::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Everything succeeded
    Success = 0,
    /// Unclassified failure, including per-item sync failures
    GeneralError = 1,
    /// Bad arguments or a structural sync error
    UsageError = 2,
    /// Network or listing failure
    NetworkError = 3,
    /// Rejected credentials or permissions
    AuthError = 4,
    NotFound = 5,
    Conflict = 6,
    UnsupportedFeature = 7,
    /// Ctrl-C
    Interrupted = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Exit code for an error that aborted a command
    pub fn from_error(error: &Error) -> Self {
        if error.is_structural() {
            return ExitCode::UsageError;
        }
        match error {
            Error::InvalidPath(_) | Error::Config(_) | Error::Toml(_) => ExitCode::UsageError,
            Error::Network(_) | Error::Enumeration { .. } => ExitCode::NetworkError,
            Error::Auth(_) => ExitCode::AuthError,
            Error::NotFound(_) | Error::AliasNotFound(_) => ExitCode::NotFound,
            Error::Conflict(_) => ExitCode::Conflict,
            Error::UnsupportedFeature(_) => ExitCode::UnsupportedFeature,
            _ => ExitCode::GeneralError,
        }
    }
}
