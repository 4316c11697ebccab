use std::fmt;

use http::StatusCode;

/// Error kinds the daemon distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    /// Mount or unmount state mismatch.
    Conflict,
    /// A driver does not provide the requested capability.
    NotSupported,
    /// The local record exists but the backend lost the attachment.
    NotAttachedInBackend,
    /// Checksum mismatch while restoring.
    Corruption,
    /// An external helper exceeded its time budget.
    Timeout,
    Transient,
    Internal,
}

impl ErrorKind {
    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::NotAttachedInBackend => "not attached in backend",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transient => "transient",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error tagged with an [ErrorKind].
///
/// Usually created with [volume_err!] and carried inside an `anyhow::Error`,
/// use [error_kind] to get the kind back.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct VolumeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl VolumeError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Create an `anyhow::Error` tagged with an [ErrorKind] variant.
#[macro_export]
macro_rules! volume_err {
    ($kind:ident, $($fmt:tt)+) => {
        ::anyhow::Error::from($crate::VolumeError::new(
            $crate::ErrorKind::$kind,
            format!($($fmt)+),
        ))
    };
}

/// Like `anyhow::bail!`, but returns a tagged [VolumeError].
#[macro_export]
macro_rules! volume_bail {
    ($kind:ident, $($fmt:tt)+) => {
        return Err($crate::volume_err!($kind, $($fmt)+))
    };
}

/// Return the kind of the first [VolumeError] in the error chain.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VolumeError>())
        .map(|err| err.kind)
}

/// Check whether the error chain carries the given kind.
pub fn is_error_kind(err: &anyhow::Error, kind: ErrorKind) -> bool {
    error_kind(err) == Some(kind)
}

#[cfg(test)]
mod test {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_kind_through_context() {
        let err: anyhow::Error = volume_err!(NotAttachedInBackend, "volume {} lost", "v");
        assert_eq!(err.to_string(), "volume v lost");

        let res: Result<(), anyhow::Error> = Err(err);
        let err = res.context("mount failed").unwrap_err();
        assert!(is_error_kind(&err, ErrorKind::NotAttachedInBackend));
        assert_eq!(error_kind(&anyhow::format_err!("plain")), None);
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ErrorKind::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::AlreadyExists.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Corruption.http_status(), StatusCode::BAD_REQUEST);
    }
}
