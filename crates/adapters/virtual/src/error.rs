//! Errors raised by the virtual CCU, mapped onto controller fault codes.

use ccuhub_domain::error::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum VirtualError {
    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("unknown parameter {0}")]
    UnknownParameter(String),

    #[error("operation not supported on {0}")]
    UnsupportedOperation(String),

    #[error("value out of range for {0}")]
    OutOfRange(String),

    #[error("controller unreachable")]
    Unreachable,
}

impl From<VirtualError> for RemoteError {
    fn from(err: VirtualError) -> Self {
        let message = err.to_string();
        match err {
            VirtualError::UnknownDevice(_) => Self::from_fault(-2, message),
            VirtualError::UnknownParameter(_) => Self::from_fault(-5, message),
            VirtualError::UnsupportedOperation(_) => Self::from_fault(-6, message),
            VirtualError::OutOfRange(_) => Self::from_fault(-9, message),
            VirtualError::Unreachable => Self::connection(message),
        }
    }
}
