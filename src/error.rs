use thiserror::Error;

/// Stable numeric error codes, kept in sync with the cross-binding error enumeration.
///
/// Discriminants are part of the public contract: they must never be renumbered once shipped,
/// only extended.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    InvalidHandle = 1,
    InvalidParameter = 2,
    NotReady = 3,
    NotSupported = 4,
    NotInitialized = 5,
    InvalidTrimPoints = 18,
    InvalidFadeDuration = 19,
    ClipNotRegistered = 20,
    NoVoiceAvailable = 21,
    QueueFull = 22,
    RegistryFull = 23,
    InternalError = 255,
}

/// Caller-facing error, returned synchronously by every UI-thread API.
///
/// Never constructed on the audio thread: the audio path has no panic path and no error
/// return, only silence-degradation plus an emitted [`crate::rt::Event`].
#[derive(Error, Copy, Clone, Eq, PartialEq, Debug)]
pub enum EngineError {
    #[error("clip handle is invalid or unknown")]
    InvalidHandle,
    #[error("parameter is invalid: {0}")]
    InvalidParameter(&'static str),
    #[error("requested resource is not ready yet")]
    NotReady,
    #[error("operation is not supported")]
    NotSupported,
    #[error("engine has not been initialized")]
    NotInitialized,
    #[error("trim points are invalid: {0}")]
    InvalidTrimPoints(&'static str),
    #[error("fade duration is invalid: {0}")]
    InvalidFadeDuration(&'static str),
    #[error("clip is not registered")]
    ClipNotRegistered,
    #[error("no free voice slot available")]
    NoVoiceAvailable,
    #[error("command queue is full")]
    QueueFull,
    #[error("clip registry is full")]
    RegistryFull,
    #[error("internal error: {0}")]
    InternalError(&'static str),
}

impl EngineError {
    pub fn code(self) -> ErrorCode {
        use EngineError::*;
        match self {
            InvalidHandle => ErrorCode::InvalidHandle,
            InvalidParameter(_) => ErrorCode::InvalidParameter,
            NotReady => ErrorCode::NotReady,
            NotSupported => ErrorCode::NotSupported,
            NotInitialized => ErrorCode::NotInitialized,
            InvalidTrimPoints(_) => ErrorCode::InvalidTrimPoints,
            InvalidFadeDuration(_) => ErrorCode::InvalidFadeDuration,
            ClipNotRegistered => ErrorCode::ClipNotRegistered,
            NoVoiceAvailable => ErrorCode::NoVoiceAvailable,
            QueueFull => ErrorCode::QueueFull,
            RegistryFull => ErrorCode::RegistryFull,
            InternalError(_) => ErrorCode::InternalError,
        }
    }
}

pub type ClipEngineResult<T> = Result<T, EngineError>;
