use thiserror::Error;

/// Failure taxonomy shared across the store, the synthesis pipeline and the
/// editor insertion client. Editor-side and gateway-side failures are always
/// recoverable; nothing here is allowed to take the host process down.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("record {0} not found")]
    NotFound(i64),

    #[error("synthesis engine unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("editor is not connected")]
    EditorNotConnected,

    #[error("no project or timeline is open in the editor")]
    EditorNoProjectOrTimeline,

    #[error("could not resolve clip frames: {0}")]
    FrameResolution(String),

    #[error("editor scripting error: {0}")]
    Editor(String),

    #[error("output directory is not configured")]
    OutputDirUnset,

    #[error("filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("audio playback is shutting down")]
    ShuttingDown,
}
