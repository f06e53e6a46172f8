// THEORY:
// Errors are local to a single frame or a single session. Nothing here is global:
// a malformed frame is rejected and the caller keeps rendering the last overlay, a
// failed allocation ends one viewer's session and nobody else's. Degenerate tuning
// values never show up as errors at all; they are clamped by `OverlayConfig`.

/// Everything that can go wrong while turning one frame into one overlay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The pixel buffer does not hold exactly `width * height` RGBA pixels.
    #[error("frame buffer holds {actual} bytes but a {width}x{height} RGBA frame needs {expected}")]
    Malformed {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    /// Two grids that must share dimensions did not.
    #[error("grid is {actual:?} but {expected:?} was expected")]
    Incomparable {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    /// Detection is switched off for this session.
    #[error("motion detection is disabled")]
    Disabled,
    /// A per-session buffer could not be allocated.
    #[error("could not allocate {bytes} bytes of frame state")]
    Allocation { bytes: usize },
}

impl FrameError {
    /// Fatal errors end the session; everything else only skips the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::Allocation { .. })
    }
}

/// Session-level failures reported by [`crate::session::OverlaySession`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session buffers could not be allocated ({bytes} bytes)")]
    Allocation { bytes: usize },
    #[error("session is closed")]
    Closed,
    #[error("session task aborted: {0}")]
    Aborted(String),
}

impl From<FrameError> for SessionError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Allocation { bytes } => SessionError::Allocation { bytes },
            other => SessionError::Aborted(other.to_string()),
        }
    }
}
