use crate::render::{RenderAttempt, RenderError, RenderedDiagram};

/// Requests from the UI thread to the runtime worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioCommand {
    Render {
        attempt: RenderAttempt,
        text: String,
    },
    Repair {
        text: String,
        error: String,
    },
    Shutdown,
}

/// Inputs to the edit session. Render and fix outcomes come back from the
/// runtime worker; the rest originate in the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum StudioEvent {
    TextChanged {
        text: String,
    },
    RenderSucceeded {
        attempt: RenderAttempt,
        diagram: Box<RenderedDiagram>,
    },
    RenderFailed {
        attempt: RenderAttempt,
        error: RenderError,
    },
    FixRequested,
    FixSucceeded {
        text: String,
    },
    FixFailed {
        error: String,
    },
}

impl StudioEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TextChanged { .. } => "text_changed",
            Self::RenderSucceeded { .. } => "render_succeeded",
            Self::RenderFailed { .. } => "render_failed",
            Self::FixRequested => "fix_requested",
            Self::FixSucceeded { .. } => "fix_succeeded",
            Self::FixFailed { .. } => "fix_failed",
        }
    }
}
