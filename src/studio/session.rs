//! Description text, render error and repair state for one editing session.
//!
//! The session is pure: it consumes [`StudioEvent`]s with the current time and
//! answers with [`SessionEffect`]s for the shell to carry out. Render requests
//! carry attempt tokens, and outcomes for anything but the newest attempt are
//! dropped so a slow render can never overwrite a newer one.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::render::{AttemptTracker, RenderAttempt, RenderError, RenderedDiagram};

use super::events::{StudioCommand, StudioEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Clean,
    Erroring,
    Fixing,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Erroring => "erroring",
            Self::Fixing => "fixing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    Dispatch(StudioCommand),
    ShowDiagram(Box<RenderedDiagram>),
    /// Drop the displayed diagram; the error banner replaces it.
    ClearDiagram,
    /// The editor buffer must be replaced with this text.
    ReplaceText(String),
    /// Blocking notice for the user.
    ShowNotice(String),
}

#[derive(Debug, Clone)]
pub struct EditSession {
    text: String,
    error: Option<RenderError>,
    fixing: bool,
    attempts: AttemptTracker,
    render_due: Option<Instant>,
    debounce: Duration,
}

impl EditSession {
    pub fn new(initial_text: impl Into<String>, debounce: Duration) -> Self {
        Self {
            text: initial_text.into(),
            error: None,
            fixing: false,
            attempts: AttemptTracker::default(),
            render_due: None,
            debounce,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn error(&self) -> Option<&RenderError> {
        self.error.as_ref()
    }

    /// First line of the current error, as shown in the banner.
    pub fn error_headline(&self) -> Option<String> {
        self.error.as_ref().map(RenderError::headline)
    }

    pub fn phase(&self) -> SessionPhase {
        if self.fixing {
            SessionPhase::Fixing
        } else if self.error.is_some() {
            SessionPhase::Erroring
        } else {
            SessionPhase::Clean
        }
    }

    pub fn is_fixing(&self) -> bool {
        self.fixing
    }

    pub fn can_fix(&self) -> bool {
        !self.text.trim().is_empty() && self.error.is_some() && !self.fixing
    }

    pub fn latest_attempt(&self) -> Option<RenderAttempt> {
        self.attempts.latest()
    }

    pub fn render_pending(&self) -> bool {
        self.render_due.is_some()
    }

    /// When the debounced render fires, if one is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.render_due
    }

    /// Renders the initial text right away.
    pub fn start(&mut self) -> Vec<SessionEffect> {
        vec![self.dispatch_render()]
    }

    /// Fires the debounced render once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Vec<SessionEffect> {
        match self.render_due {
            Some(due) if due <= now => {
                self.render_due = None;
                vec![self.dispatch_render()]
            }
            _ => Vec::new(),
        }
    }

    pub fn handle(&mut self, event: StudioEvent, now: Instant) -> Vec<SessionEffect> {
        let event_name = event.name();
        let before = self.phase();
        let effects = match event {
            StudioEvent::TextChanged { text } => self.on_text_changed(text, now),
            StudioEvent::RenderSucceeded { attempt, diagram } => {
                if !self.accepts(attempt) {
                    return Vec::new();
                }
                self.error = None;
                vec![SessionEffect::ShowDiagram(diagram)]
            }
            StudioEvent::RenderFailed { attempt, error } => {
                if !self.accepts(attempt) {
                    return Vec::new();
                }
                self.error = Some(error);
                vec![SessionEffect::ClearDiagram]
            }
            StudioEvent::FixRequested => self.on_fix_requested(),
            StudioEvent::FixSucceeded { text } => {
                if !self.fixing {
                    return Vec::new();
                }
                self.fixing = false;
                self.text = text.clone();
                self.render_due = None;
                vec![SessionEffect::ReplaceText(text), self.dispatch_render()]
            }
            StudioEvent::FixFailed { error } => {
                if !self.fixing {
                    return Vec::new();
                }
                self.fixing = false;
                vec![SessionEffect::ShowNotice(format!(
                    "Failed to auto-fix code. Please check your API key or internet connection.\n\n{error}"
                ))]
            }
        };

        let after = self.phase();
        if before != after {
            debug!(
                event = event_name,
                from = before.as_str(),
                to = after.as_str(),
                "edit session transition"
            );
        }
        effects
    }

    fn on_text_changed(&mut self, text: String, now: Instant) -> Vec<SessionEffect> {
        if text == self.text {
            return Vec::new();
        }
        self.text = text;

        if self.debounce.is_zero() {
            self.render_due = None;
            return vec![self.dispatch_render()];
        }
        self.render_due = Some(now + self.debounce);
        Vec::new()
    }

    fn on_fix_requested(&mut self) -> Vec<SessionEffect> {
        if !self.can_fix() {
            return Vec::new();
        }
        let Some(error) = self.error.as_ref() else {
            return Vec::new();
        };

        self.fixing = true;
        vec![SessionEffect::Dispatch(StudioCommand::Repair {
            text: self.text.clone(),
            error: error.to_string(),
        })]
    }

    fn accepts(&self, attempt: RenderAttempt) -> bool {
        let current = self.attempts.is_current(attempt);
        if !current {
            debug!(
                attempt,
                latest = self.attempts.latest().unwrap_or_default(),
                "dropping stale render result"
            );
        }
        current
    }

    fn dispatch_render(&mut self) -> SessionEffect {
        let attempt = self.attempts.next();
        SessionEffect::Dispatch(StudioCommand::Render {
            attempt,
            text: self.text.clone(),
        })
    }
}
