//! Per-section progress records.
//!
//! ## State Machine
//!
//! ```text
//! Pending ──start──▶ InProgress ──complete──▶ Completed
//!                        │  ▲
//!                      fail  retry (retry_count += 1)
//!                        ▼  │
//!                       Failed
//! ```
//!
//! The payload lives inside the state, so `data` exists iff the section is
//! `Completed` and `error` exists iff it is `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::section::{SectionId, SectionKind, SectionOutput};

/// Error for an illegal status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The requested transition is not allowed from the current state.
    #[error("{section_id}: illegal transition {from} -> {to}")]
    Illegal {
        /// Section whose status was touched.
        section_id: SectionId,
        /// Current state name.
        from: &'static str,
        /// Requested state name.
        to: &'static str,
    },
    /// The output does not match the section kind.
    #[error("{section_id}: {got} output recorded for a {expected} section")]
    OutputKindMismatch {
        /// Section whose status was touched.
        section_id: SectionId,
        /// Kind of the section.
        expected: SectionKind,
        /// Kind of the offered output.
        got: SectionKind,
    },
}

/// Lifecycle state of a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SectionState {
    /// Not started.
    Pending,
    /// An attempt is running.
    InProgress,
    /// Accepted output.
    Completed(SectionOutput),
    /// Last attempt failed with this error text.
    Failed(String),
}

impl SectionState {
    /// State name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed(_) => "completed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Progress record of one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionStatus {
    /// Section id.
    pub section_id: SectionId,
    /// Section kind.
    pub kind: SectionKind,
    /// Current state.
    pub state: SectionState,
    /// Number of retries started after the first attempt.
    pub retry_count: u32,
    /// Time of the last transition.
    pub timestamp: DateTime<Utc>,
}

impl SectionStatus {
    /// Create a pending status.
    pub fn pending(section_id: SectionId, kind: SectionKind) -> Self {
        Self {
            section_id,
            kind,
            state: SectionState::Pending,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }

    /// `Pending -> InProgress`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        match self.state {
            SectionState::Pending => self.transition(SectionState::InProgress),
            _ => Err(self.illegal("in_progress")),
        }
    }

    /// `InProgress -> Completed`.
    pub fn complete(&mut self, output: SectionOutput) -> Result<(), TransitionError> {
        if !matches!(self.state, SectionState::InProgress) {
            return Err(self.illegal("completed"));
        }
        if output.kind() != self.kind {
            return Err(TransitionError::OutputKindMismatch {
                section_id: self.section_id,
                expected: self.kind,
                got: output.kind(),
            });
        }
        self.transition(SectionState::Completed(output))
    }

    /// `InProgress -> Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        match self.state {
            SectionState::InProgress => self.transition(SectionState::Failed(error.into())),
            _ => Err(self.illegal("failed")),
        }
    }

    /// `Failed -> InProgress` for a new attempt, incrementing `retry_count`.
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        match self.state {
            SectionState::Failed(_) => {
                self.retry_count += 1;
                self.transition(SectionState::InProgress)
            }
            _ => Err(self.illegal("in_progress")),
        }
    }

    /// Accepted output, present iff completed.
    pub fn data(&self) -> Option<&SectionOutput> {
        match &self.state {
            SectionState::Completed(output) => Some(output),
            _ => None,
        }
    }

    /// Last error, present iff failed.
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            SectionState::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the section completed.
    pub fn is_completed(&self) -> bool {
        matches!(self.state, SectionState::Completed(_))
    }

    fn transition(&mut self, next: SectionState) -> Result<(), TransitionError> {
        self.state = next;
        self.timestamp = Utc::now();
        Ok(())
    }

    fn illegal(&self, to: &'static str) -> TransitionError {
        TransitionError::Illegal {
            section_id: self.section_id,
            from: self.state.name(),
            to,
        }
    }
}
