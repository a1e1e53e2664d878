use std::fmt::Display;

use serde::Serialize;

use crate::intake::{check_batch, format_size, BatchVerdict, ImageCandidate, UploadedImage};

use super::notice::Notice;
use super::transcript::append_follow_up;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Generating,
    FollowingUp,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::FollowingUp => "following_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    Generate,
    FollowUp { question: String },
}

impl Turn {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::FollowUp { .. } => "follow_up",
        }
    }

    fn phase(&self) -> Phase {
        match self {
            Self::Generate => Phase::Generating,
            Self::FollowUp { .. } => Phase::FollowingUp,
        }
    }
}

/// Snapshot handed to the gateway for one outstanding call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisCall {
    pub turn: Turn,
    pub images: Vec<UploadedImage>,
    pub instruction: String,
}

/// Everything one upload-analyze-ask session knows.
///
/// Mutation goes through the transition methods only. Each refused
/// transition returns a [`Notice`] and leaves the state untouched. A call
/// begun with [`SessionState::begin_generate`] or
/// [`SessionState::begin_follow_up`] must be finished with
/// [`SessionState::complete`], which is the only way back to
/// [`Phase::Idle`].
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    images: Vec<UploadedImage>,
    query: String,
    follow_up: String,
    transcript: Option<String>,
    phase: Phase,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> &[UploadedImage] {
        &self.images
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn follow_up(&self) -> &str {
        &self.follow_up
    }

    pub fn set_follow_up(&mut self, follow_up: impl Into<String>) {
        self.follow_up = follow_up.into();
    }

    pub fn transcript(&self) -> Option<&str> {
        self.transcript.as_deref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Applies one upload batch, all or nothing.
    ///
    /// `probe` derives preview dimensions and only runs once the whole batch
    /// has passed the size check. Returns how many images were appended.
    /// Refused while a call is outstanding.
    pub fn accept_batch<F>(
        &mut self,
        candidates: Vec<ImageCandidate>,
        mut probe: F,
    ) -> Result<usize, Notice>
    where
        F: FnMut(&ImageCandidate) -> Option<(u32, u32)>,
    {
        self.ensure_idle()?;
        match check_batch(&candidates) {
            BatchVerdict::Empty => return Ok(0),
            BatchVerdict::Oversized(oversized) => {
                let names = oversized
                    .iter()
                    .map(|item| format!("{} ({})", item.name, format_size(item.size_bytes)))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Notice::warning(
                    Notice::FILES_TOO_LARGE,
                    format!(
                        "Each image must be {} or smaller. Rejected: {names}",
                        format_size(crate::intake::MAX_IMAGE_BYTES)
                    ),
                ));
            }
            BatchVerdict::Accepted => {}
        }

        let mut accepted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let dimensions = probe(&candidate);
            let image = UploadedImage::from_candidate(candidate, dimensions).map_err(|err| {
                Notice::warning(Notice::FILES_TOO_LARGE, err.to_string())
            })?;
            accepted.push(image);
        }
        let count = accepted.len();
        self.images.extend(accepted);
        self.transcript = None;
        Ok(count)
    }

    pub fn begin_generate(&mut self) -> Result<AnalysisCall, Notice> {
        self.ensure_idle()?;
        if self.images.is_empty() {
            return Err(Notice::validation(
                Notice::NO_IMAGE_SELECTED,
                "Please upload an image first",
            ));
        }
        self.phase = Phase::Generating;
        Ok(AnalysisCall {
            turn: Turn::Generate,
            images: self.images.clone(),
            instruction: self.query.clone(),
        })
    }

    pub fn begin_follow_up(&mut self) -> Result<AnalysisCall, Notice> {
        self.ensure_idle()?;
        if self.transcript.is_none() {
            return Err(Notice::validation(
                Notice::NO_ANALYSIS_YET,
                "Generate an analysis before asking a follow-up",
            ));
        }
        let question = self.follow_up.trim();
        if question.is_empty() {
            return Err(Notice::validation(
                Notice::NO_QUESTION,
                "Please enter a follow-up question",
            ));
        }
        let question = question.to_string();
        self.phase = Phase::FollowingUp;
        Ok(AnalysisCall {
            turn: Turn::FollowUp {
                question: question.clone(),
            },
            images: self.images.clone(),
            instruction: question,
        })
    }

    /// Applies the gateway outcome for `call` and returns to idle.
    ///
    /// On failure the transcript and follow-up text are left exactly as they
    /// were and the error becomes the returned notice.
    pub fn complete<E: Display>(
        &mut self,
        call: &AnalysisCall,
        outcome: Result<String, E>,
    ) -> Result<(), Notice> {
        if self.phase != call.turn.phase() {
            return Err(Notice::error(
                Notice::ANALYSIS_FAILED,
                format!(
                    "no {} call is outstanding (session is {})",
                    call.turn.as_str(),
                    self.phase.as_str()
                ),
            ));
        }
        self.phase = Phase::Idle;

        let text =
            outcome.map_err(|err| Notice::error(Notice::ANALYSIS_FAILED, err.to_string()))?;
        match &call.turn {
            Turn::Generate => {
                self.transcript = Some(text);
            }
            Turn::FollowUp { question } => {
                let existing = self.transcript.as_deref().unwrap_or("");
                self.transcript = Some(append_follow_up(existing, question, &text));
                self.follow_up.clear();
            }
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), Notice> {
        if self.is_busy() {
            return Err(Notice::validation(
                Notice::BUSY,
                "Wait for the current analysis to finish",
            ));
        }
        Ok(())
    }
}
