//! Pipeline states and their allowed transitions.
//!
//! Received -> Staged -> Decoded -> FingerprintKnown -> DedupChecked ->
//! SlotClaimed -> OriginalCommitted -> PreviewCommitted -> Cataloged.
//! Failure can happen from any state before Cataloged and is reported as an
//! error rather than a state.

use std::fmt;

use tracing::debug;

use crate::abort::AbortSignal;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Received,
    Staged,
    Decoded,
    FingerprintKnown,
    DedupChecked,
    SlotClaimed,
    OriginalCommitted,
    PreviewCommitted,
    Cataloged,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Received => "Received",
            PipelineState::Staged => "Staged",
            PipelineState::Decoded => "Decoded",
            PipelineState::FingerprintKnown => "FingerprintKnown",
            PipelineState::DedupChecked => "DedupChecked",
            PipelineState::SlotClaimed => "SlotClaimed",
            PipelineState::OriginalCommitted => "OriginalCommitted",
            PipelineState::PreviewCommitted => "PreviewCommitted",
            PipelineState::Cataloged => "Cataloged",
        };
        f.write_str(name)
    }
}

impl PipelineState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, target),
            (Received, Staged)
                | (Staged, Decoded)
                | (Decoded, FingerprintKnown)
                | (FingerprintKnown, DedupChecked)
                | (DedupChecked, SlotClaimed)
                | (SlotClaimed, OriginalCommitted)
                | (OriginalCommitted, PreviewCommitted)
                | (PreviewCommitted, Cataloged)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == PipelineState::Cataloged
    }
}

/// Tracks one run through the states.
///
/// Every step checks the abort signal first, so an abort surfaces at the
/// next boundary and the caller's guards compensate.
#[derive(Debug)]
pub(crate) struct Progress<'a> {
    state: PipelineState,
    signal: &'a AbortSignal,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(signal: &'a AbortSignal) -> Self {
        Self {
            state: PipelineState::Received,
            signal,
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.state
    }

    /// Fail with `Aborted` if the signal has tripped.
    pub(crate) fn check(&self) -> Result<(), IngestError> {
        if self.signal.is_aborted() {
            return Err(IngestError::Aborted(self.state));
        }
        Ok(())
    }

    pub(crate) fn advance(&mut self, to: PipelineState) -> Result<(), IngestError> {
        debug_assert!(
            self.state.can_transition_to(&to),
            "invalid transition {} -> {}",
            self.state,
            to
        );
        // The catalog row is final; an abort after it changes nothing.
        if !to.is_terminal() {
            self.check()?;
        }
        debug!(from = %self.state, to = %to, "Pipeline transition");
        self.state = to;
        Ok(())
    }
}
