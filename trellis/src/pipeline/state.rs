use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Lifecycle states of a document moving through the ingestion pipeline.
///
/// Forward pipeline edges run INGESTED through READY; FAILED and
/// NEEDS_REVIEW are reachable from every working state; READY and FAILED
/// re-enter the pipeline for retry.
#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum DocStatus {
    #[default]
    INGESTED,
    EXTRACTING,
    CLASSIFYING,
    CHUNKING,
    EMBEDDING,
    GRAPH_SYNC,
    READY,
    FAILED,
    NEEDS_REVIEW,
}

impl DocStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::INGESTED => "INGESTED",
            Self::EXTRACTING => "EXTRACTING",
            Self::CLASSIFYING => "CLASSIFYING",
            Self::CHUNKING => "CHUNKING",
            Self::EMBEDDING => "EMBEDDING",
            Self::GRAPH_SYNC => "GRAPH_SYNC",
            Self::READY => "READY",
            Self::FAILED => "FAILED",
            Self::NEEDS_REVIEW => "NEEDS_REVIEW",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::READY | Self::FAILED | Self::NEEDS_REVIEW)
    }

    /// States a crashed worker can leave a document stranded in.
    pub fn is_stuck_candidate(&self) -> bool {
        matches!(
            self,
            Self::EXTRACTING
                | Self::CLASSIFYING
                | Self::CHUNKING
                | Self::EMBEDDING
                | Self::GRAPH_SYNC
        )
    }

    /// Stages at or past chunk persistence; recovery may promote these.
    pub fn chunks_persisted_at(&self) -> bool {
        matches!(self, Self::CHUNKING | Self::EMBEDDING | Self::GRAPH_SYNC)
    }
}

/// Every legal `(from, to)` pair. `from == to` is always a no-op and is not
/// listed here.
pub const TRANSITIONS: &[(DocStatus, DocStatus)] = &[
    // forward pipeline edges
    (DocStatus::INGESTED, DocStatus::EXTRACTING),
    (DocStatus::EXTRACTING, DocStatus::CLASSIFYING),
    (DocStatus::CLASSIFYING, DocStatus::CHUNKING),
    (DocStatus::CHUNKING, DocStatus::EMBEDDING),
    (DocStatus::EMBEDDING, DocStatus::GRAPH_SYNC),
    (DocStatus::GRAPH_SYNC, DocStatus::READY),
    // recovery promotion: work at or past chunk persistence finished but the
    // final checkpoint write was lost
    (DocStatus::CHUNKING, DocStatus::READY),
    (DocStatus::EMBEDDING, DocStatus::READY),
    // failure edges from every working state
    (DocStatus::INGESTED, DocStatus::FAILED),
    (DocStatus::EXTRACTING, DocStatus::FAILED),
    (DocStatus::CLASSIFYING, DocStatus::FAILED),
    (DocStatus::CHUNKING, DocStatus::FAILED),
    (DocStatus::EMBEDDING, DocStatus::FAILED),
    (DocStatus::GRAPH_SYNC, DocStatus::FAILED),
    // review edges from every working state
    (DocStatus::INGESTED, DocStatus::NEEDS_REVIEW),
    (DocStatus::EXTRACTING, DocStatus::NEEDS_REVIEW),
    (DocStatus::CLASSIFYING, DocStatus::NEEDS_REVIEW),
    (DocStatus::CHUNKING, DocStatus::NEEDS_REVIEW),
    (DocStatus::EMBEDDING, DocStatus::NEEDS_REVIEW),
    (DocStatus::GRAPH_SYNC, DocStatus::NEEDS_REVIEW),
    // retry re-entry
    (DocStatus::READY, DocStatus::INGESTED),
    (DocStatus::READY, DocStatus::EXTRACTING),
    (DocStatus::FAILED, DocStatus::INGESTED),
    (DocStatus::FAILED, DocStatus::EXTRACTING),
];

pub fn is_legal_transition(from: DocStatus, to: DocStatus) -> bool {
    from == to || TRANSITIONS.iter().any(|(f, t)| *f == from && *t == to)
}

/// No-op when `current == next`, error when the pair is not in the table.
pub fn validate_transition(current: DocStatus, next: DocStatus) -> Result<(), PipelineError> {
    if is_legal_transition(current, next) {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition {
            from: current,
            to: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DocStatus; 9] = [
        DocStatus::INGESTED,
        DocStatus::EXTRACTING,
        DocStatus::CLASSIFYING,
        DocStatus::CHUNKING,
        DocStatus::EMBEDDING,
        DocStatus::GRAPH_SYNC,
        DocStatus::READY,
        DocStatus::FAILED,
        DocStatus::NEEDS_REVIEW,
    ];

    #[test]
    fn listed_pairs_validate_and_unlisted_pairs_fail() {
        for from in ALL {
            for to in ALL {
                let listed = from == to || TRANSITIONS.contains(&(from, to));
                let outcome = validate_transition(from, to);
                if listed {
                    assert!(outcome.is_ok(), "{from:?} -> {to:?} should be legal");
                } else {
                    assert!(
                        matches!(
                            outcome,
                            Err(PipelineError::InvalidTransition { from: f, to: t })
                                if f == from && t == to
                        ),
                        "{from:?} -> {to:?} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn same_state_is_a_noop() {
        for status in ALL {
            assert!(validate_transition(status, status).is_ok());
        }
    }

    #[test]
    fn terminal_states_cannot_fail() {
        assert!(validate_transition(DocStatus::READY, DocStatus::FAILED).is_err());
        assert!(validate_transition(DocStatus::NEEDS_REVIEW, DocStatus::READY).is_err());
    }

    #[test]
    fn failed_documents_can_retry() {
        assert!(validate_transition(DocStatus::FAILED, DocStatus::INGESTED).is_ok());
        assert!(validate_transition(DocStatus::READY, DocStatus::EXTRACTING).is_ok());
    }
}
