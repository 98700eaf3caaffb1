use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::error::ErrorPayload;
use crate::storage::MetadataStore;

use super::state::DocStatus;

pub const INTERRUPTED_MESSAGE: &str = "processing interrupted by restart, please retry";

#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub promoted: Vec<String>,
    pub failed: Vec<String>,
    /// Documents another replica claimed first.
    pub skipped: usize,
}

/// Startup reconciliation for documents stranded mid-pipeline by a crash.
/// Each document is claimed via CAS on its observed status — the analogue of
/// a skip-locked row read — so concurrent recovery runs never double-process.
pub struct StaleRecoveryService {
    metadata: Arc<dyn MetadataStore>,
}

impl StaleRecoveryService {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn run(&self) -> Result<RecoveryReport> {
        let stuck = [
            DocStatus::EXTRACTING,
            DocStatus::CLASSIFYING,
            DocStatus::CHUNKING,
            DocStatus::EMBEDDING,
            DocStatus::GRAPH_SYNC,
        ];
        let candidates = self.metadata.documents_by_status(&stuck).await?;
        let mut report = RecoveryReport::default();

        for doc in candidates {
            let observed = doc.status;
            let has_chunks = self.metadata.chunk_count(&doc.id).await? > 0;

            // Promotion checks only that at least one chunk exists, not that
            // the expected count was reached; a document interrupted
            // mid-chunk-write can be promoted with a partial chunk set.
            if observed.chunks_persisted_at() && has_chunks {
                if self
                    .metadata
                    .update_status(&doc.id, DocStatus::READY, Some(observed))
                    .await?
                {
                    info!(
                        document_id = %doc.id,
                        from = observed.as_str(),
                        "stale document promoted to READY"
                    );
                    report.promoted.push(doc.id);
                } else {
                    report.skipped += 1;
                }
            } else if self
                .metadata
                .update_status(&doc.id, DocStatus::FAILED, Some(observed))
                .await?
            {
                self.metadata
                    .set_error(
                        &doc.id,
                        Some(ErrorPayload {
                            kind: "interrupted".to_string(),
                            provider: None,
                            message: INTERRUPTED_MESSAGE.to_string(),
                        }),
                    )
                    .await?;
                warn!(
                    document_id = %doc.id,
                    from = observed.as_str(),
                    "stale document marked FAILED"
                );
                report.failed.push(doc.id);
            } else {
                report.skipped += 1;
            }
        }

        info!(
            promoted = report.promoted.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "stale recovery finished"
        );
        Ok(report)
    }
}
