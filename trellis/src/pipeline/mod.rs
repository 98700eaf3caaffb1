pub mod chunker;
pub mod classifier;
pub mod enrich;
pub mod extract;
pub mod migration;
pub mod orchestrator;
pub mod quality;
pub mod recovery;
pub mod register;
pub mod state;

pub mod utils;

pub use chunker::{ChunkData, ChunkProfile, Chunker, SemanticChunker, StructuralHint};
pub use classifier::{Domain, DomainClassifier, HeuristicClassifier};
pub use extract::{ContentExtractor, ExtractionChain, ExtractionResult};
pub use migration::{MigrationOutcome, MigrationRequest, ReindexService, TenantCompatibility};
pub use orchestrator::{IngestionOrchestrator, ProcessDocumentHandler};
pub use quality::{QualityReport, QualityScorer};
pub use recovery::{RecoveryReport, StaleRecoveryService};
pub use register::RegistrationService;
pub use state::{DocStatus, validate_transition};
