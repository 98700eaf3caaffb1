pub mod enrichment;
pub mod extractor;
pub mod maintenance;

pub use enrichment::{EntitySyncStats, GraphEnrichment};
pub use extractor::{EntityExtractor, LlmEntityExtractor};
pub use maintenance::GraphMaintenance;
