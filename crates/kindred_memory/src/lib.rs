pub mod archive;
pub mod background;
pub mod consolidation;
pub mod coordinator;
pub mod decay;
pub mod episodic;
pub mod growth;
pub mod messages;
pub mod patterns;
pub mod profile;
pub mod quality;
pub mod scheduler;
pub mod session;
pub mod sqlite;
pub mod state;

pub use archive::{ArchiveOutcome, Archivist};
pub use background::BackgroundPool;
pub use consolidation::{ConsolidationJob, ConsolidationMethod, ConsolidationReport, DailySummary};
pub use coordinator::{CompanionCoordinator, CompanionStatus, Perception, TurnReport};
pub use decay::{DecayOutcome, DecayScheduler};
pub use episodic::{EpisodicMemory, EpisodicMemoryStore, MemoryKind};
pub use growth::{CoreMemory, GrowthEngine, GrowthOutcome};
pub use messages::MessageLog;
pub use patterns::{DetectedPattern, PatternDetector, UserPattern};
pub use profile::{ProfileFact, ProfileStore, ProfileWrite, SelfImageStore};
pub use quality::{QualityAverages, ResponseQuality, ResponseQualityStore};
pub use scheduler::{MaintenanceScheduler, TickReport};
pub use session::{RecordedMessage, Session, SessionManager, SessionStats};
pub use sqlite::SqliteStore;
pub use state::StateStore;

#[cfg(test)]
mod tests;
