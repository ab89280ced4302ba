pub mod arbitration;
pub mod candidate;
pub mod canonical;
pub mod coordinator;
pub mod heuristic;
pub mod price;
pub mod reconciler;
pub mod stock;
pub mod structured;
pub mod text;
pub mod vision;

pub use candidate::{Candidate, PageContext};
pub use coordinator::{ExtractError, ExtractionCoordinator, ExtractionResult, ExtractionState};
pub use heuristic::HeuristicExtractor;
pub use reconciler::{AvailabilityDecision, AvailabilityReconciler};
pub use structured::StructuredExtractor;
pub use vision::{VisionClient, VisionError, VisionOutcome};
