mod bridge;
mod orchestrator;

pub use bridge::{AnalysisBridge, AnalysisRecord, BridgeError};
pub use orchestrator::AnalysisOrchestrator;
