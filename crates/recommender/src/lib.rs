pub mod batch;
pub mod collector;
pub mod notify;
pub mod pipeline;
pub mod retro;
pub mod tracker;

pub use batch::BatchRunner;
pub use collector::Collector;
pub use notify::SlackNotifier;
pub use pipeline::AnalysisPipeline;
pub use retro::{GeminiClient, LlmClient, RetrospectiveEngine};
pub use tracker::PriceTracker;
