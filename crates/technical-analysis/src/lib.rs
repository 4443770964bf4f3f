pub mod analyser;
pub mod indicators;

mod indicators_tests;

pub use analyser::TechnicalAnalyser;
