use crate::{AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput};
use async_trait::async_trait;

/// One scoring dimension of the AEGIS ensemble.
///
/// Implementations are pure over their input: the engine loads bars, ticks,
/// supply/demand and collected blobs into an [`AnalysisInput`] and every
/// analyser reads only the slices it cares about. Missing data degrades to
/// a neutral result, never an abort.
#[async_trait]
pub trait Analyser: Send + Sync {
    fn kind(&self) -> AnalyserKind;

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError>;
}
