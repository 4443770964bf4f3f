use std::sync::Arc;

use aegis_core::{AegisConfig, RecGrade, Recommendation};
use aegis_db::Db;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use screener::CandidateScreener;

use crate::collector::Collector;
use crate::pipeline::AnalysisPipeline;

/// Screen → collect → analyse → fuse → persist, one batch id tying the
/// run's recommendations together.
pub struct BatchRunner {
    db: Db,
    screener: CandidateScreener,
    collector: Collector,
    pipeline: AnalysisPipeline,
    /// Only candidates whose fused decision is a buy become records
    max_recommendations: usize,
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub batch_id: String,
    pub screened: usize,
    pub analysed: usize,
    pub recommended: usize,
}

impl BatchRunner {
    pub fn new(
        db: Db,
        config: Arc<AegisConfig>,
        collector: Collector,
    ) -> Self {
        let screener = CandidateScreener::new(db.clone(), config.screener.clone());
        let pipeline = AnalysisPipeline::new(db.clone(), Arc::clone(&config));
        Self {
            db,
            screener,
            collector,
            pipeline,
            max_recommendations: 10,
        }
    }

    pub async fn run(&self, as_of: NaiveDate) -> Result<BatchSummary> {
        let batch_id = format!("{}-{}", as_of, Utc::now().timestamp());
        tracing::info!(batch_id, "recommendation batch starting");

        let screen = self.screener.screen(as_of).await?;
        let mut analysed = 0usize;
        let mut recommended = 0usize;

        for candidate in &screen.candidates {
            if recommended >= self.max_recommendations {
                break;
            }

            if let Err(e) = self.collector.refresh(&candidate.code).await {
                tracing::warn!(code = %candidate.code, error = %e, "collect failed, analysing stale data");
            }

            let analysis = match self.pipeline.analyse(&candidate.code, as_of).await {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!(code = %candidate.code, error = %e, "analysis failed, skipping");
                    continue;
                }
            };
            analysed += 1;

            if !analysis.fused.decision.is_buy() {
                continue;
            }
            let Some(rec_price) = analysis.last_close else {
                continue;
            };

            let rationale = analysis
                .results
                .iter()
                .flat_map(|r| r.key_events.iter().cloned())
                .take(6)
                .collect::<Vec<_>>()
                .join("; ");

            let rec = Recommendation {
                id: 0,
                ticker: candidate.code.clone(),
                batch_id: batch_id.clone(),
                rec_date: as_of,
                rec_price,
                grade: RecGrade::from_final_score(analysis.fused.final_score),
                confidence: analysis.fused.confidence,
                rationale,
                scores: analysis.fused.contributions.clone(),
                final_score: analysis.fused.final_score,
            };

            match self.db.recommendations().insert(&rec).await {
                Ok(id) => {
                    recommended += 1;
                    tracing::info!(
                        code = %candidate.code,
                        rec_id = id,
                        score = analysis.fused.final_score,
                        grade = rec.grade.as_str(),
                        "recommendation persisted"
                    );
                }
                Err(e) => {
                    tracing::error!(code = %candidate.code, error = %e, "persist failed");
                }
            }
        }

        let summary = BatchSummary {
            batch_id,
            screened: screen.stage2_count,
            analysed,
            recommended,
        };
        tracing::info!(
            batch_id = %summary.batch_id,
            screened = summary.screened,
            analysed = summary.analysed,
            recommended = summary.recommended,
            "recommendation batch complete"
        );
        Ok(summary)
    }
}
