use aegis_core::{Performance, Recommendation, RetroConfig, Retrospective};
use aegis_db::Db;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// External oracle contract: a structured prompt in, a JSON object with
/// the retrospective fields out. Vendor is swappable behind this trait.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Gemini REST adapter.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").ok()?;
        Some(Self {
            client: reqwest::Client::new(),
            api_key,
            model: std::env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-1.5-flash".to_string()),
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"response_mime_type": "application/json"},
            }))
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("no candidate text in Gemini response"))?;
        Ok(text.to_string())
    }
}

/// Builds the retrospective prompt for one failed recommendation.
fn build_prompt(rec: &Recommendation, perf: &Performance, headlines: &[String]) -> String {
    let mut prompt = format!(
        "다음 주식 추천이 실패했다. 원인을 복기하라.\n\
         종목: {}\n추천일: {} (추천가 {:.0}원)\n\
         추천 근거: {}\n\
         {}일 후 수익률: {:.1}%\n보유 중 최대 낙폭: {:.1}%\n",
        rec.ticker,
        rec.rec_date,
        rec.rec_price,
        rec.rationale,
        perf.days_held,
        perf.return_rate * 100.0,
        perf.max_drawdown * 100.0,
    );
    if !headlines.is_empty() {
        prompt.push_str("추천 이후 주요 뉴스:\n");
        for h in headlines.iter().take(5) {
            prompt.push_str(&format!("- {h}\n"));
        }
    }
    prompt.push_str(
        "\nJSON으로만 답하라: {\"missed_risks\": string, \"actual_cause\": string, \
         \"lesson\": string, \"improvement\": string, \"confidence_adjustment\": number(-10..10)}",
    );
    prompt
}

/// Strip markdown fences the model sometimes wraps around JSON.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse and validate the model's reply. Any missing field fails the
/// whole parse: no partial retrospective is ever written.
fn parse_response(rec_id: i64, days_held: u32, raw: &str) -> Option<Retrospective> {
    let value: serde_json::Value = serde_json::from_str(strip_fences(raw)).ok()?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };
    Some(Retrospective {
        rec_id,
        days_held,
        missed_risks: text("missed_risks")?,
        actual_cause: text("actual_cause")?,
        lesson: text("lesson")?,
        improvement: text("improvement")?,
        confidence_adjustment: value
            .get("confidence_adjustment")?
            .as_f64()?
            .clamp(-10.0, 10.0),
    })
}

/// Closes the learning loop: every failed performance row gets exactly
/// one AI retrospective, rate-limited and batch-capped.
pub struct RetrospectiveEngine {
    db: Db,
    llm: Box<dyn LlmClient>,
    config: RetroConfig,
}

#[derive(Debug, Default, Clone)]
pub struct RetroSummary {
    pub attempted: usize,
    pub written: usize,
    pub ai_errors: usize,
}

impl RetrospectiveEngine {
    pub fn new(db: Db, llm: Box<dyn LlmClient>, config: RetroConfig) -> Self {
        Self { db, llm, config }
    }

    pub async fn run(&self) -> Result<RetroSummary> {
        let pending = self
            .db
            .recommendations()
            .failed_without_retrospective(self.config.batch_limit)
            .await?;

        let mut summary = RetroSummary::default();
        for (rec, perf) in pending {
            if summary.attempted > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.call_interval_secs)).await;
            }
            summary.attempted += 1;

            let headlines = self.post_rec_headlines(&rec).await;
            let prompt = build_prompt(&rec, &perf, &headlines);

            let raw = match self.llm.complete(&prompt).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(rec_id = rec.id, error = %e, "ai_error: model call failed");
                    summary.ai_errors += 1;
                    continue;
                }
            };

            let Some(retro) = parse_response(rec.id, perf.days_held, &raw) else {
                tracing::error!(rec_id = rec.id, "ai_error: unparseable retrospective, skipped");
                summary.ai_errors += 1;
                continue;
            };

            match self.db.recommendations().insert_retrospective(&retro).await {
                Ok(()) => {
                    summary.written += 1;
                    tracing::info!(
                        rec_id = rec.id,
                        horizon = perf.days_held,
                        adjustment = retro.confidence_adjustment,
                        "retrospective persisted"
                    );
                }
                Err(e) => {
                    // A concurrent run already wrote it; uniqueness holds
                    tracing::warn!(rec_id = rec.id, error = %e, "retrospective insert skipped");
                }
            }
        }
        Ok(summary)
    }

    async fn post_rec_headlines(&self, rec: &Recommendation) -> Vec<String> {
        match self.db.blobs().latest(&rec.ticker, "news").await {
            Ok(Some(blob)) => blob
                .get("items")
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.get("title").and_then(|t| t.as_str()))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
