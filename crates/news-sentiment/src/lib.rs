//! News sentiment scorer.
//!
//! Pipeline per run: de-duplicate headlines by title similarity (0.7
//! threshold on word-set overlap), then apply the smart filter — only
//! items matching a priority keyword (rank 1–5) or from a tier-A outlet
//! are worth an external model call; the rest settle for keyword scores.
//! The aggregate is priority-weighted and clamped to [-2, 2].

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;

/// (keyword, rank 1..5, per-item score). Lower rank = higher priority.
const PRIORITY_KEYWORDS: &[(&str, u8, f64)] = &[
    ("영업정지", 1, -2.0),
    ("상장폐지", 1, -2.0),
    ("횡령", 1, -2.0),
    ("대규모 수주", 1, 2.0),
    ("실적 서프라이즈", 2, 1.5),
    ("어닝쇼크", 2, -1.5),
    ("신고가", 2, 1.0),
    ("신저가", 2, -1.0),
    ("수주", 3, 1.0),
    ("증설", 3, 0.8),
    ("호실적", 3, 1.0),
    ("감익", 3, -0.8),
    ("목표가 상향", 4, 0.8),
    ("목표가 하향", 4, -0.8),
    ("매수 추천", 5, 0.5),
    ("투자의견 하향", 5, -0.5),
];

/// Outlets whose items always qualify for the external model.
const TIER_A_SOURCES: &[&str] = &["연합뉴스", "한국경제", "매일경제", "조선비즈"];

/// Word-set overlap similarity of two titles (Dice coefficient).
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let common = set_a.intersection(&set_b).count();
    2.0 * common as f64 / (set_a.len() + set_b.len()) as f64
}

#[derive(Debug, Clone)]
struct ScoredItem {
    title: String,
    source: Option<String>,
    keyword_score: f64,
    priority: Option<u8>,
    model_score: Option<f64>,
}

/// Optional external sentiment model over HTTP. The adapter posts a
/// title batch and reads back signed scores in [-1, 1].
#[derive(Clone)]
pub struct SentimentModelClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ModelResponse {
    scores: Vec<f64>,
}

impl SentimentModelClient {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("SENTIMENT_MODEL_URL").ok().map(Self::new)
    }

    async fn score(&self, titles: &[String]) -> Result<Vec<f64>, AnalysisError> {
        let response = self
            .client
            .post(format!("{}/score", self.url))
            .json(&json!({"titles": titles}))
            .send()
            .await
            .map_err(|e| AnalysisError::ModelError(e.to_string()))?;

        let parsed: ModelResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ModelError(format!("model response: {e}")))?;
        Ok(parsed.scores)
    }
}

pub struct NewsSentimentAnalyser {
    model: Option<SentimentModelClient>,
    similarity_threshold: f64,
}

impl NewsSentimentAnalyser {
    pub fn new(model: Option<SentimentModelClient>) -> Self {
        Self {
            model,
            similarity_threshold: 0.7,
        }
    }

    fn classify(title: &str) -> (f64, Option<u8>) {
        for (kw, rank, score) in PRIORITY_KEYWORDS {
            if title.contains(kw) {
                return (*score, Some(*rank));
            }
        }
        (0.0, None)
    }

    fn dedup(&self, items: Vec<ScoredItem>) -> (Vec<ScoredItem>, usize) {
        let mut kept: Vec<ScoredItem> = Vec::new();
        let mut removed = 0usize;
        for item in items {
            if kept
                .iter()
                .any(|k| title_similarity(&k.title, &item.title) >= self.similarity_threshold)
            {
                removed += 1;
                continue;
            }
            kept.push(item);
        }
        (kept, removed)
    }
}

impl Default for NewsSentimentAnalyser {
    fn default() -> Self {
        Self::new(SentimentModelClient::from_env())
    }
}

#[async_trait]
impl Analyser for NewsSentimentAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::News
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let Some(blob) = input.blob("news") else {
            let mut result = AnalyserResult::new(AnalyserKind::News, 0.0, "no news collected");
            result.metrics = json!({"item_count": 0});
            return Ok(result);
        };

        let raw: Vec<ScoredItem> = blob
            .get("items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let title = item.get("title")?.as_str()?.to_string();
                        let (keyword_score, priority) = Self::classify(&title);
                        Some(ScoredItem {
                            title,
                            source: item
                                .get("source")
                                .and_then(|v| v.as_str())
                                .map(str::to_string),
                            keyword_score,
                            priority,
                            model_score: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let raw_count = raw.len();
        let (mut items, duplicates_removed) = self.dedup(raw);

        // Smart filter: only priority or tier-A items earn a model call
        if let Some(model) = &self.model {
            let candidates: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(_, item)| {
                    item.priority.is_some()
                        || item
                            .source
                            .as_deref()
                            .is_some_and(|s| TIER_A_SOURCES.contains(&s))
                })
                .map(|(i, _)| i)
                .collect();

            if !candidates.is_empty() {
                let titles: Vec<String> =
                    candidates.iter().map(|&i| items[i].title.clone()).collect();
                match model.score(&titles).await {
                    Ok(scores) => {
                        for (&idx, score) in candidates.iter().zip(scores) {
                            items[idx].model_score = Some(score.clamp(-1.0, 1.0));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "sentiment model unavailable, keyword-only");
                    }
                }
            }
        }

        // Priority-weighted aggregate: rank 1 weighs 5x, rank 5 weighs 1x,
        // unranked 0.5x. Model score (scaled to the keyword band) wins
        // over the keyword score when present.
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut events = Vec::new();
        for item in &items {
            let weight = match item.priority {
                Some(rank) => (6 - rank.min(5)) as f64,
                None => 0.5,
            };
            let score = item
                .model_score
                .map(|m| m * 2.0)
                .unwrap_or(item.keyword_score);
            if score != 0.0 {
                events.push(format!("{} ({:+.1})", item.title, score));
            }
            weighted_sum += weight * score;
            weight_total += weight;
        }

        let score = if weight_total > 0.0 {
            (weighted_sum / weight_total).clamp(-2.0, 2.0)
        } else {
            0.0
        };

        events.truncate(8);
        let mut result = AnalyserResult::new(
            AnalyserKind::News,
            score,
            format!("{} headlines, {} duplicates removed", items.len(), duplicates_removed),
        );
        result.key_events = events;
        result.metrics = json!({
            "raw_count": raw_count,
            "item_count": items.len(),
            "duplicates_removed": duplicates_removed,
            "model_scored": items.iter().filter(|i| i.model_score.is_some()).count(),
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with_news(items: serde_json::Value) -> AnalysisInput {
        let mut input = AnalysisInput::new("005930", "2025-06-02".parse().unwrap());
        input.blobs.insert("news".into(), json!({"items": items}));
        input
    }

    #[test]
    fn similar_titles_exceed_threshold() {
        let a = "삼성전자 대규모 수주 공시 발표";
        let b = "삼성전자 대규모 수주 공시";
        assert!(title_similarity(a, b) >= 0.7);
        assert!(title_similarity(a, "전혀 다른 기사 제목") < 0.7);
    }

    #[tokio::test]
    async fn duplicates_are_removed_before_scoring() {
        let input = input_with_news(json!([
            {"title": "삼성전자 대규모 수주 공시 발표"},
            {"title": "삼성전자 대규모 수주 공시"},
            {"title": "시장 단신"},
        ]));
        let r = NewsSentimentAnalyser::new(None).analyse(&input).await.unwrap();
        assert_eq!(r.metrics["duplicates_removed"], 1);
        assert_eq!(r.metrics["item_count"], 2);
    }

    #[tokio::test]
    async fn priority_negative_dominates_unranked_noise() {
        let input = input_with_news(json!([
            {"title": "대표이사 횡령 혐의로 영업정지 위기"},
            {"title": "시장 단신 1"},
            {"title": "오늘의 주요 일정 안내"},
        ]));
        let r = NewsSentimentAnalyser::new(None).analyse(&input).await.unwrap();
        assert!(r.score < -1.0, "score = {}", r.score);
    }

    #[tokio::test]
    async fn positive_keyword_scores_up() {
        let input = input_with_news(json!([{"title": "2분기 실적 서프라이즈 기록"}]));
        let r = NewsSentimentAnalyser::new(None).analyse(&input).await.unwrap();
        assert!(r.score > 0.0);
    }

    #[tokio::test]
    async fn empty_feed_is_neutral() {
        let input = input_with_news(json!([]));
        let r = NewsSentimentAnalyser::new(None).analyse(&input).await.unwrap();
        assert_eq!(r.score, 0.0);
    }
}
