//! Disclosure scorer over the trailing 30-day official filing feed.
//!
//! Each filing title is matched against a keyword table; halt triggers
//! (거래정지, 횡령, 배임 등) additionally raise the `trading_halt` flag,
//! which is a hard veto downstream regardless of the aggregate score.

use aegis_core::{
    Analyser, AnalyserKind, AnalyserResult, AnalysisError, AnalysisInput,
};
use async_trait::async_trait;
use serde_json::json;

/// (keyword, per-item score). Checked in order; first match wins per item.
const KEYWORD_SCORES: &[(&str, f64)] = &[
    ("공급계약", 2.0),
    ("수주", 2.0),
    ("자기주식취득", 1.5),
    ("자사주", 1.5),
    ("현금배당", 1.0),
    ("배당", 1.0),
    ("무상증자", 1.0),
    ("특허", 0.5),
    ("신규시설투자", 0.5),
    ("소송", -0.5),
    ("유상증자", -0.5),
    ("전환사채", -0.5),
    ("감자", -1.0),
    ("관리종목", -1.5),
    ("상장폐지", -1.5),
];

/// Any of these in a title forces the trading-halt veto.
const HALT_TRIGGERS: &[&str] = &["거래정지", "횡령", "배임", "분식회계", "매매거래정지"];

pub struct DisclosureAnalyser;

impl DisclosureAnalyser {
    pub fn new() -> Self {
        Self
    }

    fn score_title(title: &str) -> (f64, bool) {
        let halt = HALT_TRIGGERS.iter().any(|t| title.contains(t));
        let score = KEYWORD_SCORES
            .iter()
            .find(|(kw, _)| title.contains(kw))
            .map(|(_, s)| *s)
            .unwrap_or(0.0);
        (score, halt)
    }
}

impl Default for DisclosureAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Analyser for DisclosureAnalyser {
    fn kind(&self) -> AnalyserKind {
        AnalyserKind::Disclosure
    }

    async fn analyse(&self, input: &AnalysisInput) -> Result<AnalyserResult, AnalysisError> {
        let Some(blob) = input.blob("disclosure") else {
            // No feed collected: neutral, not an error
            let mut result =
                AnalyserResult::new(AnalyserKind::Disclosure, 0.0, "no disclosures collected");
            result.metrics = json!({"item_count": 0});
            return Ok(result);
        };

        let items = blob
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut total = 0.0;
        let mut trading_halt = false;
        let mut scored = 0usize;
        let mut events = Vec::new();

        for item in &items {
            let Some(title) = item.get("title").and_then(|v| v.as_str()) else {
                continue;
            };
            let (score, halt) = Self::score_title(title);
            if halt {
                trading_halt = true;
                events.push(format!("거래정지 트리거: {title}"));
            }
            if score != 0.0 {
                total += score;
                scored += 1;
                events.push(format!("{title} ({score:+.1})"));
            }
        }

        // Average keeps one prolific filer from saturating the band
        let score = if scored > 0 {
            (total / scored as f64).clamp(-2.0, 2.0)
        } else {
            0.0
        };

        let notes = if trading_halt {
            "trading-halt disclosure present".to_string()
        } else {
            format!("{scored}/{} filings scored", items.len())
        };

        let mut result = AnalyserResult::new(AnalyserKind::Disclosure, score, notes);
        result.flags.trading_halt = trading_halt;
        result.key_events = events;
        result.metrics = json!({
            "item_count": items.len(),
            "scored_count": scored,
            "raw_total": total,
            "trading_halt": trading_halt,
        });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input_with_titles(titles: &[&str]) -> AnalysisInput {
        let mut input = AnalysisInput::new("005930", "2025-06-02".parse().unwrap());
        let items: Vec<_> = titles.iter().map(|t| json!({"title": t})).collect();
        input
            .blobs
            .insert("disclosure".into(), json!({"items": items}));
        input
    }

    #[tokio::test]
    async fn supply_contract_scores_positive() {
        let input = input_with_titles(&["단일판매ㆍ공급계약 체결"]);
        let r = DisclosureAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, 2.0);
        assert!(!r.flags.trading_halt);
    }

    #[tokio::test]
    async fn halt_trigger_sets_flag_even_with_positive_aggregate() {
        let input = input_with_titles(&["공급계약 체결", "자기주식취득 결정", "횡령 혐의 발생"]);
        let r = DisclosureAnalyser::new().analyse(&input).await.unwrap();
        assert!(r.flags.trading_halt);
        assert!(r.score > 0.0);
    }

    #[tokio::test]
    async fn capital_increase_scores_negative() {
        let input = input_with_titles(&["유상증자 결정"]);
        let r = DisclosureAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, -0.5);
    }

    #[tokio::test]
    async fn missing_feed_is_neutral() {
        let input = AnalysisInput::new("005930", "2025-06-02".parse().unwrap());
        let r = DisclosureAnalyser::new().analyse(&input).await.unwrap();
        assert_eq!(r.score, 0.0);
    }
}
