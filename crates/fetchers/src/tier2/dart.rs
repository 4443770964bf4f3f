//! DART (금융감독원 전자공시) disclosure feed adapter (tier 2).
//!
//! The list API is keyed by DART's own corp_code, not the exchange issue
//! code; the mapping ships as a TSV (`DART_CORP_MAP`, `code<TAB>corp_code`
//! per line) refreshed out of band from DART's corpCode archive.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::Utc;
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use serde_json::json;
use std::collections::HashMap;

use crate::{classify_http, classify_status, http_client};

const LIST_URL: &str = "https://opendart.fss.or.kr/api/list.json";

/// Disclosures over the trailing window (30 days).
pub struct DartDisclosureFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
    api_key: String,
    corp_map: HashMap<String, String>,
    window_days: i64,
}

impl DartDisclosureFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 3, "disclosure", Tier::Api),
            client: http_client(),
            api_key: std::env::var("DART_API_KEY").unwrap_or_default(),
            corp_map: load_corp_map(),
            window_days: 30,
        }
    }

    #[cfg(test)]
    fn with_map(mut self, map: HashMap<String, String>) -> Self {
        self.corp_map = map;
        self
    }
}

fn load_corp_map() -> HashMap<String, String> {
    let Some(path) = std::env::var_os("DART_CORP_MAP") else {
        return HashMap::new();
    };
    let Ok(raw) = std::fs::read_to_string(&path) else {
        tracing::warn!(?path, "DART corp map unreadable");
        return HashMap::new();
    };
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            Some((parts.next()?.to_string(), parts.next()?.to_string()))
        })
        .collect()
}

#[async_trait]
impl Fetcher for DartDisclosureFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        if self.api_key.is_empty() {
            return Err(FetchError::Auth("DART_API_KEY not configured".into()));
        }
        let corp_code = self
            .corp_map
            .get(ticker)
            .ok_or_else(|| FetchError::NotFound(format!("{ticker} has no DART corp_code")))?;

        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(self.window_days);

        let response = self
            .client
            .get(LIST_URL)
            .query(&[
                ("crtfc_key", self.api_key.as_str()),
                ("corp_code", corp_code.as_str()),
                ("bgn_de", &from.format("%Y%m%d").to_string()),
                ("end_de", &today.format("%Y%m%d").to_string()),
                ("page_count", "100"),
            ])
            .send()
            .await
            .map_err(classify_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("dart json: {e}")))?;

        // status "000" ok, "013" no data, "020"/"021" key problems
        match value.get("status").and_then(|v| v.as_str()) {
            Some("000") => {}
            Some("013") => {
                return Ok(FetchPayload {
                    data_type: "disclosure".into(),
                    data_date: today,
                    content: json!({"source": "dart", "items": [], "raw_count": 0}),
                })
            }
            Some("020") | Some("021") => {
                return Err(FetchError::Auth("DART key rejected or exhausted".into()))
            }
            other => {
                return Err(FetchError::Parse(format!("dart status {other:?}")));
            }
        }

        let items: Vec<serde_json::Value> = value
            .get("list")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|item| {
                        let title = item.get("report_nm")?.as_str()?.trim();
                        Some(json!({
                            "title": title,
                            "rcept_no": item.get("rcept_no").and_then(|v| v.as_str()),
                            "filed_at": item.get("rcept_dt").and_then(|v| v.as_str()),
                            "submitter": item.get("flr_nm").and_then(|v| v.as_str()),
                        }))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let raw_count = items.len();
        Ok(FetchPayload {
            data_type: "disclosure".into(),
            data_date: today,
            content: json!({"source": "dart", "items": items, "raw_count": raw_count}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unmapped_ticker_is_not_found() {
        let fetcher = DartDisclosureFetcher {
            api_key: "k".into(),
            ..DartDisclosureFetcher::new(10)
        }
        .with_map(HashMap::new());

        let err = fetcher.fetch("005930").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_key_is_auth() {
        let mut fetcher = DartDisclosureFetcher::new(10);
        fetcher.api_key = String::new();
        let err = fetcher.fetch("005930").await.unwrap_err();
        assert!(matches!(err, FetchError::Auth(_)));
    }
}
