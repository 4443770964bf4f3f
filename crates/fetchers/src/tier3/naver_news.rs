//! Naver mobile stock-news JSON endpoint (tier 3). Returns headline
//! items in the shape the news-sentiment analyser reads.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::Utc;
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use serde_json::json;

use crate::{classify_http, classify_status, http_client};

const BASE_URL: &str = "https://m.stock.naver.com/api/news/stock";

pub struct NaverNewsFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
    page_size: u32,
}

impl NaverNewsFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 5, "news", Tier::Scrape),
            client: http_client(),
            page_size: 40,
        }
    }
}

fn flatten_items(value: &serde_json::Value) -> Vec<serde_json::Value> {
    // The feed nests items per press group; tolerate either shape.
    let mut out = Vec::new();
    let groups = match value.as_array() {
        Some(groups) => groups.clone(),
        None => return out,
    };
    for group in groups {
        if let Some(items) = group.get("items").and_then(|v| v.as_array()) {
            out.extend(items.iter().cloned());
        } else {
            out.push(group);
        }
    }
    out
}

#[async_trait]
impl Fetcher for NaverNewsFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let response = self
            .client
            .get(format!("{BASE_URL}/{ticker}"))
            .query(&[("pageSize", self.page_size.to_string()), ("page", "1".into())])
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
            .map_err(|e| FetchError::Parse(format!("naver news json: {e}")))?;

        let raw_items = flatten_items(&value);
        let items: Vec<serde_json::Value> = raw_items
            .iter()
            .filter_map(|item| {
                let title = item
                    .get("title")
                    .or_else(|| item.get("tit"))?
                    .as_str()?
                    .trim();
                if title.is_empty() {
                    return None;
                }
                Some(json!({
                    "title": title,
                    "url": item.get("linkUrl").or_else(|| item.get("url")).and_then(|v| v.as_str()),
                    "published_at": item
                        .get("datetime")
                        .or_else(|| item.get("dt"))
                        .and_then(|v| v.as_str()),
                    "source": item
                        .get("officeName")
                        .or_else(|| item.get("ohnm"))
                        .and_then(|v| v.as_str()),
                }))
            })
            .collect();

        let raw_count = raw_items.len();
        Ok(FetchPayload {
            data_type: "news".into(),
            data_date: Utc::now().date_naive(),
            content: json!({
                "source": "naver",
                "items": items,
                "raw_count": raw_count,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_handles_grouped_and_flat_feeds() {
        let grouped = json!([{"items": [{"title": "a"}, {"title": "b"}]}]);
        assert_eq!(flatten_items(&grouped).len(), 2);

        let flat = json!([{"title": "a"}]);
        assert_eq!(flatten_items(&flat).len(), 1);

        assert!(flatten_items(&json!({})).is_empty());
    }
}
