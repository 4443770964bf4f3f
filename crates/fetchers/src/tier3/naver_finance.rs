//! Naver Finance quote-page scraper (tier 3).
//!
//! The item page is EUC-KR encoded HTML; key ratios sit in elements with
//! stable ids (`_per`, `_pbr`, `_market_sum`). Decode first, parse with
//! `scraper`, and extract owned values before any further await.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::Utc;
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use scraper::{Html, Selector};
use serde_json::json;

use crate::{classify_http, classify_status, http_client};

const BASE_URL: &str = "https://finance.naver.com/item/main.naver";

pub struct NaverFinanceFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
}

impl NaverFinanceFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 1, "valuation", Tier::Scrape),
            client: http_client(),
        }
    }
}

#[derive(Debug)]
struct ScrapedRatios {
    per: Option<f64>,
    pbr: Option<f64>,
    market_cap: Option<f64>,
    roe: Option<f64>,
    debt_ratio: Option<f64>,
}

fn parse_ratio(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

fn scrape_ratios(html: &str) -> Result<ScrapedRatios, FetchError> {
    let doc = Html::parse_document(html);
    let select_text = |css: &str| -> Option<String> {
        let selector = Selector::parse(css).ok()?;
        let el = doc.select(&selector).next()?;
        Some(el.text().collect::<String>())
    };

    if select_text("#middle").is_none() && select_text(".wrap_company").is_none() {
        return Err(FetchError::Parse("quote page layout not recognised".into()));
    }

    // 시가총액 is quoted in 억원 on the page
    let market_cap = select_text("#_market_sum")
        .and_then(|t| parse_ratio(&t))
        .map(|v| v * 1e8);

    // ROE / 부채비율 live in the company-summary table
    let mut roe = None;
    let mut debt_ratio = None;
    if let Ok(row_sel) = Selector::parse("table tr") {
        for row in doc.select(&row_sel) {
            let text: String = row.text().collect();
            if text.contains("ROE") && roe.is_none() {
                roe = parse_ratio(text.split("ROE").nth(1).unwrap_or(""));
            }
            if text.contains("부채비율") && debt_ratio.is_none() {
                debt_ratio = parse_ratio(text.split("부채비율").nth(1).unwrap_or(""));
            }
        }
    }

    Ok(ScrapedRatios {
        per: select_text("#_per").and_then(|t| parse_ratio(&t)),
        pbr: select_text("#_pbr").and_then(|t| parse_ratio(&t)),
        market_cap,
        roe,
        debt_ratio,
    })
}

#[async_trait]
impl Fetcher for NaverFinanceFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let response = self
            .client
            .get(BASE_URL)
            .query(&[("code", ticker)])
            .send()
            .await
            .map_err(classify_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let bytes = response.bytes().await.map_err(classify_http)?;
        let (html, _, had_errors) = encoding_rs::EUC_KR.decode(&bytes);
        if had_errors {
            tracing::debug!(ticker, "EUC-KR decode produced replacement chars");
        }

        let ratios = scrape_ratios(&html)?;
        if ratios.per.is_none() && ratios.pbr.is_none() && ratios.market_cap.is_none() {
            return Err(FetchError::NotFound(format!(
                "{ticker}: quote page has no ratio data"
            )));
        }

        Ok(FetchPayload {
            data_type: "valuation".into(),
            data_date: Utc::now().date_naive(),
            content: json!({
                "source": "naver",
                "per": ratios.per,
                "pbr": ratios.pbr,
                "roe": ratios.roe,
                "debt_ratio": ratios.debt_ratio,
                "market_cap": ratios.market_cap,
            }),
        })
    }
}
