//! KRX investor-group trading API (tier 2): daily foreign / institution /
//! pension net buy amounts per issue.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use serde_json::json;

use crate::{classify_http, classify_status, http_client};

const ENDPOINT: &str = "http://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd";
const BLD_INVESTOR: &str = "dbms/MDC/STAT/standard/MDCSTAT02303";

pub struct KrxInvestorFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
    lookback_days: i64,
}

impl KrxInvestorFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 4, "supply_demand", Tier::Api),
            client: http_client(),
            lookback_days: 30,
        }
    }
}

fn num(row: &serde_json::Value, key: &str) -> f64 {
    row.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.replace(',', ""))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

#[async_trait]
impl Fetcher for KrxInvestorFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(self.lookback_days);
        let isu = format!("KR7{ticker}003");
        let strt = from.format("%Y%m%d").to_string();
        let end = today.format("%Y%m%d").to_string();

        let response = self
            .client
            .post(ENDPOINT)
            .header("Referer", "http://data.krx.co.kr/")
            .form(&[
                ("bld", BLD_INVESTOR),
                ("isuCd", isu.as_str()),
                ("strtDd", strt.as_str()),
                ("endDd", end.as_str()),
                ("askBid", "3"), // net
                ("trdVolVal", "2"), // value, KRW
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
            .map_err(|e| FetchError::Parse(format!("krx investor json: {e}")))?;

        let rows = value
            .get("OutBlock_1")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FetchError::Parse("missing OutBlock_1".into()))?;
        if rows.is_empty() {
            return Err(FetchError::NotFound(format!("no investor rows for {ticker}")));
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let Some(date) = row
                .get("TRD_DD")
                .and_then(|v| v.as_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y/%m/%d").ok())
            else {
                continue;
            };
            out.push(json!({
                "date": date.to_string(),
                "foreign_net": num(row, "FORN_NETBID_TRDVAL"),
                "institution_net": num(row, "INST_NETBID_TRDVAL"),
                "pension_net": num(row, "PENS_NETBID_TRDVAL"),
                "individual_net": num(row, "IND_NETBID_TRDVAL"),
            }));
        }

        Ok(FetchPayload {
            data_type: "supply_demand".into(),
            data_date: today,
            content: json!({"source": "krx", "rows": out}),
        })
    }
}
