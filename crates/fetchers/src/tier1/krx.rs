//! KRX market-data endpoint adapters (tier 1).
//!
//! data.krx.co.kr serves the exchange's own statistics behind a form-POST
//! JSON endpoint keyed by a `bld` screen id. Numbers arrive as
//! comma-grouped strings and dates as `YYYY/MM/DD`.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use serde_json::json;

use crate::{classify_http, classify_status, http_client};

const ENDPOINT: &str = "http://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd";

const BLD_DAILY: &str = "dbms/MDC/STAT/standard/MDCSTAT01701";
const BLD_VALUATION: &str = "dbms/MDC/STAT/standard/MDCSTAT03501";

fn parse_krx_number(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse().ok()
}

fn parse_krx_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y/%m/%d").ok()
}

async fn query_krx(
    client: &reqwest::Client,
    bld: &str,
    params: &[(&str, &str)],
) -> Result<serde_json::Value, FetchError> {
    let mut form: Vec<(&str, &str)> = vec![("bld", bld)];
    form.extend_from_slice(params);

    let response = client
        .post(ENDPOINT)
        .header("Referer", "http://data.krx.co.kr/")
        .form(&form)
        .send()
        .await
        .map_err(classify_http)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, body));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| FetchError::Parse(format!("krx json: {e}")))
}

/// Rows come newest-first from KRX; callers get them oldest-first.
fn out_block(value: &serde_json::Value) -> Result<Vec<serde_json::Value>, FetchError> {
    let rows = value
        .get("OutBlock_1")
        .or_else(|| value.get("output"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| FetchError::Parse("missing OutBlock_1".into()))?;
    let mut rows = rows.clone();
    rows.reverse();
    Ok(rows)
}

/// Daily OHLCV from the exchange's issue-trend screen.
pub struct KrxOhlcvFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
    lookback_days: i64,
}

impl KrxOhlcvFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 1, "ohlcv", Tier::Official),
            client: http_client(),
            lookback_days: 90,
        }
    }
}

#[async_trait]
impl Fetcher for KrxOhlcvFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let today = Utc::now().date_naive();
        let from = today - chrono::Duration::days(self.lookback_days);
        let isu = format!("KR7{ticker}003");
        let strt = from.format("%Y%m%d").to_string();
        let end = today.format("%Y%m%d").to_string();

        let value = query_krx(
            &self.client,
            BLD_DAILY,
            &[
                ("isuCd", isu.as_str()),
                ("strtDd", strt.as_str()),
                ("endDd", end.as_str()),
                ("share", "1"),
                ("money", "1"),
            ],
        )
        .await?;

        let rows = out_block(&value)?;
        if rows.is_empty() {
            return Err(FetchError::NotFound(format!("no KRX rows for {ticker}")));
        }

        let mut bars = Vec::with_capacity(rows.len());
        for row in &rows {
            let get = |key: &str| row.get(key).and_then(|v| v.as_str()).unwrap_or("");
            let Some(date) = parse_krx_date(get("TRD_DD")) else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                parse_krx_number(get("TDD_OPNPRC")),
                parse_krx_number(get("TDD_HGPRC")),
                parse_krx_number(get("TDD_LWPRC")),
                parse_krx_number(get("TDD_CLSPRC")),
            ) else {
                continue;
            };
            let volume = parse_krx_number(get("ACC_TRDVOL")).unwrap_or(0.0);
            bars.push(json!({
                "date": date.to_string(),
                "open": open, "high": high, "low": low, "close": close,
                "volume": volume,
                "value": parse_krx_number(get("ACC_TRDVAL")),
            }));
        }

        if bars.is_empty() {
            return Err(FetchError::Parse(format!("all KRX rows malformed for {ticker}")));
        }

        Ok(FetchPayload {
            data_type: "ohlcv".into(),
            data_date: today,
            content: json!({"source": "krx", "bars": bars}),
        })
    }
}

/// PER/PBR/dividend valuation metrics plus market cap.
pub struct KrxValuationFetcher {
    descriptor: FetcherDescriptor,
    client: reqwest::Client,
}

impl KrxValuationFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 1, "valuation", Tier::Official),
            client: http_client(),
        }
    }
}

#[async_trait]
impl Fetcher for KrxValuationFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let today = Utc::now().date_naive();
        let trd = today.format("%Y%m%d").to_string();
        let value = query_krx(
            &self.client,
            BLD_VALUATION,
            &[("trdDd", trd.as_str()), ("searchType", "1"), ("mktId", "ALL")],
        )
        .await?;

        let rows = out_block(&value)?;
        let row = rows
            .iter()
            .find(|r| r.get("ISU_SRT_CD").and_then(|v| v.as_str()) == Some(ticker))
            .ok_or_else(|| FetchError::NotFound(format!("{ticker} absent from valuation screen")))?;

        let get = |key: &str| {
            row.get(key)
                .and_then(|v| v.as_str())
                .and_then(parse_krx_number)
        };

        Ok(FetchPayload {
            data_type: "valuation".into(),
            data_date: today,
            content: json!({
                "source": "krx",
                "per": get("PER"),
                "pbr": get("PBR"),
                "eps": get("EPS"),
                "bps": get("BPS"),
                "dividend_yield": get("DVD_YLD"),
                "market_cap": get("MKTCAP"),
                "trading_value": get("ACC_TRDVAL"),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn krx_numbers_strip_grouping() {
        assert_eq!(parse_krx_number("71,500"), Some(71_500.0));
        assert_eq!(parse_krx_number("-"), None);
        assert_eq!(parse_krx_number(""), None);
    }

    #[test]
    fn krx_dates_use_slashes() {
        assert_eq!(
            parse_krx_date("2025/06/02"),
            Some(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap())
        );
        assert_eq!(parse_krx_date("20250602"), None);
    }

    #[test]
    fn out_block_reverses_to_oldest_first() {
        let v = json!({"OutBlock_1": [{"TRD_DD": "2025/06/03"}, {"TRD_DD": "2025/06/02"}]});
        let rows = out_block(&v).unwrap();
        assert_eq!(rows[0]["TRD_DD"], "2025/06/02");
    }
}
