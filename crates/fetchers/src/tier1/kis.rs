//! Korea Investment & Securities open-API adapters (tier 1).
//!
//! One shared [`KisClient`] handles credential loading and access-token
//! caching; the daily-bar and tick fetchers borrow it. Tokens are valid
//! for 24 h, cached in-process and refreshed 10 minutes early.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{classify_http, classify_status, http_client};

const PROD_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";

const TR_DAILY_PRICE: &str = "FHKST01010400";
const TR_CURRENT_PRICE: &str = "FHKST01010100";

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    fetched_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct KisClient {
    http: reqwest::Client,
    base_url: String,
    appkey: String,
    appsecret: String,
    token_cache: Mutex<Option<CachedToken>>,
}

impl KisClient {
    /// Build from `KIS_APPKEY` / `KIS_APPSECRET`. Missing credentials are
    /// an `Auth` failure at fetch time, not a construction error, so the
    /// orchestrator can still instantiate the registry.
    pub fn from_env() -> Self {
        Self {
            http: http_client(),
            base_url: std::env::var("KIS_BASE_URL").unwrap_or_else(|_| PROD_BASE_URL.to_string()),
            appkey: std::env::var("KIS_APPKEY").unwrap_or_default(),
            appsecret: std::env::var("KIS_APPSECRET").unwrap_or_default(),
            token_cache: Mutex::new(None),
        }
    }

    fn credentials(&self) -> Result<(), FetchError> {
        if self.appkey.is_empty() || self.appsecret.is_empty() {
            return Err(FetchError::Auth(
                "KIS_APPKEY / KIS_APPSECRET not configured".into(),
            ));
        }
        Ok(())
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        self.credentials()?;

        let mut cache = self.token_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Utc::now() - cached.fetched_at < chrono::Duration::hours(23) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .post(format!("{}/oauth2/tokenP", self.base_url))
            .json(&json!({
                "grant_type": "client_credentials",
                "appkey": self.appkey,
                "appsecret": self.appsecret,
            }))
            .send()
            .await
            .map_err(classify_http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => FetchError::Auth(body),
                _ => classify_status(status, body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("token response: {e}")))?;

        *cache = Some(CachedToken {
            token: token.access_token.clone(),
            fetched_at: Utc::now(),
        });
        Ok(token.access_token)
    }

    async fn quote(
        &self,
        path: &str,
        tr_id: &str,
        ticker: &str,
    ) -> Result<serde_json::Value, FetchError> {
        let token = self.access_token().await?;

        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header("authorization", format!("Bearer {token}"))
            .header("appkey", &self.appkey)
            .header("appsecret", &self.appsecret)
            .header("tr_id", tr_id)
            .query(&[
                ("FID_COND_MRKT_DIV_CODE", "J"),
                ("FID_INPUT_ISCD", ticker),
                ("FID_PERIOD_DIV_CODE", "D"),
                ("FID_ORG_ADJ_PRC", "1"),
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
            .map_err(|e| FetchError::Parse(format!("kis response: {e}")))?;

        // rt_cd "0" is success; anything else carries a msg1 explanation
        match value.get("rt_cd").and_then(|v| v.as_str()) {
            Some("0") => Ok(value),
            Some(_) => {
                let msg = value
                    .get("msg1")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown KIS error");
                Err(FetchError::Transient(msg.to_string()))
            }
            None => Err(FetchError::Parse("missing rt_cd".into())),
        }
    }
}

fn kis_f64(row: &serde_json::Value, key: &str) -> Option<f64> {
    row.get(key)?.as_str()?.parse().ok()
}

/// Adjusted daily bars (most recent ~30 sessions).
pub struct KisDailyFetcher {
    descriptor: FetcherDescriptor,
    client: Arc<KisClient>,
}

impl KisDailyFetcher {
    pub fn new(site_id: i64, client: Arc<KisClient>) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 2, "ohlcv", Tier::Official),
            client,
        }
    }
}

#[async_trait]
impl Fetcher for KisDailyFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let value = self
            .client
            .quote(
                "/uapi/domestic-stock/v1/quotations/inquire-daily-price",
                TR_DAILY_PRICE,
                ticker,
            )
            .await?;

        let rows = value
            .get("output")
            .and_then(|v| v.as_array())
            .ok_or_else(|| FetchError::Parse("missing output array".into()))?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let Some(date_raw) = row.get("stck_bsop_date").and_then(|v| v.as_str()) else {
                continue;
            };
            let Ok(date) = chrono::NaiveDate::parse_from_str(date_raw, "%Y%m%d") else {
                continue;
            };
            let (Some(open), Some(high), Some(low), Some(close)) = (
                kis_f64(row, "stck_oprc"),
                kis_f64(row, "stck_hgpr"),
                kis_f64(row, "stck_lwpr"),
                kis_f64(row, "stck_clpr"),
            ) else {
                continue;
            };
            bars.push(json!({
                "date": date.to_string(),
                "open": open, "high": high, "low": low, "close": close,
                "volume": kis_f64(row, "acml_vol").unwrap_or(0.0),
            }));
        }

        if bars.is_empty() {
            return Err(FetchError::NotFound(format!("no KIS bars for {ticker}")));
        }

        Ok(FetchPayload {
            data_type: "ohlcv".into(),
            data_date: Utc::now().date_naive(),
            content: json!({"source": "kis", "bars": bars}),
        })
    }
}

/// Current-price snapshot recorded as a single tick.
pub struct KisTickFetcher {
    descriptor: FetcherDescriptor,
    client: Arc<KisClient>,
}

impl KisTickFetcher {
    pub fn new(site_id: i64, client: Arc<KisClient>) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 2, "tick", Tier::Official),
            client,
        }
    }
}

#[async_trait]
impl Fetcher for KisTickFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let value = self
            .client
            .quote(
                "/uapi/domestic-stock/v1/quotations/inquire-price",
                TR_CURRENT_PRICE,
                ticker,
            )
            .await?;

        let output = value
            .get("output")
            .ok_or_else(|| FetchError::Parse("missing output".into()))?;

        let price = kis_f64(output, "stck_prpr")
            .ok_or_else(|| FetchError::Parse("missing stck_prpr".into()))?;
        if price <= 0.0 {
            return Err(FetchError::NotFound(format!("{ticker} has no traded price")));
        }

        let now = Utc::now();
        Ok(FetchPayload {
            data_type: "tick".into(),
            data_date: now.date_naive(),
            content: json!({
                "source": "kis",
                "ticks": [{
                    "ts": now.to_rfc3339(),
                    "price": price,
                    "volume": kis_f64(output, "acml_vol").unwrap_or(0.0),
                }],
                "change_rate": kis_f64(output, "prdy_ctrt"),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kis_numbers_are_strings() {
        let row = json!({"stck_clpr": "71500"});
        assert_eq!(kis_f64(&row, "stck_clpr"), Some(71_500.0));
        assert_eq!(kis_f64(&row, "missing"), None);
    }

    #[tokio::test]
    async fn missing_credentials_fail_auth() {
        let client = KisClient {
            http: http_client(),
            base_url: PROD_BASE_URL.into(),
            appkey: String::new(),
            appsecret: String::new(),
            token_cache: Mutex::new(None),
        };
        let err = client.access_token().await.unwrap_err();
        assert!(matches!(err, FetchError::Auth(_)));
    }
}
