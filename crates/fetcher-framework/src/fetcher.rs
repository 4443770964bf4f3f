use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Static identity a fetcher declares at construction.
#[derive(Debug, Clone)]
pub struct FetcherDescriptor {
    pub site_id: i64,
    pub domain_id: i64,
    pub data_type: String,
    pub tier: Tier,
}

impl FetcherDescriptor {
    pub fn new(site_id: i64, domain_id: i64, data_type: impl Into<String>, tier: Tier) -> Self {
        Self {
            site_id,
            domain_id,
            data_type: data_type.into(),
            tier,
        }
    }
}

/// One fetched result: a self-describing content map plus the date it
/// describes. `data_type` may refine the descriptor's default (versioned
/// type strings).
#[derive(Debug, Clone)]
pub struct FetchPayload {
    pub data_type: String,
    pub data_date: NaiveDate,
    pub content: serde_json::Value,
}

/// Contract every source adapter satisfies. Fetchers are synchronous from
/// their own viewpoint: one ticker in, one payload out. Concurrency, rate
/// limiting, retry and persistence belong to the execution wrapper.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn descriptor(&self) -> &FetcherDescriptor;

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError>;
}
