use aegis_core::Site;
use fetcher_framework::Fetcher;
use std::sync::Arc;

use crate::tier1::{KisClient, KisDailyFetcher, KisTickFetcher, KrxOhlcvFetcher, KrxValuationFetcher};
use crate::tier2::{DartDisclosureFetcher, KrxInvestorFetcher};
use crate::tier3::{FnGuideConsensusFetcher, NaverFinanceFetcher, NaverNewsFetcher};
use crate::tier4::NaverBoardFetcher;

/// Builds a fetcher for each registry entry by name. Sites without an
/// adapter resolve to `None`; the orchestrator logs and skips them.
pub struct FetcherFactory {
    kis: Arc<KisClient>,
}

impl FetcherFactory {
    pub fn new() -> Self {
        Self {
            kis: Arc::new(KisClient::from_env()),
        }
    }

    pub fn build(&self, site: &Site) -> Option<Box<dyn Fetcher>> {
        let fetcher: Box<dyn Fetcher> = match site.name.as_str() {
            "krx-ohlcv" => Box::new(KrxOhlcvFetcher::new(site.id)),
            "krx-valuation" => Box::new(KrxValuationFetcher::new(site.id)),
            "kis-daily" => Box::new(KisDailyFetcher::new(site.id, Arc::clone(&self.kis))),
            "kis-tick" => Box::new(KisTickFetcher::new(site.id, Arc::clone(&self.kis))),
            "dart-disclosure" => Box::new(DartDisclosureFetcher::new(site.id)),
            "krx-investor" => Box::new(KrxInvestorFetcher::new(site.id)),
            "naver-finance" => Box::new(NaverFinanceFetcher::new(site.id)),
            "naver-news" => Box::new(NaverNewsFetcher::new(site.id)),
            "fnguide-consensus" => Box::new(FnGuideConsensusFetcher::new(site.id)),
            "naver-board-browser" => Box::new(NaverBoardFetcher::new(site.id)),
            _ => return None,
        };
        Some(fetcher)
    }
}

impl Default for FetcherFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_sites;

    #[test]
    fn factory_resolves_every_implemented_adapter() {
        let factory = FetcherFactory::new();
        let sites = default_sites();
        let built: Vec<&str> = sites
            .iter()
            .filter(|s| factory.build(s).is_some())
            .map(|s| s.name.as_str())
            .collect();

        assert!(built.contains(&"krx-ohlcv"));
        assert!(built.contains(&"dart-disclosure"));
        assert!(built.contains(&"naver-board-browser"));
        assert_eq!(built.len(), 10);
    }

    #[test]
    fn descriptor_carries_site_identity() {
        let factory = FetcherFactory::new();
        let site = default_sites()
            .into_iter()
            .find(|s| s.name == "naver-news")
            .unwrap();
        let fetcher = factory.build(&site).unwrap();
        assert_eq!(fetcher.descriptor().site_id, site.id);
        assert_eq!(fetcher.descriptor().data_type, "news");
    }
}
