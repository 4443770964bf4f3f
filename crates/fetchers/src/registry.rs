use aegis_core::{Site, Tier};

/// The 41 known sources, tiered by reliability and cost. Tier controls
/// execution order and default rate limits, never fetching semantics.
///
/// Names marked with an implemented adapter resolve through the factory;
/// the rest are registry placeholders that the orchestrator logs and
/// skips until an adapter lands.
pub fn default_sites() -> Vec<Site> {
    let mut sites = Vec::new();
    let mut push = |id: i64, name: &str, tier: Tier, rate: u32| {
        sites.push(Site {
            id,
            name: name.to_string(),
            tier,
            rate_limit_per_minute: Some(rate),
            timeout_secs: None,
            is_active: true,
        });
    };

    // Tier 1 — official libraries / first-party data endpoints
    push(1, "krx-ohlcv", Tier::Official, 120);
    push(2, "krx-valuation", Tier::Official, 120);
    push(3, "krx-listing", Tier::Official, 30);
    push(4, "kis-daily", Tier::Official, 60);
    push(5, "kis-tick", Tier::Official, 300);
    push(6, "kis-master", Tier::Official, 10);
    push(7, "krx-index", Tier::Official, 60);
    push(8, "krx-sector", Tier::Official, 60);

    // Tier 2 — documented HTTP APIs
    push(10, "dart-disclosure", Tier::Api, 60);
    push(11, "krx-investor", Tier::Api, 60);
    push(12, "dart-financials", Tier::Api, 30);
    push(13, "krx-short-interest", Tier::Api, 30);
    push(14, "ecos-macro", Tier::Api, 30);
    push(15, "kofia-fund-flow", Tier::Api, 20);
    push(16, "seibro-dividend", Tier::Api, 20);
    push(17, "dart-major-holders", Tier::Api, 30);
    push(18, "krx-etf", Tier::Api, 30);
    push(19, "openapi-holiday", Tier::Api, 10);

    // Tier 3 — scraped HTML/JSON endpoints
    push(20, "naver-finance", Tier::Scrape, 60);
    push(21, "naver-news", Tier::Scrape, 60);
    push(22, "fnguide-consensus", Tier::Scrape, 30);
    push(23, "naver-investor-trend", Tier::Scrape, 40);
    push(24, "naver-sise-day", Tier::Scrape, 60);
    push(25, "daum-finance", Tier::Scrape, 40);
    push(26, "fnguide-highlight", Tier::Scrape, 30);
    push(27, "naver-research", Tier::Scrape, 30);
    push(28, "hankyung-consensus", Tier::Scrape, 20);
    push(29, "sedaily-news", Tier::Scrape, 30);
    push(30, "mk-news", Tier::Scrape, 30);
    push(31, "etoday-news", Tier::Scrape, 30);
    push(32, "paxnet-board", Tier::Scrape, 20);
    push(33, "38com-ipo", Tier::Scrape, 10);
    push(34, "kind-krx-notice", Tier::Scrape, 30);
    push(35, "naver-world-index", Tier::Scrape, 30);

    // Tier 4 — headless browser (memory-heavy, serialised)
    push(40, "naver-board-browser", Tier::Browser, 10);
    push(41, "tradingview-chart", Tier::Browser, 6);
    push(42, "investing-krw", Tier::Browser, 6);
    push(43, "fnguide-browser", Tier::Browser, 6);
    push(44, "telegram-channel-board", Tier::Browser, 6);
    push(45, "youtube-transcript", Tier::Browser, 4);

    sites
}
