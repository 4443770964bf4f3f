//! Headless-browser crawler for the Naver investor discussion board
//! (tier 4). The board renders titles client-side, so a real browser tab
//! is required. Memory-heavy: the orchestrator serialises this tier to a
//! single concurrent instance.

use aegis_core::{FetchError, Tier};
use async_trait::async_trait;
use chrono::Utc;
use fetcher_framework::{FetchPayload, Fetcher, FetcherDescriptor};
use headless_chrome::{Browser, LaunchOptions};
use serde_json::json;
use std::time::Duration;

pub struct NaverBoardFetcher {
    descriptor: FetcherDescriptor,
    max_posts: usize,
}

impl NaverBoardFetcher {
    pub fn new(site_id: i64) -> Self {
        Self {
            descriptor: FetcherDescriptor::new(site_id, 7, "board", Tier::Browser),
            max_posts: 30,
        }
    }
}

/// Everything browser-side is blocking; run it on the blocking pool and
/// hand back owned strings only.
fn crawl_board(ticker: &str, max_posts: usize) -> Result<Vec<String>, FetchError> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .idle_browser_timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| FetchError::Transient(format!("browser launch options: {e}")))?;

    let browser =
        Browser::new(options).map_err(|e| FetchError::Transient(format!("browser launch: {e}")))?;
    let tab = browser
        .new_tab()
        .map_err(|e| FetchError::Transient(format!("new tab: {e}")))?;

    let url = format!("https://finance.naver.com/item/board.naver?code={ticker}");
    tab.navigate_to(&url)
        .and_then(|t| t.wait_until_navigated())
        .map_err(|e| FetchError::Transient(format!("navigate: {e}")))?;

    let titles = tab
        .wait_for_elements("table.type2 td.title a")
        .map_err(|e| FetchError::Parse(format!("board table missing: {e}")))?;

    let mut posts = Vec::new();
    for el in titles.into_iter().take(max_posts) {
        if let Ok(Some(title)) = el.get_attribute_value("title") {
            let trimmed = title.trim().to_string();
            if !trimmed.is_empty() {
                posts.push(trimmed);
            }
        }
    }

    if posts.is_empty() {
        return Err(FetchError::NotFound(format!("{ticker}: empty board")));
    }
    Ok(posts)
}

#[async_trait]
impl Fetcher for NaverBoardFetcher {
    fn descriptor(&self) -> &FetcherDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, ticker: &str) -> Result<FetchPayload, FetchError> {
        let ticker_owned = ticker.to_string();
        let max_posts = self.max_posts;

        let posts = tokio::task::spawn_blocking(move || crawl_board(&ticker_owned, max_posts))
            .await
            .map_err(|e| FetchError::Transient(format!("browser task join: {e}")))??;

        let post_count = posts.len();
        Ok(FetchPayload {
            data_type: "board".into(),
            data_date: Utc::now().date_naive(),
            content: json!({
                "source": "naver_board",
                "posts": posts.iter().map(|t| json!({"title": t})).collect::<Vec<_>>(),
                "post_count": post_count,
            }),
        })
    }
}
