use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Korean equity market segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Kospi,
    Kosdaq,
    Konex,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
            Market::Konex => "KONEX",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "KOSPI" => Some(Market::Kospi),
            "KOSDAQ" => Some(Market::Kosdaq),
            "KONEX" => Some(Market::Konex),
            _ => None,
        }
    }
}

/// Listed ticker. `code` is the 6-digit KRX issue code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub sector: Option<String>,
    pub is_delisted: bool,
}

/// Daily OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBar {
    pub code: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    /// Bar is internally consistent: low <= open,close <= high and volume >= 0.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
            && self.volume >= 0.0
    }
}

/// Intraday tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub code: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

/// Daily investor supply/demand (net buy amounts, KRW)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplyDemand {
    pub code: String,
    pub date: NaiveDate,
    pub foreign_net: f64,
    pub institution_net: f64,
    pub pension_net: f64,
    pub individual_net: f64,
}

/// Reliability/cost class of a data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Vetted official library adapters
    Official = 1,
    /// Documented HTTP APIs
    Api = 2,
    /// Scraped HTML/JSON endpoints
    Scrape = 3,
    /// Headless browser (serialised to one instance)
    Browser = 4,
}

impl Tier {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(Tier::Official),
            2 => Some(Tier::Api),
            3 => Some(Tier::Scrape),
            4 => Some(Tier::Browser),
            _ => None,
        }
    }

    pub const ALL: [Tier; 4] = [Tier::Official, Tier::Api, Tier::Scrape, Tier::Browser];
}

/// Row of the site registry, read at orchestrator startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub tier: Tier,
    pub rate_limit_per_minute: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub is_active: bool,
}

/// Site health, mutated by the fetch execution wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Active,
    Degraded,
    Down,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Active => "active",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(HealthStatus::Active),
            "degraded" => Some(HealthStatus::Degraded),
            "down" => Some(HealthStatus::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteHealth {
    pub site_id: i64,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub avg_latency_ms: f64,
    pub last_success_ts: Option<DateTime<Utc>>,
}

/// Opaque collected payload, upserted by (ticker, site, domain, data_type, data_date)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedBlob {
    pub ticker: String,
    pub site_id: i64,
    pub domain_id: i64,
    pub data_type: String,
    pub data_date: NaiveDate,
    pub content: serde_json::Value,
}

/// Current holding; `current_price` mirrors the latest tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub code: String,
    pub quantity: f64,
    pub avg_buy_price: f64,
    pub current_price: f64,
}

/// Recommendation grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecGrade {
    S,
    A,
    B,
    C,
    D,
}

impl RecGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecGrade::S => "S",
            RecGrade::A => "A",
            RecGrade::B => "B",
            RecGrade::C => "C",
            RecGrade::D => "D",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S" => Some(RecGrade::S),
            "A" => Some(RecGrade::A),
            "B" => Some(RecGrade::B),
            "C" => Some(RecGrade::C),
            "D" => Some(RecGrade::D),
            _ => None,
        }
    }

    /// Grade from the fused score in [-1, 1].
    pub fn from_final_score(score: f64) -> Self {
        match score {
            s if s >= 0.66 => RecGrade::S,
            s if s >= 0.40 => RecGrade::A,
            s if s >= 0.22 => RecGrade::B,
            s if s >= 0.0 => RecGrade::C,
            _ => RecGrade::D,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub ticker: String,
    pub batch_id: String,
    pub rec_date: NaiveDate,
    pub rec_price: f64,
    pub grade: RecGrade,
    pub confidence: f64,
    pub rationale: String,
    /// Per-analyser score breakdown
    pub scores: serde_json::Value,
    pub final_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceStatus {
    Success,
    Active,
    Warning,
    Failed,
}

impl PerformanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceStatus::Success => "success",
            PerformanceStatus::Active => "active",
            PerformanceStatus::Warning => "warning",
            PerformanceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(PerformanceStatus::Success),
            "active" => Some(PerformanceStatus::Active),
            "warning" => Some(PerformanceStatus::Warning),
            "failed" => Some(PerformanceStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub rec_id: i64,
    pub days_held: u32,
    pub check_price: f64,
    pub return_rate: f64,
    pub max_drawdown: f64,
    pub status: PerformanceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Retrospective {
    pub rec_id: i64,
    pub days_held: u32,
    pub missed_risks: String,
    pub actual_cause: String,
    pub lesson: String,
    pub improvement: String,
    /// Suggested adjustment to future confidence, in [-10, +10]
    pub confidence_adjustment: f64,
}

/// Discrete trading signal emitted by analysers and strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Signal {
    /// Numeric score in [-2, +2]
    pub fn to_score(&self) -> f64 {
        match self {
            Signal::StrongBuy => 2.0,
            Signal::Buy => 1.0,
            Signal::Hold => 0.0,
            Signal::Sell => -1.0,
            Signal::StrongSell => -2.0,
        }
    }

    /// Signal from a fused score in [-1, +1].
    pub fn from_fused_score(score: f64) -> Self {
        match score {
            s if s >= 0.66 => Signal::StrongBuy,
            s if s >= 0.22 => Signal::Buy,
            s if s >= -0.22 => Signal::Hold,
            s if s >= -0.66 => Signal::Sell,
            _ => Signal::StrongSell,
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Signal::StrongBuy => "STRONG_BUY",
            Signal::Buy => "BUY",
            Signal::Hold => "HOLD",
            Signal::Sell => "SELL",
            Signal::StrongSell => "STRONG_SELL",
        }
    }
}

/// Qualitative grade attached to each analyser result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreGrade {
    Excellent,
    Good,
    Average,
    Poor,
    Danger,
}

impl ScoreGrade {
    /// Grade from an analyser score in [-2, +2].
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 1.2 => ScoreGrade::Excellent,
            s if s >= 0.4 => ScoreGrade::Good,
            s if s >= -0.4 => ScoreGrade::Average,
            s if s >= -1.2 => ScoreGrade::Poor,
            _ => ScoreGrade::Danger,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreGrade::Excellent => "excellent",
            ScoreGrade::Good => "good",
            ScoreGrade::Average => "average",
            ScoreGrade::Poor => "poor",
            ScoreGrade::Danger => "danger",
        }
    }
}

/// Identity of an analyser, used for weight lookup during fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalyserKind {
    Technical,
    Disclosure,
    Supply,
    Fundamental,
    News,
    Consensus,
    MarketContext,
}

impl AnalyserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyserKind::Technical => "technical",
            AnalyserKind::Disclosure => "disclosure",
            AnalyserKind::Supply => "supply",
            AnalyserKind::Fundamental => "fundamental",
            AnalyserKind::News => "news",
            AnalyserKind::Consensus => "consensus",
            AnalyserKind::MarketContext => "market_context",
        }
    }

    pub const ALL: [AnalyserKind; 7] = [
        AnalyserKind::Technical,
        AnalyserKind::Disclosure,
        AnalyserKind::Supply,
        AnalyserKind::Fundamental,
        AnalyserKind::News,
        AnalyserKind::Consensus,
        AnalyserKind::MarketContext,
    ];
}

/// Hard-veto flags an analyser may raise alongside its score
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResultFlags {
    /// Halt-trigger disclosure seen (fraud, embezzlement, suspension)
    pub trading_halt: bool,
    /// Fundamental hard filter (false when e.g. debt ratio > 300%)
    pub pass_filter: bool,
}

impl Default for ResultFlags {
    fn default() -> Self {
        Self {
            trading_halt: false,
            pass_filter: true,
        }
    }
}

/// Result of one analyser over one ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyserResult {
    pub kind: AnalyserKind,
    /// Signed score in [-2, +2]
    pub score: f64,
    pub grade: ScoreGrade,
    pub notes: String,
    pub key_events: Vec<String>,
    #[serde(default)]
    pub flags: ResultFlags,
    /// Analyser-specific metrics payload
    pub metrics: serde_json::Value,
}

impl AnalyserResult {
    pub fn new(kind: AnalyserKind, score: f64, notes: impl Into<String>) -> Self {
        let score = score.clamp(-2.0, 2.0);
        Self {
            kind,
            score,
            grade: ScoreGrade::from_score(score),
            notes: notes.into(),
            key_events: Vec::new(),
            flags: ResultFlags::default(),
            metrics: serde_json::Value::Null,
        }
    }
}

/// Everything an analyser may consume for one (ticker, as_of) pair.
///
/// Built once per ticker by the engine; analysers read what they need and
/// degrade to a neutral score when their slice is missing.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    pub ticker: String,
    pub as_of: NaiveDate,
    pub bars: Vec<DailyBar>,
    pub ticks: Vec<Tick>,
    pub supply: Vec<SupplyDemand>,
    /// Collected blob contents keyed by data_type
    pub blobs: HashMap<String, serde_json::Value>,
    /// Index bars for market-wide context (e.g. KOSPI composite)
    pub index_bars: Vec<DailyBar>,
    /// Latest snapshot of every active ticker, for breadth computation
    pub market_snapshot: Vec<DailyBar>,
}

impl AnalysisInput {
    pub fn new(ticker: impl Into<String>, as_of: NaiveDate) -> Self {
        Self {
            ticker: ticker.into(),
            as_of,
            ..Default::default()
        }
    }

    pub fn blob(&self, data_type: &str) -> Option<&serde_json::Value> {
        self.blobs.get(data_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_thresholds_map_one_to_one() {
        assert_eq!(Signal::from_fused_score(0.7), Signal::StrongBuy);
        assert_eq!(Signal::from_fused_score(0.66), Signal::StrongBuy);
        assert_eq!(Signal::from_fused_score(0.5), Signal::Buy);
        assert_eq!(Signal::from_fused_score(0.0), Signal::Hold);
        assert_eq!(Signal::from_fused_score(-0.3), Signal::Sell);
        assert_eq!(Signal::from_fused_score(-0.9), Signal::StrongSell);
    }

    #[test]
    fn analyser_result_clamps_score() {
        let r = AnalyserResult::new(AnalyserKind::Technical, 3.5, "over");
        assert_eq!(r.score, 2.0);
        let r = AnalyserResult::new(AnalyserKind::Technical, -9.0, "under");
        assert_eq!(r.score, -2.0);
        assert_eq!(r.grade, ScoreGrade::Danger);
    }

    #[test]
    fn bar_validity() {
        let mut bar = DailyBar {
            code: "005930".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            open: 100.0,
            high: 110.0,
            low: 95.0,
            close: 105.0,
            volume: 1000.0,
        };
        assert!(bar.is_valid());
        bar.low = 101.0;
        assert!(!bar.is_valid());
    }

    #[test]
    fn tier_ordering_follows_rank() {
        assert!(Tier::Official < Tier::Api);
        assert!(Tier::Scrape < Tier::Browser);
        assert_eq!(Tier::from_rank(4), Some(Tier::Browser));
        assert_eq!(Tier::from_rank(0), None);
    }
}
