pub mod kis;
pub mod krx;

pub use kis::{KisClient, KisDailyFetcher, KisTickFetcher};
pub use krx::{KrxOhlcvFetcher, KrxValuationFetcher};
