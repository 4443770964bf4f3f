pub mod executor;
pub mod fetcher;

pub use executor::{FetchExecutor, FetchOutcome};
pub use fetcher::{FetchPayload, Fetcher, FetcherDescriptor};
