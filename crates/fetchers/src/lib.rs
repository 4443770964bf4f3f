pub mod factory;
pub mod registry;
pub mod tier1;
pub mod tier2;
pub mod tier3;
pub mod tier4;

pub use factory::FetcherFactory;
pub use registry::default_sites;

use aegis_core::FetchError;

/// Map a reqwest failure onto the fetch taxonomy.
pub(crate) fn classify_http(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        return FetchError::Transient(err.to_string());
    }
    if let Some(status) = err.status() {
        return classify_status(status, err.to_string());
    }
    FetchError::Transient(err.to_string())
}

pub(crate) fn classify_status(status: reqwest::StatusCode, body: String) -> FetchError {
    match status.as_u16() {
        401 | 403 => FetchError::Auth(format!("{status}: {body}")),
        404 => FetchError::NotFound(format!("{status}: {body}")),
        429 => FetchError::Blocked(format!("{status}: {body}")),
        s if s >= 500 => FetchError::Transient(format!("{status}: {body}")),
        s if s >= 400 => FetchError::Blocked(format!("{status}: {body}")),
        _ => FetchError::Transient(format!("{status}: {body}")),
    }
}

/// Shared builder for source HTTP clients: browser-ish UA, no redirect
/// surprises, bounded connect behaviour. Per-attempt deadlines are owned
/// by the execution wrapper, not the client.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
        )
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_taxonomy() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            FetchError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, String::new()),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            FetchError::Blocked(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            FetchError::Transient(_)
        ));
    }
}
