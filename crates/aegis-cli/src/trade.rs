//! Free-text trade journal parser.
//!
//! Accepts lines like "삼성전자 10주 70000원 매수", "매도 005930 5주
//! 71,500원" or "buy 005930 10 @ 70000": a side keyword, a quantity, a
//! price, and either a 6-digit issue code or a name to resolve.

use aegis_db::holdings::TradeSide;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTrade {
    /// 6-digit code when present, otherwise the name to resolve
    pub instrument: String,
    pub is_code: bool,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
}

fn is_issue_code(token: &str) -> bool {
    token.len() == 6 && token.chars().all(|c| c.is_ascii_digit())
}

fn parse_number(token: &str) -> Option<f64> {
    let cleaned: String = token
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

pub fn parse_trade(text: &str) -> Option<ParsedTrade> {
    let lowered = text.to_lowercase();
    let side = if lowered.contains("매수") || lowered.contains("buy") {
        TradeSide::Buy
    } else if lowered.contains("매도") || lowered.contains("sell") {
        TradeSide::Sell
    } else {
        return None;
    };

    let mut instrument: Option<(String, bool)> = None;
    let mut quantity: Option<f64> = None;
    let mut price: Option<f64> = None;
    let mut name_tokens: Vec<&str> = Vec::new();

    for token in text.split_whitespace() {
        let lower = token.to_lowercase();
        if ["매수", "매도", "buy", "sell", "@"].contains(&lower.as_str()) {
            continue;
        }
        if is_issue_code(token) {
            instrument = Some((token.to_string(), true));
            continue;
        }
        if let Some(stripped) = token.strip_suffix('주') {
            if let Some(n) = parse_number(stripped) {
                quantity = Some(n);
                continue;
            }
        }
        if let Some(stripped) = token.strip_suffix('원') {
            if let Some(n) = parse_number(stripped) {
                price = Some(n);
                continue;
            }
        }
        if let Some(n) = parse_number(token) {
            // Bare numbers fill quantity first, then price
            if quantity.is_none() {
                quantity = Some(n);
            } else if price.is_none() {
                price = Some(n);
            }
            continue;
        }
        name_tokens.push(token);
    }

    let (instrument, is_code) = instrument.or_else(|| {
        if name_tokens.is_empty() {
            None
        } else {
            Some((name_tokens.join(" "), false))
        }
    })?;

    let quantity = quantity?;
    let price = price?;
    if quantity <= 0.0 || price <= 0.0 {
        return None;
    }

    Some(ParsedTrade {
        instrument,
        is_code,
        side,
        quantity,
        price,
    })
}
