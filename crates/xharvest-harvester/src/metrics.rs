use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Converts a displayed counter such as `"1.5K"`, `"2M"` or `"12,345"` into
/// an integer.
///
/// Never fails: blank or unreadable text yields `0`. Suffixed values are
/// truncated toward zero after scaling.
#[must_use]
pub fn parse_metric(raw: &str) -> u64 {
    let text = raw.trim();
    if text.is_empty() {
        return 0;
    }

    let (number, scale) = match text.chars().last() {
        Some('K' | 'k') => (&text[..text.len() - 1], 1_000u32),
        Some('M' | 'm') => (&text[..text.len() - 1], 1_000_000u32),
        _ => return text.replace(',', "").parse::<u64>().unwrap_or(0),
    };

    // Decimal keeps "4.1M" at exactly 4,100,000 before truncation.
    Decimal::from_str(&number.trim().replace(',', ""))
        .ok()
        .filter(|value| !value.is_sign_negative())
        .and_then(|value| value.checked_mul(Decimal::from(scale)))
        .and_then(|value| value.trunc().to_u64())
        .unwrap_or(0)
}
