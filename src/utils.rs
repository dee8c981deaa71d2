use chrono::NaiveDateTime;

/// Timestamp format used by the provider for both the STK password and the
/// `TransactionDate` callback metadata item.
pub const MPESA_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Normalizes a subscriber phone number to `<country_code><subscriber>`.
///
/// A single leading trunk `0` is replaced by the country code; a number
/// already carrying the country code is returned unchanged; anything else
/// gets the country code prepended.
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.strip_prefix('0') {
        return format!("{country_code}{rest}");
    }

    if trimmed.starts_with(country_code) {
        return trimmed.to_string();
    }

    format!("{country_code}{trimmed}")
}

/// Parses the provider's fixed 14-digit `YYYYMMDDHHMMSS` timestamp.
pub fn parse_transaction_date(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, MPESA_TIMESTAMP_FORMAT).ok()
}
