pub const DEFAULT_COUNTRY_CODE: &str = "82";

/// Normalizes a phone number to `+<country><subscriber>`.
///
/// Everything except digits and `+` is dropped. A leading `00` is read as
/// an international access prefix, a single leading `0` as a domestic trunk
/// prefix that is replaced with `country_code`. Returns `None` when no
/// digits remain. Already-normalized input is returned unchanged.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let kept: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    let digits: String = kept.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if kept.starts_with('+') {
        return Some(format!("+{}", digits));
    }
    if let Some(rest) = digits.strip_prefix("00") {
        if !rest.is_empty() {
            return Some(format!("+{}", rest));
        }
    }
    if let Some(rest) = digits.strip_prefix('0') {
        if !rest.is_empty() {
            return Some(format!("+{}{}", country_code, rest));
        }
    }
    Some(format!("+{}", digits))
}

/// Key used to join handles against contacts and aliases. E-mail handles
/// are lowercased; anything else goes through phone normalization and
/// falls back to the trimmed input when it carries no digits.
pub fn normalize_identity(raw: &str, country_code: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }
    normalize_phone(trimmed, country_code).unwrap_or_else(|| trimmed.to_string())
}
