//! Phone number normalization and masking
//!
//! Phone numbers are stored and compared in E.164 form only. Normalization
//! strips common formatting characters and validates the result; masking
//! hides the subscriber digits for log output.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AuthError;

// + followed by 9 to 15 digits, total length 10 to 16
static E164_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[0-9]{9,15}$").expect("invalid E.164 pattern"));

/// Normalize a raw phone number into E.164 form.
///
/// Whitespace, hyphens, parentheses and dots are stripped; the result must
/// be a `+` followed by 9 to 15 digits.
pub fn normalize_to_e164(raw: &str) -> Result<String, AuthError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect();

    if E164_RE.is_match(&cleaned) {
        Ok(cleaned)
    } else {
        Err(AuthError::PhoneInvalid)
    }
}

/// Whether a string is already a valid E.164 number
pub fn is_valid_e164(phone: &str) -> bool {
    E164_RE.is_match(phone)
}

/// Mask an E.164 number for logging, keeping the country code and the last
/// two digits. Anything that is not valid E.164 masks to `"***"`.
pub fn mask(phone: &str) -> String {
    if !is_valid_e164(phone) {
        return "***".to_string();
    }

    // NANP numbers have a one-digit country code, most others two
    let cc_len = if phone[1..].starts_with('1') { 1 } else { 2 };
    let stars = if cc_len == 1 { 7 } else { 6 };

    let prefix = &phone[..1 + cc_len];
    let suffix = &phone[phone.len() - 2..];
    format!("{}{}{}", prefix, "*".repeat(stars), suffix)
}

/// Mask an E.164 number keeping the country code and the last `visible`
/// digits of the local part. A local part shorter than the tail masks
/// completely.
pub fn mask_digits(phone: &str, visible: usize) -> String {
    if !is_valid_e164(phone) {
        return "***".to_string();
    }

    let cc_len = if phone[1..].starts_with('1') { 1 } else { 2 };
    let local = &phone[1 + cc_len..];
    if local.len() < visible {
        return "+**********".to_string();
    }

    format!(
        "{}******{}",
        &phone[..1 + cc_len],
        &local[local.len() - visible..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_accepts_clean_e164() {
        assert_eq!(
            normalize_to_e164("+14155552671").unwrap(),
            "+14155552671"
        );
        assert_eq!(
            normalize_to_e164("+442071838750").unwrap(),
            "+442071838750"
        );
    }

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(
            normalize_to_e164("+1 (415) 555-2671").unwrap(),
            "+14155552671"
        );
        assert_eq!(
            normalize_to_e164("+44 20.7183.8750").unwrap(),
            "+442071838750"
        );
        assert_eq!(normalize_to_e164("  +14155552671\t").unwrap(), "+14155552671");
    }

    #[test]
    fn test_normalize_rejects_invalid() {
        // No plus prefix
        assert!(matches!(
            normalize_to_e164("14155552671"),
            Err(AuthError::PhoneInvalid)
        ));
        // Too short
        assert!(matches!(
            normalize_to_e164("+1415555"),
            Err(AuthError::PhoneInvalid)
        ));
        // Too long
        assert!(matches!(
            normalize_to_e164("+1234567890123456"),
            Err(AuthError::PhoneInvalid)
        ));
        // Letters survive stripping and fail the pattern
        assert!(matches!(
            normalize_to_e164("+1415KL52671"),
            Err(AuthError::PhoneInvalid)
        ));
        assert!(matches!(normalize_to_e164(""), Err(AuthError::PhoneInvalid)));
    }

    #[test]
    fn test_is_valid_e164() {
        assert!(is_valid_e164("+14155552671"));
        assert!(is_valid_e164("+442071838750"));
        assert!(!is_valid_e164("+1 415 555 2671"));
        assert!(!is_valid_e164("4155552671"));
    }

    #[test]
    fn test_mask_nanp() {
        assert_eq!(mask("+14155552671"), "+1*******71");
    }

    #[test]
    fn test_mask_two_digit_country_code() {
        assert_eq!(mask("+442071838750"), "+44******50");
    }

    #[test]
    fn test_mask_digits() {
        assert_eq!(mask_digits("+14155552671", 4), "+1******2671");
        assert_eq!(mask_digits("+442071838750", 3), "+44******750");
        assert_eq!(mask_digits("+14155552671", 0), "+1******");
        // More visible digits than the local part has
        assert_eq!(mask_digits("+123456789", 20), "+**********");
        assert_eq!(mask_digits("garbage", 2), "***");
    }

    #[test]
    fn test_mask_invalid_input() {
        assert_eq!(mask("not a phone"), "***");
        assert_eq!(mask(""), "***");
        assert_eq!(mask("4155552671"), "***");
    }
}
