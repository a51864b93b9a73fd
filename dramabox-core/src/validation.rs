//! Input checks applied before anything goes over the wire

use crate::error::{Error, Result};

/// Longest language code accepted by the registry
pub const MAX_LANGUAGE_LEN: usize = 16;

/// A book id is a non-empty run of ASCII digits, not all zeros.
pub fn validate_book_id(book_id: &str) -> Result<String> {
    let trimmed = book_id.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("bookId is required"));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::validation(format!(
            "bookId must be numeric, got `{trimmed}`"
        )));
    }
    if trimmed.bytes().all(|b| b == b'0') {
        return Err(Error::validation("bookId must be positive"));
    }
    Ok(trimmed.to_string())
}

/// Episodes are numbered from 1
pub fn validate_episode(episode: u32) -> Result<u32> {
    if episode == 0 {
        return Err(Error::validation("episode must be at least 1"));
    }
    Ok(episode)
}

/// Trim a search keyword and cap it at `max_chars` characters
pub fn sanitize_keyword(keyword: &str, max_chars: usize) -> Result<String> {
    let trimmed = keyword.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("keyword is required"));
    }
    Ok(trimmed.chars().take(max_chars).collect())
}

/// Canonical form of a language code. Blank input selects `default`.
pub fn normalize_language(language: &str, default: &str) -> Result<String> {
    let lang = language.trim().to_ascii_lowercase();
    if lang.is_empty() {
        return Ok(default.to_string());
    }
    if lang.len() > MAX_LANGUAGE_LEN
        || !lang
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(Error::validation(format!("unsupported language `{language}`")));
    }
    Ok(lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id() {
        assert_eq!(validate_book_id("123").unwrap(), "123");
        assert_eq!(validate_book_id(" 41000102  ").unwrap(), "41000102");
        assert!(validate_book_id("abc").is_err());
        assert!(validate_book_id("12a").is_err());
        assert!(validate_book_id("-5").is_err());
        assert!(validate_book_id("").is_err());
        assert!(validate_book_id("000").is_err());
    }

    #[test]
    fn test_episode() {
        assert!(validate_episode(0).is_err());
        assert_eq!(validate_episode(1).unwrap(), 1);
    }

    #[test]
    fn test_keyword_trimmed_and_capped() {
        assert_eq!(sanitize_keyword("  love  ", 200).unwrap(), "love");
        assert!(matches!(sanitize_keyword("   ", 200), Err(Error::Validation(_))));

        let long = "é".repeat(300);
        let capped = sanitize_keyword(&long, 200).unwrap();
        assert_eq!(capped.chars().count(), 200);
    }

    #[test]
    fn test_language() {
        assert_eq!(normalize_language("", "in").unwrap(), "in");
        assert_eq!(normalize_language(" EN ", "in").unwrap(), "en");
        assert_eq!(normalize_language("zh-hans", "in").unwrap(), "zh-hans");
        assert!(normalize_language("en/../x", "in").is_err());
        assert!(normalize_language(&"a".repeat(17), "in").is_err());
    }
}
