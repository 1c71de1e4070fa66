//! `Cookie:` request header parsing.

use percent_encoding::percent_decode_str;

/// Iterate over `(name, value)` pairs of a `Cookie:` header.
/// Pairs without `=` are skipped.
pub fn pairs(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|part| {
        let (name, value) = part.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, value.trim()))
    })
}

/// Decode a cookie value the way browser cookie libraries encode it:
/// optional surrounding quotes, then percent-encoding.
/// Falls back to the raw text when the decoded bytes are not UTF-8.
pub fn decode_value(value: &str) -> String {
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    match percent_decode_str(unquoted).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => unquoted.to_string(),
    }
}

/// Find a cookie by name and return its decoded value. The first occurrence wins.
pub fn find(header: &str, name: &str) -> Option<String> {
    pairs(header)
        .find(|(n, _)| *n == name)
        .map(|(_, v)| decode_value(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs() {
        let got: Vec<_> = pairs("a=1; b=2;c = 3 ; junk; =x").collect();
        assert_eq!(got, vec![("a", "1"), ("b", "2"), ("c", "3")]);
    }

    #[test]
    fn test_find_plain() {
        let header = r#"theme=dark; auth-session={"uid":"u1"}"#;
        assert_eq!(find(header, "auth-session").as_deref(), Some(r#"{"uid":"u1"}"#));
        assert_eq!(find(header, "theme").as_deref(), Some("dark"));
        assert_eq!(find(header, "missing"), None);
    }

    #[test]
    fn test_find_percent_encoded() {
        let header = "auth-session=%7B%22uid%22%3A%22u1%22%2C%22role%22%3A%22admin%22%7D";
        assert_eq!(
            find(header, "auth-session").as_deref(),
            Some(r#"{"uid":"u1","role":"admin"}"#)
        );
    }

    #[test]
    fn test_first_occurrence_wins() {
        assert_eq!(find("s=1; s=2", "s").as_deref(), Some("1"));
    }

    #[test]
    fn test_name_must_match_exactly() {
        assert_eq!(find("auth-session-old=1", "auth-session"), None);
    }

    #[test]
    fn test_quoted_value() {
        assert_eq!(decode_value("\"abc\""), "abc");
    }

    #[test]
    fn test_invalid_utf8_falls_back_to_raw() {
        assert_eq!(decode_value("%FF%FE"), "%FF%FE");
    }

    #[test]
    fn test_value_containing_equals() {
        assert_eq!(find("token=a=b=c", "token").as_deref(), Some("a=b=c"));
    }
}
