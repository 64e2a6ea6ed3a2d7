use crate::error::AddressParseError;
use lazy_static::lazy_static;
use regex::Regex;

// Accepted syntax: local-part@domain where the domain ends in a label of
// at least two letters. Nothing beyond this subset of RFC 5322 is handled.
lazy_static! {
    /// `Display Name <user@example.org>` and anything else wrapping a bracketed address.
    static ref BRACKETED_ADDRESS: Regex =
        Regex::new(r"^.*<([a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,})>.*$")
            .expect("bracketed address pattern compiles");
    /// A bare `user@example.org`.
    static ref BARE_ADDRESS: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("bare address pattern compiles");
}

/// Normalize a header or envelope address into a bare `local@domain`.
///
/// Surrounding whitespace is ignored. If the value contains a bracketed
/// address, the bracket contents win over any display name.
pub fn parse_email_address(raw: &str) -> Result<String, AddressParseError> {
    let trimmed = raw.trim();
    let candidate = BRACKETED_ADDRESS
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());

    if BARE_ADDRESS.is_match(candidate) {
        Ok(candidate.to_string())
    } else {
        Err(AddressParseError {
            candidate: raw.to_string(),
        })
    }
}

/// Drop a `+tag` alias from the local part, keeping the domain.
///
/// Returns `None` when there is no `@` to split on.
pub fn strip_plus_alias(address: &str) -> Option<String> {
    let (local, domain) = address.split_once('@')?;
    let base = local.split('+').next().unwrap_or(local);
    Some(format!("{base}@{domain}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address() {
        assert_eq!(
            parse_email_address("user@example.org").unwrap(),
            "user@example.org"
        );
        assert_eq!(
            parse_email_address("  first.last%x@mail.example.co.uk \t").unwrap(),
            "first.last%x@mail.example.co.uk"
        );
    }

    #[test]
    fn test_bracketed_address() {
        assert_eq!(
            parse_email_address("Some User <user@example.org>").unwrap(),
            "user@example.org"
        );
        assert_eq!(
            parse_email_address("<bounce+403268.63af5d@mg-d0.substack.com>").unwrap(),
            "bounce+403268.63af5d@mg-d0.substack.com"
        );
        assert_eq!(
            parse_email_address("\"Quoted, Name\" <a@b.org> (comment)").unwrap(),
            "a@b.org"
        );
    }

    #[test]
    fn test_rejected_addresses() {
        for raw in [
            "",
            "user",
            "user@localhost",
            "user@example.c",
            "user@example.123",
            "two words@example.org",
            "Some User <user@localhost>",
            "undisclosed-recipients:;",
        ] {
            let err = parse_email_address(raw).unwrap_err();
            assert_eq!(err.candidate, raw);
        }
    }

    #[test]
    fn test_strip_plus_alias() {
        assert_eq!(
            strip_plus_alias("user+tag@example.org").as_deref(),
            Some("user@example.org")
        );
        assert_eq!(
            strip_plus_alias("user+a+b@example.org").as_deref(),
            Some("user@example.org")
        );
        assert_eq!(
            strip_plus_alias("user@example.org").as_deref(),
            Some("user@example.org")
        );
        assert_eq!(strip_plus_alias("no-at-sign"), None);
    }
}
