//! Address extraction helpers.

/// Extracts a bare address from a header value.
///
/// Tries, in order: the text between the first `<` and `>`, the first token
/// shaped like `local@domain`, and finally the trimmed input itself.
#[must_use]
pub fn extract_address(value: &str) -> String {
    let value = value.trim();

    if let Some(start) = value.find('<')
        && let Some(len) = value[start + 1..].find('>')
    {
        let inner = value[start + 1..start + 1 + len].trim();
        if !inner.is_empty() {
            return inner.to_string();
        }
    }

    if let Some(addr) = find_address_token(value) {
        return addr.to_string();
    }

    value.to_string()
}

/// Finds the first `local@domain.tld` shaped token in `s`.
fn find_address_token(s: &str) -> Option<&str> {
    let is_local = |c: char| c.is_ascii_alphanumeric() || "._%+-".contains(c);
    let is_domain = |c: char| c.is_ascii_alphanumeric() || ".-".contains(c);

    for (at, _) in s.match_indices('@') {
        let start = s[..at]
            .char_indices()
            .rev()
            .take_while(|&(_, c)| is_local(c))
            .last()
            .map_or(at, |(i, _)| i);
        let end = s[at + 1..]
            .char_indices()
            .take_while(|&(_, c)| is_domain(c))
            .last()
            .map_or(at + 1, |(i, c)| at + 1 + i + c.len_utf8());

        let domain = s[at + 1..end].trim_end_matches('.');
        let tld_ok = domain
            .rsplit_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && tld.len() >= 2);

        if start < at && tld_ok {
            return Some(&s[start..at + 1 + domain.len()]);
        }
    }

    None
}

/// Returns true if `domain` occurs in any of the given header values.
///
/// The match is a case-insensitive substring test, so `corp.example` also
/// matches `mail.corp.example`.
#[must_use]
pub fn contains_domain<'a>(values: impl IntoIterator<Item = &'a str>, domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return false;
    }
    values
        .into_iter()
        .any(|v| v.to_lowercase().contains(&domain))
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_angle_brackets() {
        assert_eq!(
            extract_address("\"Alice Liu\" <alice@corp.example>"),
            "alice@corp.example"
        );
    }

    #[test]
    fn test_extract_bare_token() {
        assert_eq!(
            extract_address("alice@corp.example (Alice)"),
            "alice@corp.example"
        );
        assert_eq!(extract_address("mailto:bob.s+x@mail.example.org."), "bob.s+x@mail.example.org");
    }

    #[test]
    fn test_extract_fallback_raw() {
        assert_eq!(extract_address("  undisclosed-recipients:;  "), "undisclosed-recipients:;");
        assert_eq!(extract_address("<>"), "<>");
    }

    #[test]
    fn test_contains_domain_case_insensitive() {
        assert!(contains_domain(["Bob <bob@Corp.Example>"], "corp.example"));
        assert!(contains_domain(["x@other.test", "y@mail.corp.example"], "CORP.EXAMPLE"));
        assert!(!contains_domain(["x@other.test"], "corp.example"));
        assert!(!contains_domain(["x@corp.example"], ""));
    }

    proptest! {
        #[test]
        fn prop_extract_never_panics(value in ".{0,64}") {
            let _ = extract_address(&value);
        }

        #[test]
        fn prop_bracketed_address_wins(
            name in "[A-Za-z ]{0,20}",
            local in "[a-z][a-z0-9.]{0,10}",
            host in "[a-z]{1,10}",
        ) {
            let addr = format!("{local}@{host}.example");
            let header = format!("\"{name}\" <{addr}>");
            prop_assert_eq!(extract_address(&header), addr);
        }
    }
}
