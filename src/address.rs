//! Chat address helpers
//!
//! WhatsApp Web addresses look like `5511999999999@c.us` for people,
//! `<id>@g.us` for groups and `status@broadcast` for the status feed.

use once_cell::sync::Lazy;
use regex::Regex;

/// Domain of one-to-one chats in WhatsApp Web addressing
pub const USER_DOMAIN: &str = "c.us";

/// Domain of group chats
pub const GROUP_DOMAIN: &str = "g.us";

/// The status feed pseudo-chat
pub const STATUS_BROADCAST: &str = "status@broadcast";

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("static regex"));

/// Normalize a recipient into `<digits>@<domain>`.
///
/// Inputs that already carry a domain are kept as they are; bare phone
/// numbers lose any formatting (`+55 (11) 99999-9999`) and get `domain`
/// appended.
pub fn normalize_recipient(raw: &str, domain: &str) -> String {
    let raw = raw.trim();
    if raw.contains('@') {
        return raw.to_string();
    }
    let digits = NON_DIGITS.replace_all(raw, "");
    format!("{}@{}", digits, domain)
}

/// Broadcast lists and the status feed
pub fn is_broadcast(address: &str) -> bool {
    address == STATUS_BROADCAST || address.ends_with("@broadcast")
}

pub fn is_group(address: &str) -> bool {
    address
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain == GROUP_DOMAIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("5511999999999", "5511999999999@c.us")]
    #[case("+55 (11) 99999-9999", "5511999999999@c.us")]
    #[case("  5511999  ", "5511999@c.us")]
    #[case("5511999@c.us", "5511999@c.us")]
    #[case("120363@g.us", "120363@g.us")]
    fn test_normalize_recipient(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_recipient(raw, USER_DOMAIN), expected);
    }

    #[test]
    fn test_normalize_uses_given_domain() {
        assert_eq!(
            normalize_recipient("5511999", "s.whatsapp.net"),
            "5511999@s.whatsapp.net"
        );
    }

    #[rstest]
    #[case("status@broadcast", true)]
    #[case("1234567@broadcast", true)]
    #[case("5511999@c.us", false)]
    fn test_is_broadcast(#[case] address: &str, #[case] expected: bool) {
        assert_eq!(is_broadcast(address), expected);
    }

    #[rstest]
    #[case("120363042@g.us", true)]
    #[case("5511999@c.us", false)]
    #[case("g.us", false)]
    fn test_is_group(#[case] address: &str, #[case] expected: bool) {
        assert_eq!(is_group(address), expected);
    }

    proptest! {
        #[test]
        fn normalized_phone_is_digits_at_domain(raw in "[0-9 +()-]{1,24}") {
            let out = normalize_recipient(&raw, USER_DOMAIN);
            let (local, domain) = out.split_once('@').unwrap();
            prop_assert_eq!(domain, USER_DOMAIN);
            prop_assert!(local.chars().all(|c| c.is_ascii_digit()));
        }

        #[test]
        fn normalization_is_idempotent(raw in "[0-9 +()-]{1,24}") {
            let once = normalize_recipient(&raw, USER_DOMAIN);
            prop_assert_eq!(normalize_recipient(&once, USER_DOMAIN), once.clone());
        }
    }
}
