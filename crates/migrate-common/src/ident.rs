use std::sync::OnceLock;

use regex::Regex;

/// A bare SQL identifier: letter or underscore first, at most 63 characters.
///
/// Table names are interpolated into SQL text, so anything else is refused.
pub fn is_plain_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid regex"))
        .is_match(name)
}
