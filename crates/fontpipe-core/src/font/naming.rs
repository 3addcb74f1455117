//! Family naming and CSS identifier helpers

use unicode_segmentation::UnicodeSegmentation;

use crate::constants::{BACKUP_SUFFIX, FAMILY_PREFIX};

/// Characters that force a family name to be quoted in CSS
const QUOTE_TRIGGERS: &[char] = &[
    ' ', '\'', '"', '!', '@', '#', '$', '%', '^', '&', '*', '(', ')', '+', '=', '[', ']', '{',
    '}', '|', '\\', ':', ';', ',', '.', '<', '>', '/', '?',
];

/// Quote a family name only when it cannot stand unquoted in a font stack
pub fn safe_quote(name: &str) -> String {
    let needs_quotes = name.contains(QUOTE_TRIGGERS)
        || name.starts_with(|c: char| c.is_ascii_digit())
        || name.starts_with("--");
    if needs_quotes {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        name.to_string()
    }
}

/// Class name derived from a family: anything outside `[A-Za-z0-9_-]` becomes `_`
pub fn css_class_name(family: &str) -> String {
    family
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

pub fn backup_family_name(family: &str) -> String {
    format!("{family}{BACKUP_SUFFIX}")
}

/// Slug used inside a minted family.
///
/// Keeps letters and digits from any script so CJK names stay readable,
/// maps everything else to `_`, and cuts at a grapheme boundary.
pub fn family_slug(display_name: &str, max_graphemes: usize) -> String {
    let slug: String = display_name
        .trim()
        .graphemes(true)
        .take(max_graphemes)
        .flat_map(|g| g.chars())
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();

    if slug.is_empty() {
        "font".to_string()
    } else {
        slug
    }
}

/// Mints `custom_<slug>_<digits>` families.
///
/// The digits are the current time in milliseconds, bumped past the previous
/// mint so two fonts minted in the same millisecond never share a family.
#[derive(Debug, Default)]
pub struct FamilyMinter {
    last_stamp: u64,
    max_graphemes: usize,
}

impl FamilyMinter {
    pub fn new(max_graphemes: usize) -> Self {
        Self { last_stamp: 0, max_graphemes }
    }

    pub fn mint(&mut self, display_name: &str, now_millis: u64) -> String {
        let stamp = now_millis.max(self.last_stamp + 1);
        self.last_stamp = stamp;
        format!("{FAMILY_PREFIX}{}_{stamp}", family_slug(display_name, self.max_graphemes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_quote() {
        assert_eq!(safe_quote("custom_Kai_1700000000000"), "custom_Kai_1700000000000");
        assert_eq!(safe_quote("My Font"), "\"My Font\"");
        assert_eq!(safe_quote("a.b"), "\"a.b\"");
        assert_eq!(safe_quote("1font"), "\"1font\"");
        assert_eq!(safe_quote("say\"hi\""), "\"say\\\"hi\\\"\"");
    }

    #[test]
    fn test_class_name() {
        assert_eq!(css_class_name("custom_楷体_12"), "custom____12");
        assert_eq!(css_class_name("a-b_c"), "a-b_c");
    }

    #[test]
    fn test_slug_keeps_cjk_and_truncates() {
        assert_eq!(family_slug("楷体 Regular", 32), "楷体_Regular");
        assert_eq!(family_slug("abcdef", 3), "abc");
        assert_eq!(family_slug("  ", 32), "font");
    }

    #[test]
    fn test_mint_is_unique_within_one_millisecond() {
        let mut minter = FamilyMinter::new(32);
        let a = minter.mint("Kai", 1_000);
        let b = minter.mint("Kai", 1_000);
        let c = minter.mint("Kai", 999);
        assert_eq!(a, "custom_Kai_1000");
        assert_eq!(b, "custom_Kai_1001");
        assert_eq!(c, "custom_Kai_1002");
    }

    #[test]
    fn test_backup_name() {
        assert_eq!(backup_family_name("custom_x_1"), "custom_x_1_backup");
    }
}
