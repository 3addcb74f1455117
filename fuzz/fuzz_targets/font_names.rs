#![no_main]
use libfuzzer_sys::fuzz_target;

use fontpipe_core::font::naming::{css_class_name, family_slug, safe_quote, FamilyMinter};

fuzz_target!(|data: &[u8]| {
    let Ok(name) = std::str::from_utf8(data) else {
        return;
    };

    let class = css_class_name(name);
    assert!(class.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));

    let quoted = safe_quote(name);
    if quoted != name {
        assert!(quoted.starts_with('"') && quoted.ends_with('"'));
    }

    let slug = family_slug(name, 32);
    assert!(!slug.is_empty());

    let mut minter = FamilyMinter::new(32);
    let a = minter.mint(name, 1_700_000_000_000);
    let b = minter.mint(name, 1_700_000_000_000);
    assert_ne!(a, b, "two mints in one millisecond must differ");
});
