//! URL slugs for processes.

/// Lowercase ASCII slug from a free-form title.
///
/// Runs of anything that is not an ASCII letter or digit collapse into a
/// single hyphen; leading and trailing hyphens are dropped. A title with no
/// usable characters yields `"process"`.
pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    out.truncate(MAX_SLUG_LEN);
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("process");
    }
    out
}

/// `<base>-<suffix>`, cutting `base` so the result stays within
/// [`MAX_SLUG_LEN`]. `base` must be ASCII, as every valid slug is.
pub fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_SLUG_LEN.saturating_sub(suffix.len() + 1);
    let base = base.get(..room.min(base.len())).unwrap_or(base);
    format!("{base}-{suffix}")
}

/// Longest slug accepted.
pub const MAX_SLUG_LEN: usize = 100;

/// ASCII letters, digits, `-` and `_`, at most [`MAX_SLUG_LEN`] bytes.
/// [`slugify`] output is a strict subset.
pub fn is_valid_slug(slug: &str) -> bool {
    (1..=MAX_SLUG_LEN).contains(&slug.len())
        && slug
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Employee Onboarding"), "employee-onboarding");
        assert_eq!(slugify("  Q3 -- Survey!! "), "q3-survey");
        assert_eq!(slugify("KYC/AML check"), "kyc-aml-check");
    }

    #[test]
    fn slugify_falls_back_when_nothing_usable() {
        assert_eq!(slugify(""), "process");
        assert_eq!(slugify("!!!"), "process");
    }

    #[test]
    fn slugify_output_is_valid() {
        for title in ["Hello World", "a", "--x--", "Ünïcödé title 2"] {
            let slug = slugify(title);
            assert!(is_valid_slug(&slug), "{slug}");
        }
    }

    #[test]
    fn validates_slugs() {
        assert!(is_valid_slug("onboarding-2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("with space"));
        assert!(!is_valid_slug("kyc/aml"));
        assert!(!is_valid_slug("café"));
    }

    #[test]
    fn accepts_mixed_case_underscores_and_repeated_hyphens() {
        for slug in ["P", "My_Process", "a--b", "-lead", "trail-", "Q3_Survey-2"] {
            assert!(is_valid_slug(slug), "{slug}");
        }
    }

    #[test]
    fn long_titles_and_suffixes_stay_within_the_limit() {
        let slug = slugify(&"word ".repeat(60));
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        let suffixed = with_suffix(&"a".repeat(MAX_SLUG_LEN), "copy-0a1b2c");
        assert_eq!(suffixed.len(), MAX_SLUG_LEN);
        assert!(suffixed.ends_with("-copy-0a1b2c"));
        assert_eq!(with_suffix("intake", "2"), "intake-2");
    }

    #[test]
    fn enforces_the_length_limit() {
        assert!(is_valid_slug(&"a".repeat(MAX_SLUG_LEN)));
        assert!(!is_valid_slug(&"a".repeat(MAX_SLUG_LEN + 1)));
    }
}
