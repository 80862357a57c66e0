use once_cell::sync::Lazy;
use std::env;

/// Substrings that disqualify a title. Matching is substring, not
/// word-boundary: "sexiest" is caught by "sex". Crude on purpose; safety wins
/// over precision here.
const DEFAULT_DENYLIST: &[&str] = &["playboy", "sex", "porn", "xxx", "erotic", "nude"];

static TITLE_DENYLIST: Lazy<Vec<String>> = Lazy::new(|| {
    let terms = match env::var("TITLE_DENYLIST") {
        Ok(raw) => raw
            .split(',')
            .map(|term| term.trim().to_lowercase())
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>(),
        Err(_) => Vec::new(),
    };
    if terms.is_empty() {
        DEFAULT_DENYLIST.iter().map(|term| term.to_string()).collect()
    } else {
        terms
    }
});

pub fn is_allowed(title: &str, adult_only: bool) -> bool {
    if adult_only {
        return false;
    }
    let lowered = title.to_lowercase();
    !TITLE_DENYLIST.iter().any(|term| lowered.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adult_only_is_rejected_regardless_of_title() {
        assert!(!is_allowed("Vintage Book", true));
    }

    #[test]
    fn clean_title_passes() {
        assert!(is_allowed("Vintage Book", false));
    }

    #[test]
    fn denylisted_term_is_rejected_case_insensitively() {
        assert!(!is_allowed("Playboy Magazine", false));
        assert!(!is_allowed("PLAYBOY", false));
    }

    #[test]
    fn matching_is_substring_not_word_boundary() {
        assert!(!is_allowed("the sexiest item", false));
        assert!(!is_allowed("unisexxxed", false));
    }

    #[test]
    fn empty_title_passes_the_filter() {
        // Required-field checks reject empty titles later; the filter itself
        // has nothing to match against.
        assert!(is_allowed("", false));
    }
}
