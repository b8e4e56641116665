//! Case and diacritic-insensitive text matching

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold text for comparison: decompose, strip combining marks, lowercase
///
/// `"Crème Brûlée"` folds to `"creme brulee"`.
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether `haystack` contains `term`, ignoring case and diacritics
///
/// An empty term matches everything.
pub fn contains_folded(haystack: &str, term: &str) -> bool {
    fold(haystack).contains(&fold(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_strips_marks_and_case() {
        assert_eq!(fold("Crème Brûlée"), "creme brulee");
        assert_eq!(fold("ÀÉÎÕÜ"), "aeiou");
    }

    #[test]
    fn test_contains_folded() {
        assert!(contains_folded("São Paulo", "sao"));
        assert!(contains_folded("Guilherme", "HERM"));
        assert!(contains_folded("anything", ""));
        assert!(!contains_folded("Lisboa", "porto"));
    }
}
