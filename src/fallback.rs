//! Case and digit fallback heuristics for out-of-vocabulary lookups.
//!
//! Before a missing word falls through to subword decomposition (or the
//! unknown sentinel), the resolver tries a few cheap rewrites of the surface
//! form: lowercasing everything after the first character (mixed-caps forms
//! like "McDonald's" or all-caps headlines), lowercasing the whole word, and
//! collapsing a leading-digit token to its first digit (large numbers, dates,
//! times). Classification uses full Unicode general categories, not ASCII;
//! input may be any script.

use unicode_properties::{GeneralCategory, GeneralCategoryGroup, UnicodeGeneralCategory};

/// Category summary of one or more characters.
///
/// `upper` means general category Lu or Lt; `letter` and `number` are the
/// L and N category groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CategoryFlags {
    pub upper: bool,
    pub letter: bool,
    pub number: bool,
}

impl CategoryFlags {
    fn fold(&mut self, c: char) {
        if matches!(
            c.general_category(),
            GeneralCategory::UppercaseLetter | GeneralCategory::TitlecaseLetter
        ) {
            self.upper = true;
        }
        match c.general_category_group() {
            GeneralCategoryGroup::Letter => self.letter = true,
            GeneralCategoryGroup::Number => self.number = true,
            _ => {}
        }
    }
}

/// Category summary of a word, first character kept apart from the rest.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CategoryScan {
    pub first: CategoryFlags,
    pub rest: CategoryFlags,
}

/// One-pass category scan over a word.
pub(crate) fn scan_categories(word: &str) -> CategoryScan {
    let mut scan = CategoryScan::default();
    for (i, c) in word.chars().enumerate() {
        if i == 0 {
            scan.first.fold(c);
        } else {
            scan.rest.fold(c);
        }
    }
    scan
}

/// Lowercase every character except the first (full Unicode mapping).
pub(crate) fn lowercase_after_first(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut chars = word.chars();
    if let Some(first) = chars.next() {
        out.push(first);
        for c in chars {
            out.extend(c.to_lowercase());
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
