// src/services/extractor.rs
use regex::Regex;
use std::sync::OnceLock;

static MEAL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// Extract every bracketed meal name from a block of assistant text.
///
/// The assistant is prompted to wrap each suggested meal in square brackets,
/// e.g. `[Grilled Chicken Salad]`. Matching is non-greedy: the first `]`
/// after a `[` closes it, nested brackets are not a thing, and an opening
/// bracket with no closing bracket yields nothing. Order of appearance and
/// duplicates are preserved.
pub fn extract_meals(text: &str) -> Vec<String> {
    let pattern =
        MEAL_PATTERN.get_or_init(|| Regex::new(r"\[(.*?)\]").expect("valid meal pattern"));
    pattern
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}
