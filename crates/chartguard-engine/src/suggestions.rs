//! Fuzzy matching for plugin names
//!
//! Used to attach "did you mean" hints to configuration overrides that name
//! a plugin nobody registered.

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// A candidate name close to the input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub text: String,
    pub distance: usize,
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// Find the candidates closest to `input`, best first
///
/// Exact matches are not suggestions. Ties keep candidate order.
pub fn find_closest_matches<'a, I>(
    input: &str,
    candidates: I,
    max_results: usize,
) -> Vec<Suggestion>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut suggestions: Vec<Suggestion> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = levenshtein(input, candidate);
            if distance <= MAX_SUGGESTION_DISTANCE && distance > 0 {
                Some(Suggestion {
                    text: candidate.to_string(),
                    distance,
                })
            } else {
                None
            }
        })
        .collect();

    suggestions.sort_by_key(|s| s.distance);
    suggestions.truncate(max_results);
    suggestions
}

/// Closest registered plugin name, if any is near enough
pub fn suggest_plugin_name<'a, I>(name: &str, registered: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    find_closest_matches(name, registered, 1)
        .into_iter()
        .next()
        .map(|s| s.text)
}
