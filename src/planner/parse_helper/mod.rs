mod extract;
pub use extract::*;

mod fix;
pub use fix::*;

use serde_json::Value;

/// Pulls a plan object out of raw model output.
///
/// The candidate ladder goes from the text as given to progressively
/// stronger repairs: trailing-comma cleanup, then completion of truncated
/// nesting. The first rung that parses wins; if none does, the planner
/// treats the response as unparseable and spends a repair attempt.
pub fn parse_candidate_json(text: &str) -> Option<Value> {
    let text = unfence(strip_reasoning(text));

    let mut attempts = Vec::with_capacity(3);
    attempts.push(text.to_string());
    let cleaned = remove_trailing_commas(text);
    if let Some(completed) = complete_truncated_json(&cleaned) {
        attempts.push(completed);
    }
    if cleaned != text {
        attempts.push(cleaned);
    }

    attempts
        .iter()
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}
