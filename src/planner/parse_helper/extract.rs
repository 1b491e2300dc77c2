/// Drops the reasoning preamble some planner models emit before the plan;
/// only the text after the last closing tag can contain the JSON object.
pub fn strip_reasoning(text: &str) -> &str {
    match text.rsplit_once("</think>") {
        Some((_, rest)) => rest.trim(),
        None => text,
    }
}

/// Models often wrap the plan in a Markdown code fence even when told not
/// to. Returns the body of the first fenced block, tolerating a language
/// tag on the opening fence and a missing closing fence (truncated
/// output); text without fences passes through trimmed.
pub fn unfence(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };
    let Some((_tag_line, body)) = text[start + 3..].split_once('\n') else {
        return text;
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}
