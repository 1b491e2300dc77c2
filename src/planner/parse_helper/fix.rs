/// Tracks whether a scan position sits inside a JSON string literal,
/// honoring backslash escapes.
#[derive(Default)]
struct LiteralScanner {
    in_string: bool,
    escaped: bool,
}

impl LiteralScanner {
    /// Advances over one character. Returns true when the character is
    /// structural, i.e. sits outside any string literal.
    fn structural(&mut self, c: char) -> bool {
        if self.escaped {
            self.escaped = false;
            return false;
        }
        match (self.in_string, c) {
            (true, '\\') => {
                self.escaped = true;
                false
            }
            (true, '"') => {
                self.in_string = false;
                false
            }
            (true, _) => false,
            (false, '"') => {
                self.in_string = true;
                false
            }
            (false, _) => true,
        }
    }
}

/// Drops commas that directly precede a closing brace or bracket. Models
/// regularly leave one behind the last node of a plan, and serde rejects
/// the whole candidate over it.
pub fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut scanner = LiteralScanner::default();

    for (i, &c) in chars.iter().enumerate() {
        if scanner.structural(c) && c == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Completes a candidate that was cut off mid-generation. Long plans hit
/// token limits, so the tail of the text often owes a closing quote and a
/// run of braces/brackets; this appends them in nesting order.
///
/// Returns `None` when there is nothing to append, or when the existing
/// nesting is inconsistent. In the latter case the text is not truncated
/// but malformed, and appending closers would only bury the real problem.
pub fn complete_truncated_json(s: &str) -> Option<String> {
    let mut scanner = LiteralScanner::default();
    let mut open = Vec::new();

    for c in s.chars() {
        if !scanner.structural(c) {
            continue;
        }
        match c {
            '{' | '[' => open.push(c),
            '}' => {
                if open.pop() != Some('{') {
                    return None;
                }
            }
            ']' => {
                if open.pop() != Some('[') {
                    return None;
                }
            }
            _ => {}
        }
    }

    if open.is_empty() && !scanner.in_string {
        return None;
    }

    let mut completed = s.to_string();
    if scanner.in_string {
        completed.push('"');
    }
    while let Some(opener) = open.pop() {
        completed.push(if opener == '{' { '}' } else { ']' });
    }
    Some(completed)
}
