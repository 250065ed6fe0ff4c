//! Cleanup of raw model responses.

/// Extract code from a model response.
///
/// Takes the body of the first fenced block when one is present (dropping the
/// info string such as `python`), trims surrounding blank lines while keeping
/// the first line's indentation, and collapses runs of blank lines to one.
/// Returns `None` when nothing but whitespace remains.
pub fn clean_code_response(raw: &str) -> Option<String> {
    let body = match raw.find("```") {
        Some(open) => {
            let after_fence = &raw[open + 3..];
            // Drop the info string (`python`, `py`, ...) on the fence line.
            let content = match after_fence.find('\n') {
                Some(nl) => &after_fence[nl + 1..],
                None => "",
            };
            match content.find("```") {
                Some(close) => &content[..close],
                None => content,
            }
        }
        None => raw,
    };

    let mut lines: Vec<&str> = Vec::new();
    let mut prev_blank = false;
    for line in body.split('\n') {
        let blank = line.trim().is_empty();
        if blank && (prev_blank || lines.is_empty()) {
            continue;
        }
        lines.push(if blank { "" } else { line.trim_end() });
        prev_blank = blank;
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Locate a JSON object in a model response: a ```json fenced block when
/// present, otherwise the span from the first `{` to the last `}`.
pub fn extract_json_block(raw: &str) -> Option<&str> {
    if let Some(open) = raw.find("```json") {
        let rest = &raw[open + "```json".len()..];
        if let Some(close) = rest.find("```") {
            return Some(rest[..close].trim());
        }
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
