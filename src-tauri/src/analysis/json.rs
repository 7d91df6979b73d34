use serde_json::Value;

/// Pull the JSON payload out of a model reply.
///
/// A ```` ```json ```` fence wins, whatever the tag's case; any other
/// fence is accepted next with its language tag dropped; otherwise the
/// whole reply is parsed.
pub fn extract_json(reply: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(fenced_body(reply).unwrap_or(reply).trim())
}

fn fenced_body(reply: &str) -> Option<&str> {
    const JSON_FENCE: &str = "```json";
    // ASCII lowering keeps byte offsets valid for `reply`.
    let after = match reply.to_ascii_lowercase().find(JSON_FENCE) {
        Some(at) => &reply[at + JSON_FENCE.len()..],
        None => {
            let (_, rest) = reply.split_once("```")?;
            strip_info_string(rest)
        }
    };
    let body = after.split_once("```").map(|(body, _)| body).unwrap_or(after);
    Some(body.trim())
}

fn strip_info_string(rest: &str) -> &str {
    match rest.split_once('\n') {
        Some((tag, body))
            if !tag.trim().is_empty() && tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            body
        }
        _ => rest,
    }
}
