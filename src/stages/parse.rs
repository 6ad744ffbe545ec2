//! Extracting the structured answer from a model's final text.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Contents of every fenced code block in `text`, language tag removed.
fn fenced_blocks(text: &str) -> impl Iterator<Item = &str> {
    text.split("```").skip(1).step_by(2).map(|block| {
        let (tag, body) = block.split_once('\n').unwrap_or(("", block));
        let body = if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
            body
        } else {
            block
        };
        body.trim()
    })
}

/// Locate the JSON object in `text`: the last fenced block that looks like
/// an object, otherwise the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(fenced) = fenced_blocks(text).filter(|b| b.starts_with('{')).last() {
        return Some(fenced);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Deserialize the JSON answer embedded in `text`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let json = extract_json(text).context("No JSON object found in response")?;
    serde_json::from_str(json).context("Response JSON does not match the expected shape")
}
