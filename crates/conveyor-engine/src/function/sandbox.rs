//! Process isolation helpers: environment allow-list and output capture.

use std::collections::BTreeSet;

/// Variables from this process's environment that a function may see.
///
/// Names are de-duplicated; unset variables are skipped.
#[must_use]
pub fn inherited_env(allowed_vars: &[String]) -> Vec<(String, String)> {
    allowed_vars
        .iter()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect()
}

/// Lossy UTF-8 rendering of captured output, keeping at most `max_bytes`
/// from the end of the stream.
#[must_use]
pub fn captured_log(bytes: &[u8], max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let tail = &bytes[bytes.len() - max_bytes..];
    // Skip UTF-8 continuation bytes so the tail starts on a character.
    let start = tail
        .iter()
        .position(|b| (b & 0b1100_0000) != 0b1000_0000)
        .unwrap_or(tail.len());
    format!(
        "[truncated {} bytes]\n{}",
        bytes.len() - tail.len() + start,
        String::from_utf8_lossy(&tail[start..])
    )
}
