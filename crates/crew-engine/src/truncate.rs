use crew_core::messages::ActionPayload;

/// Truncate `output` to at most `max_chars` characters, appending a marker
/// with the original and kept lengths.
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    let Some((boundary, _)) = output.char_indices().nth(max_chars) else {
        return output.to_string();
    };
    let total = output.chars().count();
    format!(
        "{}\n\n[truncated: {total} chars -> {max_chars} chars]",
        &output[..boundary]
    )
}

/// Textual payloads are truncated; structured payloads pass through.
pub fn truncate_payload(payload: ActionPayload, max_chars: usize) -> ActionPayload {
    match payload {
        ActionPayload::Text(text) => ActionPayload::Text(truncate_output(&text, max_chars)),
        structured => structured,
    }
}
