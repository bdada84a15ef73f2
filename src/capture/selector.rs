// Structural selector derivation for captured elements

use super::types::RawElement;

/// Derive a replayable selector for a captured element.
///
/// A uniqueness-verified id wins; otherwise the root-first positional path is
/// rendered as `tag:nth-of-type(n)` segments. Returns `None` when neither is
/// available.
pub fn derive_selector(element: &RawElement) -> Option<String> {
    if let Some(id) = element.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        if element.id_unique {
            return Some(id_selector(id));
        }
    }

    if element.path.is_empty() {
        return None;
    }

    let segments: Vec<String> = element
        .path
        .iter()
        .map(|segment| {
            if segment.tag == "html" {
                segment.tag.clone()
            } else {
                format!("{}:nth-of-type({})", segment.tag, segment.index.max(1))
            }
        })
        .collect();
    Some(segments.join(" > "))
}

fn id_selector(id: &str) -> String {
    let plain = id
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if plain {
        format!("#{}", id)
    } else {
        format!("[id=\"{}\"]", id.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
