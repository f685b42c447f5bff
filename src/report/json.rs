//! Cucumber JSON merge
//!
//! Every fragment is a top-level array. The element bodies are copied byte
//! for byte between one pair of brackets.

use serde::de::IgnoredAny;
use tracing::{debug, warn};

use super::{Merged, RawFragment};
use crate::error::FragmentError;

pub(crate) fn merge(fragments: &[RawFragment<'_>]) -> Merged {
    let mut content = vec![b'['];
    let mut merged = 0;

    for fragment in fragments {
        match array_body(&fragment.content) {
            Ok(Some(body)) => {
                if merged > 0 {
                    content.push(b',');
                }
                content.extend_from_slice(body);
                merged += 1;
            }
            Ok(None) => debug!(
                "Skipping empty JSON fragment {} of {}",
                fragment.origin, fragment.owner
            ),
            Err(e) => warn!(
                "Dropping JSON fragment {} of {}: {}",
                fragment.origin, fragment.owner, e
            ),
        }
    }

    content.push(b']');
    Merged { content, merged }
}

/// The bytes between a fragment's outer brackets, or `None` for a fragment
/// without elements
fn array_body(content: &[u8]) -> Result<Option<&[u8]>, FragmentError> {
    let trimmed = content.trim_ascii();
    if trimmed.is_empty() || trimmed == b"null" {
        return Ok(None);
    }

    let elements: Vec<IgnoredAny> = serde_json::from_slice(trimmed)?;
    if elements.is_empty() {
        return Ok(None);
    }

    // A valid non-empty array starts with '[' and ends with ']'
    let body = trimmed[1..trimmed.len() - 1].trim_ascii();
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn raw<'a>(owner: &'a str, content: &'a str) -> RawFragment<'a> {
        RawFragment {
            owner,
            origin: format!("{owner}.json"),
            content: Cow::Borrowed(content.as_bytes()),
        }
    }

    #[test]
    fn test_elements_are_byte_identical() {
        let elements = [
            r#"{"uri": "features/a.feature", "elements": [ {"line": 3} ]}"#,
            r#"{"uri":"features/b.feature","elements":[]}"#,
            "{\n  \"uri\": \"features/c.feature\"\n}",
        ];
        let fragments: Vec<_> = elements
            .iter()
            .enumerate()
            .map(|(i, e)| (format!("u{i}"), format!("[\n  {e}\n]\n")))
            .collect();
        let raws: Vec<_> = fragments.iter().map(|(o, c)| raw(o, c)).collect();

        let merged = merge(&raws);
        assert_eq!(merged.merged, 3);

        let text = String::from_utf8(merged.content).unwrap();
        assert_eq!(text, format!("[{}]", elements.join(",")));

        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_empty_fragments_are_dropped() {
        let raws = vec![
            raw("a", ""),
            raw("b", "null"),
            raw("c", " [ ] "),
            raw("d", r#"[{"uri":"d"}]"#),
        ];
        let merged = merge(&raws);
        assert_eq!(merged.merged, 1);
        assert_eq!(merged.content, br#"[{"uri":"d"}]"#.to_vec());
    }

    #[test]
    fn test_invalid_fragment_is_dropped() {
        let raws = vec![
            raw("a", r#"[{"uri":"a"}"#),
            raw("b", r#"{"uri":"b"}"#),
            raw("c", r#"[{"uri":"c"}]"#),
        ];
        let merged = merge(&raws);
        assert_eq!(merged.merged, 1);
        assert_eq!(merged.content, br#"[{"uri":"c"}]"#.to_vec());
    }

    #[test]
    fn test_no_fragments_yields_empty_array() {
        let merged = merge(&[]);
        assert_eq!(merged.merged, 0);
        assert_eq!(merged.content, b"[]".to_vec());
    }
}
