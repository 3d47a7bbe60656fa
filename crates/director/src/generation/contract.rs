//! The speaker-turn contract for backend output.
//!
//! Backend text is untrusted. It is parsed into a generic JSON tree first,
//! then every element is validated field by field:
//!
//! - `speaker` and `content` must be non-blank strings
//! - `speaker` must match the whitelist (case-insensitive) and is rewritten
//!   to the whitelist's spelling
//!
//! Non-conforming elements are discarded, never repaired.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{GeneratedTurn, ParticipantId};

/// Result of validating one round's response text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRound {
    /// Turns that passed validation, in response order.
    pub turns: Vec<GeneratedTurn>,
    /// Well-formed elements whose speaker is not a participant.
    pub off_whitelist: usize,
    /// Elements missing a field, blank, or not objects.
    pub malformed: usize,
    /// Whether any JSON array could be extracted at all.
    pub parsed: bool,
}

impl ParsedRound {
    /// Whether the round produced nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Validate `raw` against the turn contract.
#[must_use]
pub fn parse_turns(raw: &str, whitelist: &[ParticipantId]) -> ParsedRound {
    let Some(elements) = extract_array(raw) else {
        return ParsedRound::default();
    };

    let allowed: HashMap<String, &ParticipantId> = whitelist
        .iter()
        .map(|p| (normalize(p.as_str()), p))
        .collect();

    let mut round = ParsedRound {
        parsed: true,
        ..ParsedRound::default()
    };

    for element in &elements {
        let Some((speaker, content)) = speaker_and_content(element) else {
            round.malformed += 1;
            continue;
        };

        match allowed.get(&normalize(speaker)) {
            Some(canonical) => round
                .turns
                .push(GeneratedTurn::new((*canonical).clone(), content)),
            None => round.off_whitelist += 1,
        }
    }

    round
}

fn speaker_and_content(element: &Value) -> Option<(&str, &str)> {
    let object = element.as_object()?;
    let speaker = object.get("speaker")?.as_str()?.trim();
    let content = object.get("content")?.as_str()?.trim();
    if speaker.is_empty() || content.is_empty() {
        return None;
    }
    Some((speaker, content))
}

fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

/// Pull the turn array out of the response text.
///
/// Tried in order: the whole text (after stripping a Markdown fence), the
/// first array-valued field of a top-level object, the outermost `[...]`
/// slice.
fn extract_array(raw: &str) -> Option<Vec<Value>> {
    let text = strip_fence(raw.trim());

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        match value {
            Value::Array(items) => return Some(items),
            Value::Object(map) => {
                if let Some(items) = map.into_iter().find_map(|(_, v)| match v {
                    Value::Array(items) => Some(items),
                    _ => None,
                }) {
                    return Some(items);
                }
            }
            _ => {}
        }
    }

    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(text.get(start..=end)?) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist() -> Vec<ParticipantId> {
        vec![
            ParticipantId::new("pawn:1"),
            ParticipantId::new("pawn:2"),
            ParticipantId::new("Pawn:3"),
        ]
    }

    #[test]
    fn test_plain_array() {
        let raw = r#"[{"speaker":"pawn:1","content":"Morning."},{"speaker":"pawn:2","content":"Is it?"}]"#;
        let round = parse_turns(raw, &whitelist());
        assert!(round.parsed);
        assert_eq!(round.turns.len(), 2);
        assert_eq!(round.turns[1], GeneratedTurn::new("pawn:2", "Is it?"));
    }

    #[test]
    fn test_off_whitelist_speaker_is_discarded() {
        let raw = r#"[{"speaker":"pawn:1","content":"Hi"},{"speaker":"pawn:9","content":"Intruder"}]"#;
        let round = parse_turns(raw, &whitelist());
        assert_eq!(round.turns.len(), 1);
        assert_eq!(round.off_whitelist, 1);
        assert!(round.turns.iter().all(|t| t.speaker.as_str() != "pawn:9"));
    }

    #[test]
    fn test_speaker_match_is_case_insensitive_and_canonicalized() {
        let raw = r#"[{"speaker":"PAWN:1","content":"Loud"},{"speaker":"pawn:3","content":"Quiet"}]"#;
        let round = parse_turns(raw, &whitelist());
        assert_eq!(round.turns[0].speaker, ParticipantId::new("pawn:1"));
        assert_eq!(round.turns[1].speaker, ParticipantId::new("Pawn:3"));
    }

    #[test]
    fn test_blank_or_missing_fields_are_malformed() {
        let raw = r#"[
            {"speaker":"pawn:1","content":"   "},
            {"speaker":"","content":"who said that"},
            {"speaker":"pawn:2"},
            {"speaker":"pawn:2","content":7},
            "just a string",
            {"speaker":"pawn:2","content":"Fine."}
        ]"#;
        let round = parse_turns(raw, &whitelist());
        assert_eq!(round.turns.len(), 1);
        assert_eq!(round.malformed, 5);
    }

    #[test]
    fn test_fenced_output() {
        let raw = "```json\n[{\"speaker\":\"pawn:1\",\"content\":\"Fenced\"}]\n```";
        assert_eq!(parse_turns(raw, &whitelist()).turns.len(), 1);
    }

    #[test]
    fn test_object_wrapping_array() {
        let raw = r#"{"dialogue":[{"speaker":"pawn:2","content":"Wrapped"}]}"#;
        assert_eq!(parse_turns(raw, &whitelist()).turns.len(), 1);
    }

    #[test]
    fn test_array_embedded_in_prose() {
        let raw = r#"Sure! Here it is: [{"speaker":"pawn:1","content":"Hello"}] Enjoy."#;
        assert_eq!(parse_turns(raw, &whitelist()).turns.len(), 1);
    }

    #[test]
    fn test_unparseable_output() {
        let round = parse_turns("I'd rather not.", &whitelist());
        assert!(!round.parsed);
        assert!(round.is_empty());
    }

    #[test]
    fn test_empty_array_parses_but_is_empty() {
        let round = parse_turns("[]", &whitelist());
        assert!(round.parsed);
        assert!(round.is_empty());
        assert_eq!(round.off_whitelist, 0);
    }
}
