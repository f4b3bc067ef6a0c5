use crate::models::chat::Turn;

pub const HUMAN_MARKER: &str = "Human:";
/// The engine echoes the prompt, so generated text starts after the last one.
pub const ASSISTANT_MARKER: &str = "Assistant:";

/// Build the prompt for one generation.
///
/// `history` must already be windowed. Segments are joined with a single
/// newline and the prompt ends with an open `Assistant:` for the engine to
/// continue from.
pub fn assemble(system_prompt: Option<&str>, history: &[Turn], new_message: &str) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(history.len() + 2);

    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        parts.push(system.to_string());
    }

    for turn in history {
        parts.push(format!(
            "{} {}\n{} {}",
            HUMAN_MARKER, turn.user, ASSISTANT_MARKER, turn.assistant
        ));
    }

    parts.push(format!("{} {}\n{}", HUMAN_MARKER, new_message, ASSISTANT_MARKER));
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_message_without_context() {
        assert_eq!(assemble(None, &[], "hello"), "Human: hello\nAssistant:");
    }

    #[test]
    fn test_system_prompt_and_prior_turn() {
        let history = vec![Turn::new("hi", "hey")];
        let prompt = assemble(Some("Be terse."), &history, "how are you");
        assert_eq!(
            prompt,
            "Be terse.\nHuman: hi\nAssistant: hey\nHuman: how are you\nAssistant:"
        );
    }

    #[test]
    fn test_empty_system_prompt_is_skipped() {
        assert_eq!(assemble(Some(""), &[], "yo"), "Human: yo\nAssistant:");
    }

    #[test]
    fn test_deterministic() {
        let history = vec![Turn::new("a", "b"), Turn::new("c", "d")];
        let first = assemble(Some("sys"), &history, "e");
        let second = assemble(Some("sys"), &history, "e");
        assert_eq!(first, second);
        assert!(first.ends_with("Human: e\nAssistant:"));
    }
}
