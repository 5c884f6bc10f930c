//! Chat prompt assembly under a character budget.
//!
//! Prompts are built deterministically: the mode's system context, then the
//! newest turns that fit the budget (oldest dropped first), then a trailing
//! assistant cue. The system context and the cue are never trimmed away.

use crate::history::message::{ChatMessage, MessageRole};

/// Label rendered for user turns.
const USER_LABEL: &str = "User";
/// Label rendered for assistant turns.
const ASSISTANT_LABEL: &str = "Assistant";

/// Build the chat prompt for the next reply.
#[must_use]
pub fn build_chat_prompt(
    system_prompt: &str,
    messages: &[ChatMessage],
    max_chars: usize,
) -> String {
    let mut window = messages;
    loop {
        let prompt = render(system_prompt, window);
        if prompt.len() <= max_chars || window.is_empty() {
            return prompt;
        }
        window = &window[1..];
    }
}

/// Build the prompt for regenerating the last assistant reply: the history
/// up to (not including) the last assistant message.
///
/// Returns `None` when there is no assistant message to regenerate.
#[must_use]
pub fn build_regenerate_prompt(
    system_prompt: &str,
    messages: &[ChatMessage],
    max_chars: usize,
) -> Option<String> {
    let last = messages
        .iter()
        .rposition(|message| message.role == MessageRole::Assistant)?;
    Some(build_chat_prompt(system_prompt, &messages[..last], max_chars))
}

fn render(system_prompt: &str, messages: &[ChatMessage]) -> String {
    let estimate = system_prompt.len()
        + messages
            .iter()
            .map(|m| m.content.len() + 16)
            .sum::<usize>()
        + 32;
    let mut out = String::with_capacity(estimate);

    out.push_str("System: ");
    out.push_str(system_prompt);
    out.push_str("\n\n");

    for message in messages {
        let label = match message.role {
            MessageRole::User => USER_LABEL,
            MessageRole::Assistant => ASSISTANT_LABEL,
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }

    out.push_str(ASSISTANT_LABEL);
    out.push(':');
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn turns(pairs: &[(&str, &str)]) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        for (user, assistant) in pairs {
            messages.push(ChatMessage::user(*user));
            messages.push(ChatMessage::assistant(*assistant));
        }
        messages
    }

    #[test]
    fn test_prompt_contains_system_history_and_cue() {
        let messages = turns(&[("hi", "hello")]);
        let prompt = build_chat_prompt("Be kind.", &messages, 10_000);

        assert!(prompt.starts_with("System: Be kind.\n\n"));
        assert!(prompt.contains("User: hi\n"));
        assert!(prompt.contains("Assistant: hello\n"));
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn test_budget_drops_oldest_turns_first() {
        let messages = turns(&[("oldest question", "oldest answer"), ("newest", "fresh")]);
        let full = build_chat_prompt("S", &messages, 10_000);
        let tight = build_chat_prompt("S", &messages, full.len() - 1);

        assert!(!tight.contains("oldest question"));
        assert!(tight.contains("newest"));
        assert!(tight.ends_with("Assistant:"));
    }

    #[test]
    fn test_system_context_survives_an_impossible_budget() {
        let messages = turns(&[("hi", "hello")]);
        let prompt = build_chat_prompt("a very long system prompt", &messages, 1);

        assert!(prompt.starts_with("System: a very long system prompt"));
        assert!(!prompt.contains("User: hi"));
    }

    #[test]
    fn test_regenerate_prompt_excludes_the_last_assistant_message() {
        let messages = turns(&[("hi", "hello"), ("how are you", "fine")]);
        let prompt = build_regenerate_prompt("S", &messages, 10_000).unwrap();

        assert!(prompt.contains("User: how are you\n"));
        assert!(!prompt.contains("fine"));
        assert!(prompt.contains("hello"), "earlier assistant turns stay");
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn test_regenerate_prompt_requires_an_assistant_message() {
        let messages = vec![ChatMessage::user("hi")];
        assert!(build_regenerate_prompt("S", &messages, 10_000).is_none());
    }
}
