use tera::{Context, Tera};
use tracing::warn;

use helpline_core::domain::message::ChatMessage;

const TEMPLATE_NAME: &str = "turn_prompt";

const TURN_PROMPT_TEMPLATE: &str = "\
{% if history %}Previous conversation:
{% for line in history %}{{ line.label }}: {{ line.body }}
{% endfor %}
{% endif %}User's current message: {{ current }}
Please respond to the user's current message:";

#[derive(serde::Serialize)]
struct HistoryLine<'a> {
    label: &'static str,
    body: &'a str,
}

/// Renders the bounded history and the current message into one prompt.
pub struct PromptBuilder {
    tera: Option<Tera>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(Vec::new());
        match tera.add_raw_template(TEMPLATE_NAME, TURN_PROMPT_TEMPLATE) {
            Ok(()) => Self { tera: Some(tera) },
            Err(error) => {
                warn!(
                    event_name = "conversation.prompt.template_invalid",
                    error = %error,
                    "prompt template failed to compile; using plain format"
                );
                Self { tera: None }
            }
        }
    }

    /// `history` is chronological.
    pub fn build(&self, history: &[ChatMessage], current: &str) -> String {
        let lines: Vec<HistoryLine<'_>> = history
            .iter()
            .map(|message| HistoryLine { label: message.direction.label(), body: &message.body })
            .collect();

        if let Some(tera) = &self.tera {
            let mut context = Context::new();
            context.insert("history", &lines);
            context.insert("current", current);
            match tera.render(TEMPLATE_NAME, &context) {
                Ok(rendered) => return rendered,
                Err(error) => warn!(
                    event_name = "conversation.prompt.render_failed",
                    error = %error,
                    "prompt render failed; using plain format"
                ),
            }
        }

        plain_prompt(&lines, current)
    }
}

fn plain_prompt(lines: &[HistoryLine<'_>], current: &str) -> String {
    let mut prompt = String::new();
    if !lines.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for line in lines {
            prompt.push_str(line.label);
            prompt.push_str(": ");
            prompt.push_str(line.body);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("User's current message: ");
    prompt.push_str(current);
    prompt.push_str("\nPlease respond to the user's current message:");
    prompt
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use helpline_core::domain::message::{ChatMessage, Direction, MessageId};
    use helpline_core::domain::user::UserId;

    use super::{plain_prompt, HistoryLine, PromptBuilder};

    fn message(id: i64, body: &str, direction: Direction) -> ChatMessage {
        ChatMessage {
            id: MessageId(id),
            user_id: UserId(1),
            body: body.to_string(),
            direction,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn labels_history_by_direction_in_order() {
        let history = vec![
            message(1, "my printer is offline", Direction::FromUser),
            message(2, "Have you tried restarting it?", Direction::FromBot),
        ];
        let prompt = PromptBuilder::new().build(&history, "yes, still offline");

        let user_at = prompt.find("User: my printer is offline").expect("user line");
        let bot_at = prompt.find("Bot: Have you tried restarting it?").expect("bot line");
        assert!(user_at < bot_at);
        assert!(prompt.starts_with("Previous conversation:\n"));
        assert!(prompt.ends_with(
            "User's current message: yes, still offline\nPlease respond to the user's current message:"
        ));
    }

    #[test]
    fn empty_history_omits_the_history_header() {
        let prompt = PromptBuilder::new().build(&[], "hello");
        assert!(!prompt.contains("Previous conversation"));
        assert!(prompt.starts_with("User's current message: hello"));
    }

    #[test]
    fn message_text_is_not_html_escaped() {
        let prompt = PromptBuilder::new().build(&[], "what's <this> & that?");
        assert!(prompt.contains("what's <this> & that?"));
    }

    #[test]
    fn plain_format_matches_template_output() {
        let history = vec![message(1, "hi", Direction::FromUser)];
        let lines = vec![HistoryLine { label: "User", body: "hi" }];
        assert_eq!(PromptBuilder::new().build(&history, "next"), plain_prompt(&lines, "next"));
    }
}
