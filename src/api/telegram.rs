use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::api::Notifier;
use crate::models::{ConfirmationDecision, ConversationKey};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u32 = 30;

/// A decoded operator reply: which confirmation prompt it answers and what
/// the answer is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReply {
    pub key: ConversationKey,
    pub decision: ConfirmationDecision,
}

/// Telegram Bot API client. Sends messages (optionally with a Yes/No inline
/// keyboard) and long-polls for the operator's replies.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
    chat_id: i64,
}

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

impl TelegramClient {
    pub fn new(token: String, chat_id: i64) -> Self {
        Self {
            client: Client::new(),
            token,
            chat_id,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.token, method)
    }

    /// Send a message to the configured chat. Returns the message id, which
    /// doubles as the conversation key for confirmation prompts.
    pub async fn send_message(&self, text: &str, with_buttons: bool) -> anyhow::Result<i64> {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        if with_buttons {
            payload["reply_markup"] = json!({
                "inline_keyboard": [[
                    {"text": "Yes", "callback_data": "yes"},
                    {"text": "No", "callback_data": "no"},
                ]]
            });
        }

        let response: TgResponse<Message> = self
            .client
            .post(self.url("sendMessage"))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        let message = unwrap_response(response)?;
        tracing::debug!("Sent Telegram message {}: {}", message.message_id, text);
        Ok(message.message_id)
    }

    /// Long-poll for updates and translate them into confirmation replies.
    /// `offset` is advanced past every update seen, including ones that do
    /// not decode to a reply.
    pub async fn poll_replies(&self, offset: &mut i64) -> anyhow::Result<Vec<IncomingReply>> {
        let payload = json!({
            "offset": *offset,
            "timeout": LONG_POLL_SECS,
            "allowed_updates": ["message", "callback_query"],
        });

        let response: TgResponse<Vec<Update>> = self
            .client
            .post(self.url("getUpdates"))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        let updates = unwrap_response(response)?;
        let mut replies = Vec::new();

        for update in updates {
            *offset = (*offset).max(update.update_id + 1);

            // Button presses must be acknowledged or the client keeps the
            // spinner running
            if let Some(ref callback) = update.callback_query {
                self.answer_callback(&callback.id).await;
            }

            match translate(&update, self.chat_id) {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => {}
                Err(reason) => tracing::warn!("Dropping Telegram update: {}", reason),
            }
        }

        Ok(replies)
    }

    async fn answer_callback(&self, callback_id: &str) {
        let payload = json!({ "callback_query_id": callback_id });
        let result = self
            .client
            .post(self.url("answerCallbackQuery"))
            .json(&payload)
            .send()
            .await;
        if let Err(e) = result {
            tracing::warn!("Failed to acknowledge callback query: {}", e);
        }
    }
}

/// Decode one update into a confirmation reply, if it is one.
///
/// Button presses carry the prompt's message id directly. Text replies
/// count only when they reply to the prompt message; a bare "yes" in the
/// chat has no conversation to attach to and is ignored.
fn translate(update: &Update, chat_id: i64) -> Result<Option<IncomingReply>, String> {
    if let Some(ref callback) = update.callback_query {
        let Some(ref message) = callback.message else {
            return Ok(None);
        };
        if message.chat.id != chat_id {
            return Err(format!("callback from unknown chat {}", message.chat.id));
        }
        let decision = match callback.data.as_deref() {
            Some("yes") => ConfirmationDecision::Approve,
            Some("no") => ConfirmationDecision::Reject,
            other => return Err(format!("unexpected callback data {:?}", other)),
        };
        return Ok(Some(IncomingReply {
            key: message.message_id,
            decision,
        }));
    }

    if let Some(ref message) = update.message {
        if message.chat.id != chat_id {
            return Err(format!("message from unknown chat {}", message.chat.id));
        }
        let Some(ref text) = message.text else {
            return Ok(None);
        };
        let decision = match text.trim().to_lowercase().as_str() {
            "yes" => ConfirmationDecision::Approve,
            "no" => ConfirmationDecision::Reject,
            _ => return Ok(None),
        };
        let Some(ref replied_to) = message.reply_to_message else {
            tracing::debug!("Yes/no message without a reply target, ignoring");
            return Ok(None);
        };
        return Ok(Some(IncomingReply {
            key: replied_to.message_id,
            decision,
        }));
    }

    Ok(None)
}

fn unwrap_response<T>(response: TgResponse<T>) -> anyhow::Result<T> {
    if !response.ok {
        anyhow::bail!(
            "telegram api error: {}",
            response.description.unwrap_or_else(|| "unknown".to_string())
        );
    }
    response
        .result
        .ok_or_else(|| anyhow::anyhow!("telegram api response missing result"))
}

#[async_trait]
impl Notifier for TelegramClient {
    async fn send(
        &self,
        text: &str,
        with_confirmation_buttons: bool,
    ) -> anyhow::Result<ConversationKey> {
        self.send_message(text, with_confirmation_buttons).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: i64 = 777;

    fn update(value: serde_json::Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_translate_button_press() {
        let update = update(json!({
            "update_id": 1,
            "callback_query": {
                "id": "cb-1",
                "data": "yes",
                "message": {"message_id": 42, "chat": {"id": CHAT}}
            }
        }));

        let reply = translate(&update, CHAT).unwrap().unwrap();
        assert_eq!(
            reply,
            IncomingReply {
                key: 42,
                decision: ConfirmationDecision::Approve
            }
        );
    }

    #[test]
    fn test_translate_rejection_button() {
        let update = update(json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb-2",
                "data": "no",
                "message": {"message_id": 43, "chat": {"id": CHAT}}
            }
        }));

        let reply = translate(&update, CHAT).unwrap().unwrap();
        assert_eq!(reply.decision, ConfirmationDecision::Reject);
    }

    #[test]
    fn test_translate_foreign_chat_is_dropped() {
        let update = update(json!({
            "update_id": 3,
            "callback_query": {
                "id": "cb-3",
                "data": "yes",
                "message": {"message_id": 44, "chat": {"id": 1234}}
            }
        }));

        assert!(translate(&update, CHAT).is_err());
    }

    #[test]
    fn test_translate_text_reply_to_prompt() {
        let update = update(json!({
            "update_id": 4,
            "message": {
                "message_id": 100,
                "chat": {"id": CHAT},
                "text": " Yes ",
                "reply_to_message": {"message_id": 42, "chat": {"id": CHAT}}
            }
        }));

        let reply = translate(&update, CHAT).unwrap().unwrap();
        assert_eq!(reply.key, 42);
        assert_eq!(reply.decision, ConfirmationDecision::Approve);
    }

    #[test]
    fn test_translate_bare_text_has_no_conversation() {
        let update = update(json!({
            "update_id": 5,
            "message": {"message_id": 101, "chat": {"id": CHAT}, "text": "yes"}
        }));

        assert_eq!(translate(&update, CHAT).unwrap(), None);
    }

    #[test]
    fn test_translate_unrelated_text_ignored() {
        let update = update(json!({
            "update_id": 6,
            "message": {"message_id": 102, "chat": {"id": CHAT}, "text": "how are things"}
        }));

        assert_eq!(translate(&update, CHAT).unwrap(), None);
    }
}
