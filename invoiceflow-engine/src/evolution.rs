/// Evolution API integration
///
/// Evolution is the self-hosted WhatsApp gateway. This module holds the
/// outbound client (send text, fetch media, connection state) and parsing
/// of its inbound webhook payloads. Two payload shapes arrive in practice:
/// the native `messages.upsert` event and the WhatsApp Business Cloud
/// format some deployments relay.
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const MEDIA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error("request to Evolution API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Evolution API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("media response contained no base64 payload")]
    MissingMedia,
}

/// Connection settings for one Evolution instance.
#[derive(Debug, Clone)]
pub struct EvolutionConfig {
    pub base_url: String,
    pub api_key: String,
    pub instance: String,
}

pub struct EvolutionClient {
    http: reqwest::Client,
    config: EvolutionConfig,
}

impl EvolutionClient {
    pub fn new(config: EvolutionConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path,
            self.config.instance,
        )
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EvolutionError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EvolutionError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Downloads a media message as base64, looked up by message id.
    pub async fn get_media_base64(&self, message_id: &str) -> Result<String, EvolutionError> {
        let url = self.url("chat/getBase64FromMediaMessage");
        debug!(message_id, "fetching media from Evolution");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.api_key)
            .timeout(MEDIA_TIMEOUT)
            .json(&json!({
                "message": { "key": { "id": message_id } },
                "convertToMp4": false,
            }))
            .send()
            .await?;

        let body: JsonValue = Self::check_status(response).await?.json().await?;

        body.get("base64")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(EvolutionError::MissingMedia)
    }

    /// Sends a plain text reply to a phone number.
    pub async fn send_text(&self, number: &str, text: &str) -> Result<(), EvolutionError> {
        let url = self.url("message/sendText");

        let response = self
            .http
            .post(&url)
            .header("apikey", &self.config.api_key)
            .timeout(SEND_TIMEOUT)
            .json(&json!({ "number": number, "text": text }))
            .send()
            .await?;

        Self::check_status(response).await?;
        Ok(())
    }

    /// Whether the WhatsApp session for this instance is connected.
    pub async fn is_connected(&self) -> Result<bool, EvolutionError> {
        let url = self.url("instance/connectionState");

        let response = self
            .http
            .get(&url)
            .header("apikey", &self.config.api_key)
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;

        let body: JsonValue = Self::check_status(response).await?.json().await?;
        let state = body
            .pointer("/instance/state")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        Ok(state == "open")
    }
}

/// Content of an inbound WhatsApp message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundContent {
    Text(String),
    Media {
        mimetype: Option<String>,
        caption: Option<String>,
    },
}

/// A parsed inbound message, independent of which payload shape it came in.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_id: String,
    pub sender_phone: String,
    pub sender_name: Option<String>,
    pub content: InboundContent,
}

/// Strips a WhatsApp JID or phone string down to bare digits.
/// Handles `18095551234@s.whatsapp.net`, `...@c.us`, device suffixes
/// after `:`, and `+` prefixes.
pub fn normalize_phone(raw: &str) -> String {
    let without_domain = raw.split('@').next().unwrap_or(raw);
    let without_device = without_domain.split(':').next().unwrap_or(without_domain);

    without_device
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

/// Whether the sender matches the configured authorized number. An empty
/// configured number means nobody is authorized.
pub fn is_authorized_sender(configured: &str, sender: &str) -> bool {
    let configured = normalize_phone(configured);
    !configured.is_empty() && configured == normalize_phone(sender)
}

#[derive(Debug, Deserialize)]
struct NativeEnvelope {
    event: Option<String>,
    data: Option<NativeData>,
}

#[derive(Debug, Deserialize)]
struct NativeData {
    key: Option<NativeKey>,
    #[serde(rename = "pushName")]
    push_name: Option<String>,
    message: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct NativeKey {
    #[serde(rename = "remoteJid")]
    remote_jid: Option<String>,
    #[serde(rename = "fromMe", default)]
    from_me: bool,
    id: Option<String>,
}

fn parse_native(payload: &JsonValue) -> Option<InboundMessage> {
    let envelope: NativeEnvelope = serde_json::from_value(payload.clone()).ok()?;

    if envelope.event.as_deref() != Some("messages.upsert") {
        return None;
    }

    let data = envelope.data?;
    let key = data.key?;

    // Echoes of our own replies come back with fromMe set
    if key.from_me {
        return None;
    }

    let message = data.message?;
    let content = if let Some(text) = message.get("conversation").and_then(|v| v.as_str()) {
        InboundContent::Text(text.to_string())
    } else if let Some(text) = message
        .pointer("/extendedTextMessage/text")
        .and_then(|v| v.as_str())
    {
        InboundContent::Text(text.to_string())
    } else if let Some(media) = message
        .get("imageMessage")
        .or_else(|| message.get("documentMessage"))
    {
        InboundContent::Media {
            mimetype: media
                .get("mimetype")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            caption: media
                .get("caption")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    } else {
        return None;
    };

    Some(InboundMessage {
        message_id: key.id?,
        sender_phone: normalize_phone(key.remote_jid.as_deref()?),
        sender_name: data.push_name,
        content,
    })
}

fn parse_business(payload: &JsonValue) -> Option<InboundMessage> {
    let message = payload.pointer("/entry/0/changes/0/value/messages/0")?;

    let message_id = message.get("id")?.as_str()?.to_string();
    let sender_phone = normalize_phone(message.get("from")?.as_str()?);
    let sender_name = payload
        .pointer("/entry/0/changes/0/value/contacts/0/profile/name")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let content = match message.get("type").and_then(|v| v.as_str()) {
        Some("text") => InboundContent::Text(
            message.pointer("/text/body")?.as_str()?.to_string(),
        ),
        Some("image") | Some("document") => {
            let media = message.get("image").or_else(|| message.get("document"))?;
            InboundContent::Media {
                mimetype: media
                    .get("mime_type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                caption: media
                    .get("caption")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }
        }
        _ => return None,
    };

    Some(InboundMessage {
        message_id,
        sender_phone,
        sender_name,
        content,
    })
}

/// Parses an inbound webhook payload, trying the native Evolution shape
/// first and the WhatsApp Business shape second. Returns None for events
/// that carry no user message (status updates, own echoes, reactions).
pub fn parse_webhook(payload: &JsonValue) -> Option<InboundMessage> {
    parse_native(payload).or_else(|| parse_business(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("18095551234@s.whatsapp.net"), "18095551234");
        assert_eq!(normalize_phone("18095551234:17@c.us"), "18095551234");
        assert_eq!(normalize_phone("+1 (809) 555-1234"), "18095551234");
    }

    #[test]
    fn test_is_authorized_sender() {
        assert!(is_authorized_sender(
            "+18095551234",
            "18095551234@s.whatsapp.net"
        ));
        assert!(!is_authorized_sender("+18095551234", "18295550000@c.us"));
        assert!(!is_authorized_sender("", "18095551234"));
    }

    #[test]
    fn test_parse_native_text() {
        let payload = serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": {
                    "remoteJid": "18095551234@s.whatsapp.net",
                    "fromMe": false,
                    "id": "ABC123"
                },
                "pushName": "Maria",
                "message": { "conversation": "estado" }
            }
        });

        let parsed = parse_webhook(&payload).unwrap();
        assert_eq!(parsed.message_id, "ABC123");
        assert_eq!(parsed.sender_phone, "18095551234");
        assert_eq!(parsed.sender_name.as_deref(), Some("Maria"));
        assert_eq!(parsed.content, InboundContent::Text("estado".to_string()));
    }

    #[test]
    fn test_parse_native_image() {
        let payload = serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": { "remoteJid": "18095551234@s.whatsapp.net", "id": "IMG1" },
                "message": {
                    "imageMessage": { "mimetype": "image/jpeg", "caption": "factura" }
                }
            }
        });

        let parsed = parse_webhook(&payload).unwrap();
        assert_eq!(
            parsed.content,
            InboundContent::Media {
                mimetype: Some("image/jpeg".to_string()),
                caption: Some("factura".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_skips_own_echo() {
        let payload = serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": { "remoteJid": "18095551234@s.whatsapp.net", "fromMe": true, "id": "X" },
                "message": { "conversation": "respuesta automática" }
            }
        });

        assert!(parse_webhook(&payload).is_none());
    }

    #[test]
    fn test_parse_business_format() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{ "profile": { "name": "Juan" } }],
                        "messages": [{
                            "from": "18095551234",
                            "id": "wamid.XYZ",
                            "type": "text",
                            "text": { "body": "ayuda" }
                        }]
                    }
                }]
            }]
        });

        let parsed = parse_webhook(&payload).unwrap();
        assert_eq!(parsed.message_id, "wamid.XYZ");
        assert_eq!(parsed.sender_name.as_deref(), Some("Juan"));
        assert_eq!(parsed.content, InboundContent::Text("ayuda".to_string()));
    }

    #[test]
    fn test_parse_ignores_status_events() {
        let payload = serde_json::json!({
            "event": "connection.update",
            "data": { "state": "open" }
        });

        assert!(parse_webhook(&payload).is_none());
    }
}
