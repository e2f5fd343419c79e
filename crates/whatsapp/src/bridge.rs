//! HTTP client for the WhatsApp session bridge.
//!
//! The bridge is a sidecar that owns the WhatsApp Web session (pairing,
//! encryption, persistence) and exposes it over a small JSON API:
//!
//! | Method   | Path           | Purpose                              |
//! |----------|----------------|--------------------------------------|
//! | `GET`    | `/v1/session`  | current session state                |
//! | `POST`   | `/v1/session/connect` | open (or resume) the session  |
//! | `DELETE` | `/v1/session`  | log out and forget credentials       |
//! | `GET`    | `/v1/groups`   | groups the account participates in   |
//! | `POST`   | `/v1/messages` | send text or media                   |
//! | `GET`    | `/v1/events`   | long-poll for session/message events |

use std::{sync::Arc, time::Duration};

use {
    herald_common::{MediaPayload, MessageKind},
    reqwest::{Method, RequestBuilder},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
    thiserror::Error,
};

/// Extra time allowed on top of the long-poll wait before giving up.
const POLL_SLACK: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bridge returned {status}: {body}")]
    Status { status: u16, body: String },
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Connecting,
    /// Waiting for a QR scan.
    Qr,
    Close,
    #[serde(other)]
    Unknown,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Connecting => "connecting",
            Self::Qr => "qr",
            Self::Close => "close",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub state: SessionState,
    #[serde(default)]
    pub qr: Option<String>,
    /// Account JID once the session is open, e.g. `5511999999999:12@s.whatsapp.net`.
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub logged_out: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeMedia {
    pub mimetype: String,
    /// Base64 body.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeMessage {
    pub chat: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media: Option<BridgeMedia>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connection(SessionInfo),
    Message(BridgeMessage),
    GroupsUpsert {
        groups: Vec<GroupInfo>,
    },
    ParticipantsUpdate {
        id: String,
        action: ParticipantAction,
        participants: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBatch {
    pub cursor: u64,
    #[serde(default)]
    pub events: Vec<BridgeEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMedia {
    pub kind: MessageKind,
    pub mimetype: String,
    /// Base64 body, shared with every other send of the same payload.
    #[serde(serialize_with = "shared_str")]
    pub data: Arc<str>,
}

fn shared_str<S: Serializer>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<OutgoingMedia>,
}

impl OutgoingMessage {
    pub fn text(to: &str, text: &str) -> Self {
        Self {
            to: to.to_string(),
            text: Some(text.to_string()),
            caption: None,
            media: None,
        }
    }

    /// Media with an optional caption (empty for none). Plain-text kinds are
    /// sent as documents.
    pub fn media(to: &str, kind: MessageKind, media: &MediaPayload, caption: &str) -> Self {
        let kind = match kind {
            MessageKind::Text => MessageKind::Document,
            other => other,
        };
        Self {
            to: to.to_string(),
            text: None,
            caption: (!caption.is_empty()).then(|| caption.to_string()),
            media: Some(OutgoingMedia {
                kind,
                mimetype: media.mime_type.clone(),
                data: media.base64(),
            }),
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<Secret<String>>,
}

impl BridgeClient {
    pub fn new(base_url: &str, token: Option<Secret<String>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn session(&self) -> Result<SessionInfo, BridgeError> {
        let resp = send(self.request(Method::GET, "/v1/session")).await?;
        Ok(resp.json().await?)
    }

    pub async fn connect(&self) -> Result<SessionInfo, BridgeError> {
        let resp = send(self.request(Method::POST, "/v1/session/connect")).await?;
        Ok(resp.json().await?)
    }

    /// Log out and drop the bridge's stored credentials.
    pub async fn logout(&self) -> Result<(), BridgeError> {
        send(self.request(Method::DELETE, "/v1/session")).await?;
        Ok(())
    }

    pub async fn groups(&self) -> Result<Vec<GroupInfo>, BridgeError> {
        let resp = send(self.request(Method::GET, "/v1/groups")).await?;
        Ok(resp.json().await?)
    }

    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<(), BridgeError> {
        send(self.request(Method::POST, "/v1/messages").json(message)).await?;
        Ok(())
    }

    /// Wait up to `wait` for events newer than `after`.
    pub async fn events(&self, after: Option<u64>, wait: Duration) -> Result<EventBatch, BridgeError> {
        let mut query = vec![("wait", wait.as_secs().to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let req = self
            .request(Method::GET, "/v1/events")
            .query(&query)
            .timeout(wait + POLL_SLACK);
        let resp = send(req).await?;
        Ok(resp.json().await?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .timeout(REQUEST_TIMEOUT);
        match &self.token {
            Some(token) => req.bearer_auth(token.expose_secret()),
            None => req,
        }
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

async fn send(req: RequestBuilder) -> Result<reqwest::Response, BridgeError> {
    let resp = req.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BridgeError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_json, header, method, path, query_param},
        },
    };

    fn client(server: &MockServer) -> BridgeClient {
        BridgeClient::new(
            &format!("{}/", server.uri()),
            Some(Secret::new("s3cret".into())),
        )
    }

    #[tokio::test]
    async fn session_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/session"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "state": "qr",
                "qr": "2@abc"
            })))
            .mount(&server)
            .await;

        let info = client(&server).session().await.unwrap();
        assert_eq!(info.state, SessionState::Qr);
        assert_eq!(info.qr.as_deref(), Some("2@abc"));
        assert!(!info.logged_out);
    }

    #[tokio::test]
    async fn send_media_encodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_json(serde_json::json!({
                "to": "123@g.us",
                "caption": "look",
                "media": {"kind": "image", "mimetype": "image/png", "data": "AQID"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let media = MediaPayload::new(vec![1u8, 2, 3], "image/png");
        let msg = OutgoingMessage::media("123@g.us", MessageKind::Image, &media, "look");
        client(&server).send_message(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(409).set_body_string("not connected"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_message(&OutgoingMessage::text("1@g.us", "hi"))
            .await
            .unwrap_err();
        match err {
            BridgeError::Status { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "not connected");
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_pass_cursor_and_parse_types() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/events"))
            .and(query_param("after", "7"))
            .and(query_param("wait", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cursor": 9,
                "events": [
                    {"type": "connection", "state": "open", "user": "55:1@s.whatsapp.net"},
                    {"type": "groups_upsert", "groups": [{"id": "1@g.us", "subject": "Team"}]},
                    {"type": "participants_update", "id": "1@g.us", "action": "remove",
                     "participants": ["55@s.whatsapp.net"]},
                    {"type": "presence", "id": "x"}
                ]
            })))
            .mount(&server)
            .await;

        let batch = client(&server)
            .events(Some(7), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(batch.cursor, 9);
        assert_eq!(batch.events.len(), 4);
        assert!(matches!(
            &batch.events[0],
            BridgeEvent::Connection(SessionInfo { state: SessionState::Open, .. })
        ));
        assert!(matches!(
            &batch.events[2],
            BridgeEvent::ParticipantsUpdate { action: ParticipantAction::Remove, .. }
        ));
        assert_eq!(batch.events[3], BridgeEvent::Unknown);
    }

    #[test]
    fn text_kind_media_goes_out_as_document() {
        let media = MediaPayload::new(vec![0u8], "text/plain");
        let msg = OutgoingMessage::media("1@g.us", MessageKind::Text, &media, "");
        let out = msg.media.unwrap();
        assert_eq!(out.kind, MessageKind::Document);
        assert_eq!(msg.caption, None);
    }

    #[test]
    fn recipients_share_one_encoded_body() {
        let media = MediaPayload::new(vec![7u8; 1024], "video/mp4");
        let first = OutgoingMessage::media("1@g.us", MessageKind::Video, &media, "");
        let second = OutgoingMessage::media("2@g.us", MessageKind::Video, &media.clone(), "");
        assert!(Arc::ptr_eq(
            &first.media.unwrap().data,
            &second.media.unwrap().data
        ));
    }

    #[test]
    fn debug_hides_token() {
        let client = BridgeClient::new("http://bridge", Some(Secret::new("s3cret".into())));
        let debug = format!("{client:?}");
        assert!(!debug.contains("s3cret"));
    }
}
