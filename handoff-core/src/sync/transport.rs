//! Request/response transport used by the sync cursor client.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{HandoffError, Result};
use crate::models::{EndedBy, SessionStatus};
use crate::wire::{
    ClaimRequest, EndRequest, EndResponse, ErrorBody, ListSessionsResponse,
    PullResponse, RequestAgentRequest, RequestAgentResponse, SendMessageRequest,
    SendMessageResponse, SessionResponse,
};

/// The operations a customer widget needs from the server.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn request_live_agent(&self, request: &RequestAgentRequest) -> Result<RequestAgentResponse>;

    async fn send_message(
        &self,
        session_id: Uuid,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse>;

    async fn pull_messages(&self, session_id: Uuid, cursor: Option<i64>) -> Result<PullResponse>;

    async fn end_session(&self, session_id: Uuid, ended_by: EndedBy) -> Result<EndResponse>;
}

/// `reqwest` implementation of [`ChatTransport`] against the HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandoffError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL of the push channel.
    pub fn push_url(&self) -> String {
        let ws = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/ws", ws)
    }

    pub async fn claim_session(
        &self,
        session_id: Uuid,
        agent_id: &str,
        agent_name: Option<&str>,
    ) -> Result<SessionResponse> {
        let body = ClaimRequest {
            agent_id: Some(agent_id.to_string()),
            agent_name: agent_name.map(str::to_string),
        };
        let url = format!("{}/sessions/{}/claim", self.base_url, session_id);
        decode(self.client.post(&url).json(&body).send().await).await
    }

    pub async fn list_sessions(&self, status: Option<SessionStatus>) -> Result<ListSessionsResponse> {
        let url = format!("{}/sessions", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(status) = status {
            req = req.query(&[("status", status.as_str())]);
        }
        decode(req.send().await).await
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionResponse> {
        let url = format!("{}/sessions/{}", self.base_url, session_id);
        decode(self.client.get(&url).send().await).await
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let url = format!("{}/health", self.base_url);
        decode(self.client.get(&url).send().await).await
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn request_live_agent(&self, request: &RequestAgentRequest) -> Result<RequestAgentResponse> {
        let url = format!("{}/sessions", self.base_url);
        decode(self.client.post(&url).json(request).send().await).await
    }

    async fn send_message(
        &self,
        session_id: Uuid,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse> {
        let url = format!("{}/sessions/{}/messages", self.base_url, session_id);
        decode(self.client.post(&url).json(request).send().await).await
    }

    async fn pull_messages(&self, session_id: Uuid, cursor: Option<i64>) -> Result<PullResponse> {
        let url = format!("{}/sessions/{}/messages", self.base_url, session_id);
        let mut req = self.client.get(&url);
        if let Some(cursor) = cursor {
            req = req.query(&[("lastMessageTimestamp", cursor)]);
        }
        decode(req.send().await).await
    }

    async fn end_session(&self, session_id: Uuid, ended_by: EndedBy) -> Result<EndResponse> {
        let url = format!("{}/sessions/{}/end", self.base_url, session_id);
        let body = EndRequest {
            ended_by: Some(ended_by.as_str().to_string()),
        };
        decode(self.client.post(&url).json(&body).send().await).await
    }
}

/// Map a raw `reqwest` outcome onto the error taxonomy and decode the body.
async fn decode<T: DeserializeOwned>(
    response: std::result::Result<reqwest::Response, reqwest::Error>,
) -> Result<T> {
    let response = response.map_err(|e| HandoffError::Transport(e.to_string()))?;
    let status = response.status();

    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| HandoffError::Transport(format!("invalid response body: {}", e)));
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| format!("server returned {}: {}", status, body));

    Err(match status {
        StatusCode::NOT_FOUND => HandoffError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => HandoffError::Validation(message),
        StatusCode::CONFLICT => HandoffError::from_wire("invalid_transition", message),
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => HandoffError::Transport(message),
        _ => HandoffError::Other(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> HttpTransport {
        HttpTransport::new(server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_pull_sends_cursor_and_decodes() {
        let server = MockServer::start().await;
        let sid = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/sessions/{}/messages", sid)))
            .and(query_param("lastMessageTimestamp", "1700000000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "messages": [{
                    "id": Uuid::new_v4(),
                    "role": "agent",
                    "content": "Hello",
                    "timestamp": "1700000000500",
                    "category": "text"
                }],
                "status": "active",
                "agentName": "Priya",
                "lastMessageTimestamp": 1700000000500i64
            })))
            .mount(&server)
            .await;

        let resp = transport(&server)
            .pull_messages(sid, Some(1_700_000_000_000))
            .await
            .unwrap();
        assert_eq!(resp.messages.len(), 1);
        assert_eq!(resp.messages[0].timestamp, 1_700_000_000_500);
        assert_eq!(resp.status, SessionStatus::Active);
        assert_eq!(resp.agent_name.as_deref(), Some("Priya"));
    }

    #[tokio::test]
    async fn test_claim_decodes_session_body() {
        let server = MockServer::start().await;
        let mut session = crate::models::Session::new_waiting(
            "Ann".into(),
            "ann@example.com".into(),
            1_700_000_000_000,
        );
        session.status = SessionStatus::Active;
        session.agent_id = Some("agent-1".into());
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/claim", session.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "session": session,
            })))
            .mount(&server)
            .await;

        let resp = transport(&server)
            .claim_session(session.id, "agent-1", Some("Priya"))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.session.id, session.id);
        assert_eq!(resp.session.status, SessionStatus::Active);
        assert_eq!(resp.session.agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_error_statuses_map_to_taxonomy() {
        let server = MockServer::start().await;
        let sid = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/sessions/{}/messages", sid)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "success": false, "error": "Session not found", "code": "not_found"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/end", sid)))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/messages", sid)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false, "error": "content is required", "code": "validation"
            })))
            .mount(&server)
            .await;

        let t = transport(&server);
        let err = t.pull_messages(sid, None).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(!err.is_retryable());

        let err = t.end_session(sid, EndedBy::Customer).await.unwrap_err();
        assert!(err.is_retryable());

        let err = t
            .send_message(sid, &SendMessageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("content is required"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let t = HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let err = t.pull_messages(Uuid::new_v4(), None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_push_url() {
        let t = HttpTransport::new("http://localhost:8780/", Duration::from_secs(1)).unwrap();
        assert_eq!(t.push_url(), "ws://localhost:8780/ws");
        let t = HttpTransport::new("https://chat.example.com", Duration::from_secs(1)).unwrap();
        assert_eq!(t.push_url(), "wss://chat.example.com/ws");
    }
}
