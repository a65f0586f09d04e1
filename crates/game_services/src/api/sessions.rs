use event_system::EndReason;
use serde::{Deserialize, Serialize};
use serde_json::json;
use server_context::{decode_response, EngineApi, EngineClient, EngineError, EngineRequest};
use std::sync::Arc;

/// A session as the engine knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

/// Answer to a session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionToken {
    pub session_id: String,
    pub session_token: String,
}

pub struct SessionApi {
    client: Arc<dyn EngineClient>,
}

impl EngineApi for SessionApi {
    fn new(client: Arc<dyn EngineClient>) -> Self {
        Self { client }
    }
}

impl SessionApi {
    /// Opens a session on the engine and returns its token.
    pub async fn create_session(
        &self,
        session_id: &str,
        ip_address: &str,
    ) -> Result<SessionToken, EngineError> {
        let body = json!({ "sessionId": session_id, "ipAddress": ip_address });
        let response = self.client.send(EngineRequest::post("/sessions", body)).await?;
        decode_response(response)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionRecord, EngineError> {
        let response = self
            .client
            .send(EngineRequest::get(format!("/sessions/{}", urlencoding::encode(session_id))))
            .await?;
        decode_response(response)
    }

    /// All sessions the engine considers active.
    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>, EngineError> {
        let response = self.client.send(EngineRequest::get("/sessions")).await?;
        decode_response(response)
    }

    pub async fn finish_session(&self, session_id: &str, reason: EndReason) -> Result<(), EngineError> {
        let body = json!({ "endReason": reason });
        let path = format!("/sessions/{}/finish", urlencoding::encode(session_id));
        self.client.send(EngineRequest::post(path, body)).await?;
        Ok(())
    }
}
