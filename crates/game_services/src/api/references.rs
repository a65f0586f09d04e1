use serde::{Deserialize, Serialize};
use server_context::{decode_response, EngineApi, EngineClient, EngineError, EngineRequest};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A versioned reference data set, e.g. every vehicle model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSet {
    pub kind: String,
    pub version: u64,
    #[serde(default)]
    pub entries: Vec<ReferenceEntry>,
}

impl ReferenceSet {
    pub fn entry(&self, id: &str) -> Option<&ReferenceEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }
}

pub struct ReferenceApi {
    client: Arc<dyn EngineClient>,
}

impl EngineApi for ReferenceApi {
    fn new(client: Arc<dyn EngineClient>) -> Self {
        Self { client }
    }
}

impl ReferenceApi {
    pub async fn list_references(&self) -> Result<Vec<ReferenceSet>, EngineError> {
        let response = self.client.send(EngineRequest::get("/references")).await?;
        decode_response(response)
    }

    pub async fn get_reference(&self, kind: &str) -> Result<ReferenceSet, EngineError> {
        let response = self
            .client
            .send(EngineRequest::get(format!("/references/{}", urlencoding::encode(kind))))
            .await?;
        decode_response(response)
    }
}
