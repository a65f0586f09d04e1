use serde::{Deserialize, Serialize};
use server_context::{decode_response, EngineApi, EngineClient, EngineError, EngineRequest};
use std::collections::HashMap;
use std::sync::Arc;

/// Translations for one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locale {
    pub code: String,
    /// The locale used when a key is missing elsewhere.
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub translations: HashMap<String, String>,
}

pub struct LocaleApi {
    client: Arc<dyn EngineClient>,
}

impl EngineApi for LocaleApi {
    fn new(client: Arc<dyn EngineClient>) -> Self {
        Self { client }
    }
}

impl LocaleApi {
    pub async fn list_locales(&self) -> Result<Vec<Locale>, EngineError> {
        let response = self.client.send(EngineRequest::get("/locales")).await?;
        decode_response(response)
    }

    pub async fn get_locale(&self, code: &str) -> Result<Locale, EngineError> {
        let response = self
            .client
            .send(EngineRequest::get(format!("/locales/{}", urlencoding::encode(code))))
            .await?;
        decode_response(response)
    }
}
