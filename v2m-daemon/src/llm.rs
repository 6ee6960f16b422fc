//! LLM text refinement over a local Ollama instance.
//!
//! Transport errors (connect, timeout) retry with bounded exponential
//! backoff: 0.5 s base, doubling to a 2 s cap, three attempts total.
//! Anything else — bad status, malformed body — fails immediately.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_CAP: Duration = Duration::from_secs(2);

const REFINE_SYSTEM_PROMPT: &str = "Eres un editor experto. Corrige gramática, \
puntuación y coherencia del texto dictado sin cambiar su significado. \
Responde únicamente con el texto corregido.";

/// Text refinement capability, external to the core.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn process_text(&self, text: &str) -> Result<String>;
    async fn translate_text(&self, text: &str, target_lang: &str) -> Result<String>;
}

pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OllamaClient {
    pub fn new(base_url: String, model: String, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);
        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut delay = RETRY_BASE;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.http.post(&url).json(&body).send().await {
                Ok(response) => {
                    let response = response
                        .error_for_status()
                        .context("ollama returned an error status")?;
                    let parsed: ChatResponse =
                        response.json().await.context("parsing ollama response")?;
                    debug!(attempt, "ollama chat completed");
                    return Ok(parsed.message.content.trim().to_string());
                }
                Err(e) if is_transient(&e) && attempt < RETRY_ATTEMPTS => {
                    warn!(attempt, "transient ollama error, retrying in {delay:?}: {e}");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_CAP);
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e).context("ollama request failed"));
                }
            }
        }
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[async_trait]
impl LlmService for OllamaClient {
    async fn process_text(&self, text: &str) -> Result<String> {
        info!(chars = text.len(), model = self.model.as_str(), "refining text");
        self.chat(REFINE_SYSTEM_PROMPT, text).await
    }

    async fn translate_text(&self, text: &str, target_lang: &str) -> Result<String> {
        info!(target_lang, model = self.model.as_str(), "translating text");
        let system = format!(
            "Eres un traductor profesional. Traduce el texto al idioma '{target_lang}' \
             conservando el registro y el significado. Responde únicamente con la traducción."
        );
        self.chat(&system, text).await
    }
}
