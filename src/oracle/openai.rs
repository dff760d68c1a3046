//! Blocking client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Images are sent inline as base64 PNG data URIs after the text part of a
//! single user message.

use anyhow::{Context, Result};
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::OracleConfig;
use crate::core::error::TableFuseError;
use crate::oracle::CorrectionOracle;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatCompletionsOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsOracle {
    /// Builds a client from `[oracle]` settings, reading the key from `api_key_env`.
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            debug!(var = %config.api_key_env, "no oracle API key set; sending unauthenticated requests");
        }
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, prompt: &str, images: &[DynamicImage]) -> Result<ChatRequest<'_>> {
        let mut content = vec![Content::Text {
            text: prompt.to_string(),
        }];
        for image in images {
            content.push(Content::ImageUrl {
                image_url: ImageUrl {
                    url: png_data_uri(image)?,
                },
            });
        }
        Ok(ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content,
            }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        })
    }
}

impl CorrectionOracle for ChatCompletionsOracle {
    fn respond(&self, prompt: &str, images: &[DynamicImage]) -> Result<String> {
        let request = self.build_request(prompt, images)?;
        let start = Instant::now();

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .with_context(|| format!("Failed to send request to {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(TableFuseError::Oracle {
                status: status.as_u16(),
                message,
            }
            .into());
        }

        let chat: ChatResponse = response
            .json()
            .context("Failed to parse chat completion response")?;
        debug!(
            model = %self.model,
            images = images.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "oracle responded"
        );

        Ok(chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

fn png_data_uri(image: &DynamicImage) -> Result<String> {
    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .context("Failed to encode table image as PNG")?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(png.into_inner());
    Ok(format!("data:image/png;base64,{encoded}"))
}
