//! Topic inference: segment text → candidate module/submodule descriptors.
//!
//! [`LlmInference`] talks to any OpenAI-compatible chat completions endpoint
//! (Groq by default) and asks for a strict JSON module list built only from
//! the segment it is given.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use docmap_shared::{DocmapError, LlmConfig, Result, Segment, SegmentRef, TopicDescriptor};

/// Per-segment inference failure. The segment contributes no descriptors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unusable response: {0}")]
    Parse(String),
}

impl InferenceError {
    /// Whether the same request could succeed if sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Parse(_) => false,
        }
    }
}

/// Infers topic descriptors from one segment.
///
/// Every returned descriptor should carry `source` so consolidation can
/// order canonical topics by first appearance.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(
        &self,
        segment: &Segment,
        source: &SegmentRef,
    ) -> std::result::Result<Vec<TopicDescriptor>, InferenceError>;

    /// Ask again with a less strict prompt. Used only when a whole session
    /// produced no descriptors; finds nothing unless overridden.
    async fn infer_relaxed(
        &self,
        _segment: &Segment,
        _source: &SegmentRef,
    ) -> std::result::Result<Vec<TopicDescriptor>, InferenceError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// LLM client
// ---------------------------------------------------------------------------

/// Characters of segment text sent per request.
const MAX_PROMPT_CONTENT: usize = 8_000;
const TRUNCATION_MARKER: &str = "\n\n[Content truncated...]";
const TEMPERATURE: f64 = 0.1;
const RELAXED_TEMPERATURE: f64 = 0.3;
const MAX_COMPLETION_TOKENS: usize = 4_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a precise documentation analyzer. \
Always respond with valid JSON only. Use only the content you are given and never invent features.";

const INSTRUCTIONS: &str = r#"Identify the modules and submodules described by this documentation excerpt.

A module is a major product area, feature, guide, or documentation category
(for example Billing, Getting Started, Themes, Security).
A submodule is a specific task, feature, or concept inside a module.

Rules:
- Use only the content below. Do not invent features.
- Treat product names, feature names and section headings as modules.
- Keep descriptions short and factual.

Respond with strict JSON in exactly this shape:
{"modules": [{"module": "Module Name", "Description": "What it covers", "Submodules": {"Submodule Name": "What it covers"}}]}
"#;

const RELAXED_INSTRUCTIONS: &str = r#"You are analyzing product documentation.

You must extract at least one module from this content. Look for product
names or product areas, feature names or categories, section headings and
documentation categories. Even if the content is minimal, name its main
topics as modules.

Respond with strict JSON in exactly this shape:
{"modules": [{"module": "Module Name", "Description": "Description based on content", "Submodules": {}}]}
"#;

/// Chat-completions backed [`Inference`].
pub struct LlmInference {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_retries: u32,
    retry_backoff: Duration,
    relaxed_fallback: bool,
}

impl LlmInference {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DocmapError::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.base_url.clone(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            relaxed_fallback: config.relaxed_fallback,
        })
    }

    /// Send one chat completion, retrying transient failures with
    /// exponential backoff. Returns the assistant's message text.
    async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> std::result::Result<String, InferenceError> {
        let mut attempt = 0;
        loop {
            match self.complete_once(prompt, temperature).await {
                Ok(content) => return Ok(content),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(error = %err, attempt, ?backoff, "transient inference failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_once(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> std::result::Result<String, InferenceError> {
        let body = ChatRequest {
            model: &self.model,
            temperature,
            max_tokens: MAX_COMPLETION_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| InferenceError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| InferenceError::Parse("response has no choices".into()))
    }
}

#[async_trait]
impl Inference for LlmInference {
    #[instrument(skip_all, fields(url = %source.url, index = source.index))]
    async fn infer(
        &self,
        segment: &Segment,
        source: &SegmentRef,
    ) -> std::result::Result<Vec<TopicDescriptor>, InferenceError> {
        let content = self
            .complete(&build_prompt(INSTRUCTIONS, segment), TEMPERATURE)
            .await?;
        let descriptors = parse_modules(&content, source)?;
        debug!(descriptors = descriptors.len(), "segment inferred");
        Ok(descriptors)
    }

    #[instrument(skip_all, fields(url = %source.url, index = source.index))]
    async fn infer_relaxed(
        &self,
        segment: &Segment,
        source: &SegmentRef,
    ) -> std::result::Result<Vec<TopicDescriptor>, InferenceError> {
        if !self.relaxed_fallback {
            return Ok(Vec::new());
        }
        let content = self
            .complete(&build_prompt(RELAXED_INSTRUCTIONS, segment), RELAXED_TEMPERATURE)
            .await?;
        parse_modules(&content, source)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: String,
}

// ---------------------------------------------------------------------------
// Prompt and response handling
// ---------------------------------------------------------------------------

fn build_prompt(instructions: &str, segment: &Segment) -> String {
    let mut content = format!("Page: {}\n", segment.source_url);
    if !segment.heading_path.is_empty() {
        content.push_str(&format!("Section: {}\n", segment.heading_path.join(" > ")));
    }
    content.push('\n');
    content.push_str(&segment.text);

    format!("{instructions}\nCONTENT:\n{}", truncate_chars(&content, MAX_PROMPT_CONTENT))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[derive(Debug, Deserialize)]
struct RawModule {
    #[serde(default)]
    module: String,
    #[serde(default, rename = "Description", alias = "description")]
    description: Option<String>,
    #[serde(default, rename = "Submodules", alias = "submodules")]
    submodules: Option<BTreeMap<String, Value>>,
}

/// Turn the model's JSON answer into descriptors tagged with `source`.
///
/// Accepts `{"modules": [...]}`, a bare module object, or a bare array.
/// Modules without a name are dropped; an empty description falls back to
/// `Documentation for <name>`. Submodules get the module as parent.
fn parse_modules(
    content: &str,
    source: &SegmentRef,
) -> std::result::Result<Vec<TopicDescriptor>, InferenceError> {
    let value: Value = serde_json::from_str(strip_fences(content))
        .map_err(|e| InferenceError::Parse(e.to_string()))?;

    let items = match value {
        Value::Object(mut map) => match map.remove("modules") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(InferenceError::Parse(format!(
                    "`modules` is not a list: {other}"
                )));
            }
            None if map.contains_key("module") => vec![Value::Object(map)],
            None => return Err(InferenceError::Parse("no `modules` key".into())),
        },
        Value::Array(items) => items,
        other => return Err(InferenceError::Parse(format!("unexpected JSON: {other}"))),
    };

    let mut descriptors = Vec::new();
    for item in items {
        let raw: RawModule = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(error = %e, "skipping malformed module entry");
                continue;
            }
        };
        let name = raw.module.trim();
        if name.is_empty() {
            continue;
        }

        let description = raw
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map_or_else(|| format!("Documentation for {name}"), str::to_string);
        descriptors.push(TopicDescriptor::new(name, description).with_source(source.clone()));

        for (sub_name, sub_description) in raw.submodules.unwrap_or_default() {
            let sub_name = sub_name.trim();
            if sub_name.is_empty() {
                continue;
            }
            let sub_description = sub_description.as_str().unwrap_or_default().trim();
            descriptors.push(
                TopicDescriptor::new(sub_name, sub_description)
                    .with_parent(name)
                    .with_source(source.clone()),
            );
        }
    }

    Ok(descriptors)
}
