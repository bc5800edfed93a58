// src/llm_client.rs
//
// Blocking HTTP ranking oracle for OpenAI-compatible chat-completions
// servers.
//
// The scene prompts go out as a system and a user message; the answer is
// forced into the describer's schema through `response_format` of type
// `json_schema` (strict). The ranking is the JSON document inside
// `choices[0].message.content`.
//
// Connection and decode failures are retried up to `retry_limit` times.
// HTTP errors and timeouts are not. Every exchange can be written to a
// transcript directory for later inspection.

use crate::describer::SCHEMA_TITLE;
use crate::error::OracleError;
use crate::oracle::{RankingOracle, RankingRequest};
use crate::types::OracleConfig;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// TRANSCRIPT
// ============================================================================

#[derive(Debug, Serialize)]
struct Transcript<'a> {
    id: String,
    timestamp: String,
    model: &'a str,
    temperature: f64,
    system_prompt: &'a str,
    user_prompt: &'a str,
    schema: &'a Value,
    response: Option<&'a Value>,
    error: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

pub struct HttpRankingOracle {
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f64,
    retry_limit: u32,
    timeout: Duration,
    transcript_dir: Option<PathBuf>,
    http_client: reqwest::blocking::Client,
}

impl HttpRankingOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                "⚠️ {} is not set, sending unauthenticated requests",
                config.api_key_env
            );
        }

        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            retry_limit: config.retry_limit,
            timeout,
            transcript_dir: config.transcript_dir.as_ref().map(PathBuf::from),
            http_client,
        })
    }

    /// Chat-completions body for one ranking request.
    pub fn request_body(&self, request: &RankingRequest) -> Value {
        let name = request
            .schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(SCHEMA_TITLE);
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "schema": request.schema,
                    "strict": true,
                },
            },
        })
    }

    fn send_once(&self, body: &Value) -> Result<Value, OracleError> {
        let mut builder = self.http_client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().map_err(|e| {
            if e.is_timeout() {
                OracleError::Timeout(self.timeout)
            } else {
                OracleError::Connection(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(OracleError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp
            .json()
            .map_err(|e| OracleError::Malformed(format!("response body is not JSON: {}", e)))?;
        extract_content(&payload)
    }

    fn save_transcript(&self, dir: &Path, request: &RankingRequest, result: &Result<Value, OracleError>) {
        let transcript = Transcript {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            model: &self.model,
            temperature: self.temperature,
            system_prompt: &request.system_prompt,
            user_prompt: &request.user_prompt,
            schema: &request.schema,
            response: result.as_ref().ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        match write_transcript(dir, &transcript) {
            Ok(path) => debug!("Transcript written to {}", path.display()),
            Err(e) => warn!("⚠️ Could not write transcript: {:#}", e),
        }
    }
}

impl RankingOracle for HttpRankingOracle {
    fn rank(&self, request: &RankingRequest) -> Result<Value, OracleError> {
        let body = self.request_body(request);
        let attempts = self.retry_limit + 1;

        let result = with_retries(self.retry_limit, |attempt| {
            info!(
                "🌐 Sending ranking request to {} | model={} | attempt {}/{}",
                self.url, self.model, attempt, attempts
            );
            self.send_once(&body)
        });

        if let Some(dir) = &self.transcript_dir {
            self.save_transcript(dir, request, &result);
        }
        result
    }
}

/// Calls `send` with the 1-based attempt number until it succeeds, fails
/// with a non-transient error, or `retry_limit` retries are used up.
fn with_retries<F>(retry_limit: u32, mut send: F) -> Result<Value, OracleError>
where
    F: FnMut(u32) -> Result<Value, OracleError>,
{
    let attempts = retry_limit + 1;
    let mut attempt = 1;
    loop {
        match send(attempt) {
            Ok(ranking) => {
                info!("🌐 Oracle answered on attempt {}", attempt);
                return Ok(ranking);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("🌐 Transient oracle failure, retrying: {}", e);
                attempt += 1;
            }
            Err(e) => {
                error!("🌐 Oracle request failed: {}", e);
                return Err(e);
            }
        }
    }
}

/// Parses the JSON document in `choices[0].message.content`.
pub fn extract_content(payload: &Value) -> Result<Value, OracleError> {
    let content = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| OracleError::Malformed("no choices[0].message.content".to_string()))?;
    serde_json::from_str(content)
        .map_err(|e| OracleError::Malformed(format!("content is not JSON: {}", e)))
}

fn write_transcript(dir: &Path, transcript: &Transcript<'_>) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create transcript dir {}", dir.display()))?;
    let name = format!(
        "{}_{}.json",
        chrono::Utc::now().format("%Y%m%d_%H%M%S"),
        transcript.id
    );
    let path = dir.join(name);
    let contents = serde_json::to_string_pretty(transcript).context("Failed to encode transcript")?;
    fs::write(&path, contents)
        .with_context(|| format!("Failed to write transcript {}", path.display()))?;
    Ok(path)
}
