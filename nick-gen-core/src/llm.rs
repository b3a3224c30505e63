use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::LlmError;

const API_KEY_ENV: &str = "GLM_API_KEY";
const USER_INSTRUCTION: &str = "请严格按照上述要求输出结果。";

/// Anything that turns a prompt into generated text.
///
/// Implemented by `GlmClient`; tests substitute canned responses.
pub trait TextGenerator: Send + Sync {
	fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Stand-in used when no API client could be built; every call fails.
#[derive(Debug, Clone)]
pub struct DisabledGenerator {
	reason: String,
}

impl DisabledGenerator {
	pub fn new(reason: impl Into<String>) -> Self {
		Self { reason: reason.into() }
	}
}

impl TextGenerator for DisabledGenerator {
	fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
		Err(LlmError::Provider(format!("LLM disabled: {}", self.reason)))
	}
}

/// Cumulative token consumption of a client.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
	#[serde(rename = "prompt_tokens", default)]
	pub input: u64,
	#[serde(rename = "completion_tokens", default)]
	pub output: u64,
	#[serde(rename = "total_tokens", default)]
	pub total: u64,
}

impl TokenUsage {
	fn add(&mut self, other: &Self) {
		self.input += other.input;
		self.output += other.output;
		self.total += other.total;
	}
}

#[derive(Serialize, Debug)]
struct ChatMessage<'a> {
	role: &'a str,
	content: &'a str,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
	model: &'a str,
	messages: Vec<ChatMessage<'a>>,
	temperature: f32,
	top_p: f32,
	max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
	#[serde(default)]
	choices: Vec<ChatChoice>,
	#[serde(default)]
	usage: Option<TokenUsage>,
	#[serde(default)]
	error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
	message: ChatChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChatChoiceMessage {
	#[serde(default)]
	content: Option<String>,
}

/// Blocking chat-completions client for the GLM API.
///
/// # Responsibilities
/// - Send one system prompt per request
/// - Retry failed requests with exponential backoff (`base * 2^attempt`)
/// - Track cumulative token usage
///
/// Must not be called from inside an async runtime worker; the server wraps
/// calls in `web::block`.
#[derive(Debug)]
pub struct GlmClient {
	client: Client,
	api_key: String,
	base_url: String,
	model: String,
	max_retries: u32,
	retry_wait_base: Duration,
	usage: Mutex<TokenUsage>,
}

impl GlmClient {
	/// Creates a client from the `api` section of `config.yaml`.
	///
	/// # Errors
	/// - `MissingApiKey` if neither the config nor `GLM_API_KEY` provides a key
	/// - `Request` if the HTTP client cannot be built
	pub fn new(config: &ApiConfig) -> Result<Self, LlmError> {
		let api_key = resolve_api_key(config.glm.api_key.as_deref(), std::env::var(API_KEY_ENV).ok())
			.ok_or(LlmError::MissingApiKey)?;

		let client = Client::builder().timeout(Duration::from_secs(config.timeout)).build()?;

		info!("GLM client ready, model: {}", config.glm.model);
		Ok(Self {
			client,
			api_key,
			base_url: config.glm.base_url.clone(),
			model: config.glm.model.clone(),
			max_retries: config.max_retries,
			retry_wait_base: Duration::from_secs(config.retry_wait_base),
			usage: Mutex::new(TokenUsage::default()),
		})
	}

	pub fn model(&self) -> &str {
		&self.model
	}

	/// Token usage accumulated since creation.
	pub fn token_usage(&self) -> TokenUsage {
		match self.usage.lock() {
			Ok(usage) => *usage,
			Err(poisoned) => *poisoned.into_inner(),
		}
	}

	/// Single request, no retry.
	fn call(&self, prompt: &str) -> Result<String, LlmError> {
		let request = build_request(&self.model, prompt);
		let response: ChatResponse = self
			.client
			.post(&self.base_url)
			.bearer_auth(&self.api_key)
			.json(&request)
			.send()?
			.error_for_status()?
			.json()?;

		let (content, usage) = extract_content(response)?;
		if let Ok(mut total) = self.usage.lock() {
			total.add(&usage);
		}
		debug!("API call succeeded, tokens: input={}, output={}, total={}", usage.input, usage.output, usage.total);
		Ok(content)
	}
}

impl TextGenerator for GlmClient {
	/// Calls the API, retrying up to `max_retries` times.
	fn generate(&self, prompt: &str) -> Result<String, LlmError> {
		let mut last_error = String::new();

		for attempt in 0..=self.max_retries {
			debug!("calling GLM API (attempt {})", attempt + 1);
			match self.call(prompt) {
				Ok(content) => return Ok(content),
				Err(e) => {
					warn!("GLM API call failed (attempt {}): {e}", attempt + 1);
					last_error = e.to_string();
				}
			}

			if attempt < self.max_retries {
				let wait = backoff(self.retry_wait_base, attempt);
				info!("retrying in {}s", wait.as_secs());
				thread::sleep(wait);
			}
		}

		error!("giving up after {} retries", self.max_retries);
		Err(LlmError::RetriesExhausted { attempts: self.max_retries + 1, last: last_error })
	}
}

/// Configured key first, unless it is an unresolved `${VAR}`; then the environment.
fn resolve_api_key(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
	configured
		.map(str::trim)
		.filter(|key| !key.is_empty() && !key.starts_with("${"))
		.map(str::to_owned)
		.or(from_env.filter(|key| !key.trim().is_empty()))
}

fn backoff(base: Duration, attempt: u32) -> Duration {
	base.saturating_mul(2u32.saturating_pow(attempt))
}

fn build_request<'a>(model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
	ChatRequest {
		model,
		messages: vec![
			ChatMessage { role: "system", content: prompt },
			ChatMessage { role: "user", content: USER_INSTRUCTION },
		],
		temperature: 0.9,
		top_p: 0.9,
		max_tokens: 8192,
	}
}

fn extract_content(response: ChatResponse) -> Result<(String, TokenUsage), LlmError> {
	if let Some(error) = response.error {
		return Err(LlmError::Provider(error.to_string()));
	}
	let usage = response.usage.unwrap_or_default();
	let content = response
		.choices
		.into_iter()
		.next()
		.and_then(|choice| choice.message.content)
		.ok_or_else(|| LlmError::MalformedResponse("no choices[0].message.content".to_owned()))?;
	Ok((content, usage))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn api_key_resolution_order() {
		assert_eq!(resolve_api_key(Some("abc"), Some("env".into())).as_deref(), Some("abc"));
		assert_eq!(resolve_api_key(Some("${GLM_API_KEY}"), Some("env".into())).as_deref(), Some("env"));
		assert_eq!(resolve_api_key(Some("  "), None), None);
		assert_eq!(resolve_api_key(None, None), None);
	}

	#[test]
	fn backoff_doubles() {
		let base = Duration::from_secs(2);
		assert_eq!(backoff(base, 0), Duration::from_secs(2));
		assert_eq!(backoff(base, 1), Duration::from_secs(4));
		assert_eq!(backoff(base, 2), Duration::from_secs(8));
	}

	#[test]
	fn request_payload_shape() {
		let payload = serde_json::to_value(build_request("glm-4-flash", "生成词根")).unwrap();
		assert_eq!(payload["model"], "glm-4-flash");
		assert_eq!(payload["messages"][0]["role"], "system");
		assert_eq!(payload["messages"][0]["content"], "生成词根");
		assert_eq!(payload["messages"][1]["role"], "user");
	}

	#[test]
	fn content_and_usage_are_extracted() {
		let response: ChatResponse = serde_json::from_str(
			r#"{"choices":[{"message":{"content":"[\"云\"]"}}],
			   "usage":{"prompt_tokens":100,"completion_tokens":50,"total_tokens":150}}"#,
		)
		.unwrap();
		let (content, usage) = extract_content(response).unwrap();
		assert_eq!(content, "[\"云\"]");
		assert_eq!(usage, TokenUsage { input: 100, output: 50, total: 150 });
	}

	#[test]
	fn provider_errors_and_empty_choices_are_reported() {
		let response: ChatResponse = serde_json::from_str(r#"{"error":{"code":"1113","message":"余额不足"}}"#).unwrap();
		assert!(matches!(extract_content(response), Err(LlmError::Provider(_))));

		let response: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
		assert!(matches!(extract_content(response), Err(LlmError::MalformedResponse(_))));
	}
}
