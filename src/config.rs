//! Configuration types for receipt extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Configuration is an explicit value
//! handed to the transport at construction time; nothing is read from
//! process-wide mutable state once the config exists, so concurrent
//! extractions only ever share read-only settings.
//!
//! # Transport target
//! Resolution runs from most to least specific:
//!
//! 1. `provider`: a pre-built [`LLMProvider`]
//! 2. `provider_name`: created through `edgequake_llm::ProviderFactory`
//! 3. `endpoints`: direct or relayed HTTP endpoints (default)

use crate::error::ReceiptError;
use crate::schema::{BankMode, DepositMode, FieldSchema, OutputFormat, PresenceTokens};
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// OpenAI-compatible relay used by the hosted deployment.
pub const DEFAULT_ENDPOINT: &str = "https://api.gapgpt.app/v1/chat/completions";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Request/response dialect spoken by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `POST /v1/chat/completions` with a data-URI `image_url` part.
    #[default]
    OpenAiChat,
    /// Gemini `:generateContent` with an `inline_data` bare base64 part.
    GeminiGenerateContent,
}

/// One candidate inference endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Target URL of the inference API.
    pub url: String,
    /// Relay prefix prepended to `url` (CORS / firewall intermediary).
    pub relay: Option<String>,
    /// Whether a credential must be sent. Default: true.
    pub requires_auth: bool,
    pub wire: WireFormat,
}

impl Endpoint {
    /// A direct endpoint that requires credentials.
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            relay: None,
            requires_auth: true,
            wire: WireFormat::OpenAiChat,
        }
    }

    /// `target` reached through a relay whose URL is `prefix` + `target`.
    pub fn relay(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relay: Some(prefix.into()),
            ..Self::direct(target)
        }
    }

    /// The Gemini `generateContent` endpoint for `model`.
    pub fn gemini(model: &str) -> Self {
        Self::direct(format!("{GEMINI_BASE}/{model}:generateContent"))
            .with_wire(WireFormat::GeminiGenerateContent)
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    /// Mark the endpoint as open (self-hosted gateway, local model server).
    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// URL actually requested, relay prefix included.
    pub fn effective_url(&self) -> String {
        match &self.relay {
            Some(prefix) => format!("{prefix}{}", self.url),
            None => self.url.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relay {
            Some(prefix) => write!(f, "{} (via {})", self.url, prefix),
            None => f.write_str(&self.url),
        }
    }
}

/// What the HTTP transport does when an endpoint cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    /// Use the first endpoint only.
    Never,
    /// Move to the next endpoint only when the connection itself failed.
    /// HTTP errors and timeouts are returned as-is. (default)
    #[default]
    OnConnectError,
}

/// Configuration for a receipt extraction.
///
/// # Example
/// ```rust
/// use edgequake_receipt::{ExtractionConfig, Endpoint, DepositMode};
///
/// let config = ExtractionConfig::builder()
///     .endpoint(Endpoint::direct("https://api.openai.com/v1/chat/completions"))
///     .api_key("sk-test")
///     .deposit_mode(DepositMode::Presence)
///     .timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoints.len(), 1);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Candidate endpoints, tried in order per [`FailoverPolicy`].
    /// Default: [`DEFAULT_ENDPOINT`].
    pub endpoints: Vec<Endpoint>,

    /// Bearer token (or Gemini API key). Required by any endpoint with
    /// `requires_auth`.
    pub api_key: Option<String>,

    /// Model identifier sent in the request body. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// `edgequake-llm` provider name ("openai", "anthropic", "gemini", ...).
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over everything else.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Field-schema mode shared by prompt and reconciler.
    pub schema: FieldSchema,

    /// Sampling temperature. Default: 0.0.
    ///
    /// Pinned to zero so repeated scans of the same image read the same digits.
    pub temperature: f32,

    /// Nucleus sampling cap. Default: 0.1.
    pub top_p: Option<f32>,

    /// Maximum output tokens. Default: 1000.
    ///
    /// A full record is well under 200 tokens; the headroom covers models that
    /// prepend prose, so the JSON object is never cut mid-way.
    pub max_tokens: usize,

    /// Bound on the whole transport call, failover included. Default: 60 s.
    pub timeout: Duration,

    pub failover: FailoverPolicy,

    /// Custom instruction text. If None, built from `schema`.
    pub system_prompt: Option<String>,

    /// Custom user-turn text accompanying the image.
    pub user_prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![Endpoint::direct(DEFAULT_ENDPOINT)],
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            provider: None,
            schema: FieldSchema::default(),
            temperature: 0.0,
            top_p: Some(0.1),
            max_tokens: 1000,
            timeout: Duration::from_secs(60),
            failover: FailoverPolicy::default(),
            system_prompt: None,
            user_prompt: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("schema", &self.schema)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("failover", &self.failover)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
            endpoints_set: false,
        }
    }

    /// The API key, if one is configured and non-empty.
    pub(crate) fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
    endpoints_set: bool,
}

impl ExtractionConfigBuilder {
    /// Add a candidate endpoint. The first call replaces the default endpoint.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        if !self.endpoints_set {
            self.config.endpoints.clear();
            self.endpoints_set = true;
        }
        self.config.endpoints.push(endpoint);
        self
    }

    /// Replace the endpoint list.
    pub fn endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.config.endpoints = endpoints;
        self.endpoints_set = true;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn schema(mut self, schema: FieldSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn deposit_mode(mut self, mode: DepositMode) -> Self {
        self.config.schema.deposit_mode = mode;
        self
    }

    pub fn presence_tokens(mut self, tokens: PresenceTokens) -> Self {
        self.config.schema.presence_tokens = tokens;
        self
    }

    pub fn bank_mode(mut self, mode: BankMode) -> Self {
        self.config.schema.bank_mode = mode;
        self
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.schema.output_format = format;
        self
    }

    pub fn identifier_tie_break(mut self, v: bool) -> Self {
        self.config.schema.identifier_tie_break = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn top_p(mut self, p: Option<f32>) -> Self {
        self.config.top_p = p;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_secs(self, secs: u64) -> Self {
        self.timeout(Duration::from_secs(secs))
    }

    pub fn failover(mut self, policy: FailoverPolicy) -> Self {
        self.config.failover = policy;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.user_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Credentials are checked later, when the HTTP transport is constructed,
    /// because provider-backed targets carry their own.
    pub fn build(self) -> Result<ExtractionConfig, ReceiptError> {
        let c = &self.config;
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(ReceiptError::Configuration(format!(
                "temperature must be 0.0–2.0, got {}",
                c.temperature
            )));
        }
        if let Some(p) = c.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ReceiptError::Configuration(format!(
                    "top_p must be in (0, 1], got {p}"
                )));
            }
        }
        if c.max_tokens == 0 {
            return Err(ReceiptError::Configuration("max_tokens must be ≥ 1".into()));
        }
        if c.timeout.is_zero() {
            return Err(ReceiptError::Configuration("timeout must be > 0".into()));
        }
        if c.model.trim().is_empty() {
            return Err(ReceiptError::Configuration("model must not be empty".into()));
        }
        Ok(self.config)
    }
}
