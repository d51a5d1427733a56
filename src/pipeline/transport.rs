//! Transport: deliver an [`ExtractionRequest`] and return the model's raw text.
//!
//! This is the only stage with network I/O. Two targets implement the
//! [`Transport`] trait:
//!
//! * [`HttpTransport`]: direct or relayed HTTP endpoints speaking the OpenAI
//!   chat or Gemini `generateContent` dialect. Non-2xx replies are classified
//!   into `Auth` / `RateLimit` / `Upstream` errors carrying status and body.
//! * [`ProviderTransport`]: any `edgequake_llm::LLMProvider`.
//!
//! ## No retries
//!
//! A call is a single attempt. The only fallback is moving to the next
//! endpoint when the *connection* to the current one failed (see
//! [`FailoverPolicy`]); that request never reached a model, so nothing is
//! repeated. HTTP errors and timeouts go straight back to the caller, who may
//! re-invoke the pipeline.
//!
//! ## Timeout
//!
//! The configured bound covers the whole call, failover hops included. On
//! expiry the in-flight future is dropped (cancelling the request) and a
//! `Timeout` error is returned.

use crate::config::{Endpoint, ExtractionConfig, FailoverPolicy, WireFormat};
use crate::error::{excerpt, ReceiptError};
use crate::pipeline::request::ExtractionRequest;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on how much of an error body is kept for diagnostics.
const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Raw model reply plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportReply {
    pub text: String,
    /// Endpoint (or provider) that answered.
    pub endpoint: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Something that can deliver a request to a vision model.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ExtractionRequest) -> Result<TransportReply, ReceiptError>;
}

/// Pick the transport target for `config`, most specific first.
pub fn resolve_transport(config: &ExtractionConfig) -> Result<Arc<dyn Transport>, ReceiptError> {
    if config.provider.is_some() || config.provider_name.is_some() {
        return Ok(Arc::new(ProviderTransport::from_config(config)?));
    }
    Ok(Arc::new(HttpTransport::new(config)?))
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// HTTP transport over one or more candidate endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: Vec<Endpoint>,
    api_key: Option<String>,
    timeout: Duration,
    failover: FailoverPolicy,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("failover", &self.failover)
            .finish()
    }
}

impl HttpTransport {
    /// Validate endpoints and credentials, then build the client.
    ///
    /// Fails with `Configuration` before any network activity when the
    /// endpoint list is empty, a URL does not parse, or an endpoint needs a
    /// credential that is not configured.
    pub fn new(config: &ExtractionConfig) -> Result<Self, ReceiptError> {
        if config.endpoints.is_empty() {
            return Err(ReceiptError::Configuration(
                "no inference endpoint configured".into(),
            ));
        }

        let api_key = config.credential().map(str::to_string);
        for endpoint in &config.endpoints {
            let url = endpoint.effective_url();
            let parsed = reqwest::Url::parse(&url).map_err(|e| {
                ReceiptError::Configuration(format!("invalid endpoint URL '{url}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ReceiptError::Configuration(format!(
                    "endpoint URL '{url}' must be http or https"
                )));
            }
            if endpoint.requires_auth && api_key.is_none() {
                return Err(ReceiptError::Configuration(format!(
                    "endpoint {endpoint} requires an API key but none is configured"
                )));
            }
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ReceiptError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            api_key,
            timeout: config.timeout,
            failover: config.failover,
        })
    }

    /// Endpoints this transport will try, in order.
    fn candidates(&self) -> &[Endpoint] {
        match self.failover {
            FailoverPolicy::Never => &self.endpoints[..1],
            FailoverPolicy::OnConnectError => &self.endpoints,
        }
    }

    async fn send_with_failover(
        &self,
        request: &ExtractionRequest,
        start: Instant,
    ) -> Result<TransportReply, ReceiptError> {
        let candidates = self.candidates();
        let mut failures = Vec::with_capacity(candidates.len());

        for (i, endpoint) in candidates.iter().enumerate() {
            match self.send_to(endpoint, request, start).await {
                Err(ReceiptError::Transport { reason, .. }) => {
                    if i + 1 < candidates.len() {
                        warn!(
                            "Endpoint {} unreachable ({}), trying next candidate",
                            endpoint, reason
                        );
                    }
                    failures.push(format!("{endpoint}: {reason}"));
                }
                other => return other,
            }
        }

        let endpoint = candidates
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(ReceiptError::Transport {
            endpoint,
            reason: failures.join("; "),
        })
    }

    async fn send_to(
        &self,
        endpoint: &Endpoint,
        request: &ExtractionRequest,
        start: Instant,
    ) -> Result<TransportReply, ReceiptError> {
        let url = endpoint.effective_url();
        info!("Sending extraction request to {}", endpoint);

        let mut builder = self.client.post(&url).json(&request.to_body(endpoint.wire));
        if endpoint.requires_auth {
            if let Some(ref key) = self.api_key {
                builder = match endpoint.wire {
                    WireFormat::OpenAiChat => builder.bearer_auth(key),
                    WireFormat::GeminiGenerateContent => builder.header("x-goog-api-key", key),
                };
            }
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ReceiptError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
            } else {
                ReceiptError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        debug!("{} answered HTTP {}", endpoint, status.as_u16());

        if !status.is_success() {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = error_body(response.text().await);
            return Err(classify_status(
                &endpoint.to_string(),
                status.as_u16(),
                excerpt(&body, MAX_ERROR_BODY_CHARS),
                retry_after_secs,
            ));
        }

        let body = response.text().await.map_err(|e| ReceiptError::Transport {
            endpoint: endpoint.to_string(),
            reason: format!("reading response body: {e}"),
        })?;

        let json: Value = serde_json::from_str(&body).map_err(|_| ReceiptError::Upstream {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: excerpt(&body, MAX_ERROR_BODY_CHARS),
        })?;

        let reply = match endpoint.wire {
            WireFormat::OpenAiChat => parse_openai_reply(&json),
            WireFormat::GeminiGenerateContent => parse_gemini_reply(&json),
        }
        .ok_or_else(|| ReceiptError::Upstream {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: excerpt(&body, MAX_ERROR_BODY_CHARS),
        })?;

        debug!(
            "Reply from {}: {} chars, {:?} in / {:?} out tokens",
            endpoint,
            reply.text.chars().count(),
            reply.input_tokens,
            reply.output_tokens
        );

        Ok(TransportReply {
            endpoint: endpoint.to_string(),
            ..reply
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ExtractionRequest) -> Result<TransportReply, ReceiptError> {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, self.send_with_failover(request, start)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Extraction request cancelled after {:?}", self.timeout);
                Err(ReceiptError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

/// Map a non-2xx status to its error class.
pub fn classify_status(
    endpoint: &str,
    status: u16,
    body: String,
    retry_after_secs: Option<u64>,
) -> ReceiptError {
    let endpoint = endpoint.to_string();
    match status {
        401 | 403 => ReceiptError::Auth {
            endpoint,
            status,
            body,
        },
        429 => ReceiptError::RateLimit {
            endpoint,
            status,
            body,
            retry_after_secs,
        },
        _ => ReceiptError::Upstream {
            endpoint,
            status,
            body,
        },
    }
}

/// `choices[0].message.content`, as a string or a list of text parts.
///
/// Returns `None` when the body has no `choices` at all (some relays answer
/// 200 with an `error` object).
fn parse_openai_reply(json: &Value) -> Option<TransportReply> {
    let choice = json.get("choices")?.as_array()?.first()?;
    let content = &choice["message"]["content"];
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };
    Some(TransportReply {
        text,
        endpoint: String::new(),
        input_tokens: json["usage"]["prompt_tokens"].as_u64(),
        output_tokens: json["usage"]["completion_tokens"].as_u64(),
    })
}

/// Concatenated `candidates[0].content.parts[*].text`.
fn parse_gemini_reply(json: &Value) -> Option<TransportReply> {
    let candidate = json.get("candidates")?.as_array()?.first()?;
    let text = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    Some(TransportReply {
        text,
        endpoint: String::new(),
        input_tokens: json["usageMetadata"]["promptTokenCount"].as_u64(),
        output_tokens: json["usageMetadata"]["candidatesTokenCount"].as_u64(),
    })
}

/// Body of a non-2xx reply; a failed read is reported in place of the body.
fn error_body(read: reqwest::Result<String>) -> String {
    match read {
        Ok(body) => body,
        Err(e) => {
            warn!("Could not read error body: {}", e);
            format!("<error body unreadable: {e}>")
        }
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// Transport backed by an `edgequake-llm` provider.
pub struct ProviderTransport {
    provider: Arc<dyn LLMProvider>,
    label: String,
    timeout: Duration,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            label: label.into(),
            timeout,
        }
    }

    /// Use `config.provider`, or create `config.provider_name` with
    /// `config.model` through `ProviderFactory` (which reads the provider's
    /// API key variable from the environment).
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ReceiptError> {
        if let Some(ref provider) = config.provider {
            return Ok(Self::new(Arc::clone(provider), "provider", config.timeout));
        }

        let name = config.provider_name.as_deref().ok_or_else(|| {
            ReceiptError::Configuration("no provider or provider name configured".into())
        })?;
        let provider = ProviderFactory::create_llm_provider(name, &config.model).map_err(|e| {
            ReceiptError::Configuration(format!("LLM provider '{name}' is not configured: {e}"))
        })?;
        Ok(Self::new(
            provider,
            format!("{name}/{}", config.model),
            config.timeout,
        ))
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn send(&self, request: &ExtractionRequest) -> Result<TransportReply, ReceiptError> {
        let start = Instant::now();
        let messages = vec![
            ChatMessage::system(request.instruction.as_str()),
            ChatMessage::user_with_images(
                request.user_text.as_str(),
                vec![request.image.to_image_data()],
            ),
        ];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            top_p: request.top_p,
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        info!("Sending extraction request to provider {}", self.label);
        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&options)))
            .await
            .map_err(|_| {
                warn!("Provider {} cancelled after {:?}", self.label, self.timeout);
                ReceiptError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                }
            })?
            .map_err(|e| ReceiptError::Transport {
                endpoint: self.label.clone(),
                reason: e.to_string(),
            })?;

        Ok(TransportReply {
            text: response.content,
            endpoint: self.label.clone(),
            input_tokens: Some(response.prompt_tokens as u64),
            output_tokens: Some(response.completion_tokens as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status("e", 401, String::new(), None),
            ReceiptError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify_status("e", 403, String::new(), None),
            ReceiptError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            classify_status("e", 429, String::new(), Some(7)),
            ReceiptError::RateLimit {
                retry_after_secs: Some(7),
                ..
            }
        ));
        assert!(matches!(
            classify_status("e", 502, "bad gateway".into(), None),
            ReceiptError::Upstream { status: 502, .. }
        ));
        assert!(matches!(
            classify_status("e", 400, String::new(), None),
            ReceiptError::Upstream { status: 400, .. }
        ));
    }

    #[test]
    fn openai_reply_string_and_parts() {
        let r = parse_openai_reply(&json!({
            "choices": [{ "message": { "content": "{\"amount\":\"1\"}" } }],
            "usage": { "prompt_tokens": 812, "completion_tokens": 40 }
        }))
        .unwrap();
        assert_eq!(r.text, "{\"amount\":\"1\"}");
        assert_eq!(r.input_tokens, Some(812));

        let r = parse_openai_reply(&json!({
            "choices": [{ "message": { "content": [
                { "type": "text", "text": "AMOUNT: " },
                { "type": "text", "text": "5" }
            ] } }]
        }))
        .unwrap();
        assert_eq!(r.text, "AMOUNT: 5");
        assert_eq!(r.output_tokens, None);
    }

    #[test]
    fn openai_error_body_is_not_a_reply() {
        assert!(parse_openai_reply(&json!({ "error": { "message": "quota" } })).is_none());
    }

    #[test]
    fn gemini_reply_concatenates_parts() {
        let r = parse_gemini_reply(&json!({
            "candidates": [{ "content": { "parts": [ { "text": "{\"time\":" }, { "text": "\"14:30\"}" } ] } }],
            "usageMetadata": { "promptTokenCount": 300, "candidatesTokenCount": 12 }
        }))
        .unwrap();
        assert_eq!(r.text, "{\"time\":\"14:30\"}");
        assert_eq!(r.output_tokens, Some(12));
    }

    #[test]
    fn missing_key_fails_before_network() {
        let config = ExtractionConfig::default();
        let err = HttpTransport::new(&config).unwrap_err();
        assert!(matches!(err, ReceiptError::Configuration(_)));
    }

    #[test]
    fn open_endpoint_needs_no_key() {
        let config = ExtractionConfig::builder()
            .endpoint(Endpoint::direct("http://localhost:11434/v1/chat/completions").without_auth())
            .build()
            .unwrap();
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn rejects_bad_urls_and_empty_lists() {
        let config = ExtractionConfig::builder()
            .endpoint(Endpoint::direct("not a url"))
            .api_key("k")
            .build()
            .unwrap();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ReceiptError::Configuration(_))
        ));

        let config = ExtractionConfig::builder()
            .endpoints(vec![])
            .api_key("k")
            .build()
            .unwrap();
        assert!(matches!(
            HttpTransport::new(&config),
            Err(ReceiptError::Configuration(_))
        ));
    }

    #[test]
    fn never_policy_uses_first_endpoint_only() {
        let config = ExtractionConfig::builder()
            .endpoint(Endpoint::direct("https://a.example/v1").without_auth())
            .endpoint(Endpoint::direct("https://b.example/v1").without_auth())
            .failover(FailoverPolicy::Never)
            .build()
            .unwrap();
        let t = HttpTransport::new(&config).unwrap();
        assert_eq!(t.candidates().len(), 1);
    }

    #[test]
    fn debug_redacts_key() {
        let config = ExtractionConfig::builder().api_key("sk-live").build().unwrap();
        let t = HttpTransport::new(&config).unwrap();
        assert!(!format!("{t:?}").contains("sk-live"));
    }

    // ── ProviderTransport ────────────────────────────────────────────────

    use crate::pipeline::encode::encode_bytes;
    use edgequake_llm::{ChatRole, LLMResponse, LlmError};
    use std::sync::Mutex;

    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    enum Behaviour {
        Reply(&'static str),
        Stall(Duration),
        Fail,
    }

    struct ScriptedProvider {
        behaviour: Behaviour,
        seen: Mutex<Option<(Vec<ChatMessage>, CompletionOptions)>>,
    }

    impl ScriptedProvider {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-vision"
        }

        fn max_context_length(&self) -> usize {
            8192
        }

        async fn complete(&self, prompt: &str) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[ChatMessage::user(prompt)], None).await
        }

        async fn complete_with_options(
            &self,
            prompt: &str,
            options: &CompletionOptions,
        ) -> edgequake_llm::Result<LLMResponse> {
            self.chat(&[ChatMessage::user(prompt)], Some(options)).await
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            options: Option<&CompletionOptions>,
        ) -> edgequake_llm::Result<LLMResponse> {
            let options = options.cloned().unwrap_or_default();
            *self.seen.lock().unwrap() = Some((messages.to_vec(), options));
            match self.behaviour {
                Behaviour::Reply(text) => {
                    Ok(LLMResponse::new(text, "scripted-vision").with_usage(120, 30))
                }
                Behaviour::Stall(d) => {
                    tokio::time::sleep(d).await;
                    Ok(LLMResponse::new("{}", "scripted-vision"))
                }
                Behaviour::Fail => Err(LlmError::ApiError("model overloaded".into())),
            }
        }
    }

    fn provider_request() -> ExtractionRequest {
        let image = encode_bytes(GIF, "r.gif").unwrap();
        ExtractionRequest::build(image, &ExtractionConfig::default())
    }

    #[tokio::test]
    async fn provider_receives_instruction_image_and_parameters() {
        let provider = ScriptedProvider::new(Behaviour::Reply(r#"{"amount": "1"}"#));
        let transport =
            ProviderTransport::new(provider.clone(), "scripted/vision", Duration::from_secs(5));
        let request = provider_request();

        let reply = transport.send(&request).await.unwrap();
        assert_eq!(reply.text, r#"{"amount": "1"}"#);
        assert_eq!(reply.endpoint, "scripted/vision");
        assert_eq!(reply.input_tokens, Some(120));
        assert_eq!(reply.output_tokens, Some(30));

        let (messages, options) = provider.seen.lock().unwrap().take().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[0].content, request.instruction);
        assert_eq!(messages[1].role, ChatRole::User);
        assert_eq!(messages[1].content, request.user_text);
        let images = messages[1].images.as_ref().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/gif");

        assert_eq!(options.temperature, Some(0.0));
        assert_eq!(options.top_p, Some(0.1));
        assert_eq!(options.max_tokens, Some(1000));
    }

    #[tokio::test]
    async fn provider_top_p_can_be_left_unset() {
        let provider = ScriptedProvider::new(Behaviour::Reply("{}"));
        let transport = ProviderTransport::new(provider.clone(), "p", Duration::from_secs(5));
        let request = ExtractionRequest {
            top_p: None,
            ..provider_request()
        };
        transport.send(&request).await.unwrap();
        let (_, options) = provider.seen.lock().unwrap().take().unwrap();
        assert_eq!(options.top_p, None);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let provider = ScriptedProvider::new(Behaviour::Stall(Duration::from_secs(5)));
        let transport = ProviderTransport::new(provider, "p", Duration::from_millis(50));
        let err = transport.send(&provider_request()).await.unwrap_err();
        assert!(matches!(err, ReceiptError::Timeout { .. }), "{err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn provider_error_is_a_transport_error() {
        let provider = ScriptedProvider::new(Behaviour::Fail);
        let transport =
            ProviderTransport::new(provider, "scripted/vision", Duration::from_secs(5));
        match transport.send(&provider_request()).await.unwrap_err() {
            ReceiptError::Transport { endpoint, reason } => {
                assert_eq!(endpoint, "scripted/vision");
                assert!(reason.contains("model overloaded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn mock_provider_reply_passes_through() {
        let provider = edgequake_llm::MockProvider::new();
        provider.add_response(r#"{"trackingCode": "0054510188"}"#).await;
        let transport = ProviderTransport::new(Arc::new(provider), "mock", Duration::from_secs(5));
        let reply = transport.send(&provider_request()).await.unwrap();
        assert_eq!(reply.text, r#"{"trackingCode": "0054510188"}"#);
    }

    #[tokio::test]
    async fn unreadable_error_body_is_reported() {
        assert_eq!(error_body(Ok("quota exceeded".into())), "quota exceeded");

        // A body that declares more bytes than it sends fails mid-read.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\nshort")
                .await;
        });
        let response = reqwest::get(format!("http://{addr}/")).await.unwrap();
        let body = error_body(response.text().await);
        assert!(body.starts_with("<error body unreadable:"), "{body}");
    }
}
