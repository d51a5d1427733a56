//! Extraction request construction.
//!
//! [`ExtractionRequest`] is transport-neutral: instruction text, user text,
//! the encoded image and generation parameters. Each wire dialect renders its
//! own JSON body from it, so adding a relay or dialect never touches prompt
//! logic.

use crate::config::{ExtractionConfig, WireFormat};
use crate::pipeline::encode::EncodedImage;
use crate::prompts::{build_instruction, DEFAULT_USER_PROMPT};
use serde_json::{json, Value};

/// A fully composed extraction request.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub model: String,
    pub instruction: String,
    pub user_text: String,
    pub image: EncodedImage,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub max_tokens: usize,
}

impl ExtractionRequest {
    /// Compose a request for `image` from `config`.
    pub fn build(image: EncodedImage, config: &ExtractionConfig) -> Self {
        let instruction = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| build_instruction(&config.schema));
        let user_text = config
            .user_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_PROMPT.to_string());

        Self {
            model: config.model.clone(),
            instruction,
            user_text,
            image,
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }

    /// Render the JSON body for `wire`.
    pub fn to_body(&self, wire: WireFormat) -> Value {
        match wire {
            WireFormat::OpenAiChat => self.openai_body(),
            WireFormat::GeminiGenerateContent => self.gemini_body(),
        }
    }

    fn openai_body(&self) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.instruction },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": self.user_text },
                        {
                            "type": "image_url",
                            "image_url": { "url": self.image.data_uri(), "detail": "high" }
                        }
                    ]
                }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(p) = self.top_p {
            body["top_p"] = json!(p);
        }
        body
    }

    fn gemini_body(&self) -> Value {
        let mut generation = json!({
            "temperature": self.temperature,
            "maxOutputTokens": self.max_tokens,
        });
        if let Some(p) = self.top_p {
            generation["topP"] = json!(p);
        }
        json!({
            "systemInstruction": { "parts": [ { "text": self.instruction } ] },
            "contents": [
                {
                    "role": "user",
                    "parts": [
                        { "text": self.user_text },
                        {
                            "inline_data": {
                                "mime_type": self.image.media_type(),
                                "data": self.image.base64()
                            }
                        }
                    ]
                }
            ],
            "generationConfig": generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::encode_bytes;

    // Smallest well-formed GIF header is enough for format sniffing.
    const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

    fn request() -> ExtractionRequest {
        let image = encode_bytes(GIF, "t.gif").unwrap();
        ExtractionRequest::build(image, &ExtractionConfig::default())
    }

    #[test]
    fn openai_body_shape() {
        let body = request().to_body(WireFormat::OpenAiChat);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["role"], "system");
        let url = body["messages"][1]["content"][1]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/gif;base64,"));
        assert_eq!(
            body["messages"][1]["content"][0]["text"],
            DEFAULT_USER_PROMPT
        );
    }

    #[test]
    fn gemini_body_uses_bare_payload() {
        let req = request();
        let body = req.to_body(WireFormat::GeminiGenerateContent);
        let inline = &body["contents"][0]["parts"][1]["inline_data"];
        assert_eq!(inline["mime_type"], "image/gif");
        assert_eq!(inline["data"], req.image.base64());
        assert!(!inline["data"].as_str().unwrap().starts_with("data:"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[test]
    fn custom_prompts_override_template() {
        let image = encode_bytes(GIF, "t.gif").unwrap();
        let config = ExtractionConfig::builder()
            .system_prompt("only amount")
            .user_prompt("go")
            .top_p(None)
            .build()
            .unwrap();
        let req = ExtractionRequest::build(image, &config);
        assert_eq!(req.instruction, "only amount");
        let body = req.to_body(WireFormat::OpenAiChat);
        assert!(body.get("top_p").is_none());
        assert_eq!(body["messages"][1]["content"][0]["text"], "go");
    }
}
