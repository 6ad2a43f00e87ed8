use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub prompt: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage>;
}

#[derive(Debug, Clone)]
pub struct OpenAiImageGenerator {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/images/generations")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call image generation API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("image generation API error {status}: {body}");
        }

        let json: Value = response
            .json()
            .await
            .context("failed to decode image generation response JSON")?;

        let bytes = decode_first_image(&json)?;
        Ok(GeneratedImage {
            prompt: prompt.to_string(),
            mime_type: "image/png".to_string(),
            bytes,
        })
    }
}

fn decode_first_image(root: &Value) -> Result<Vec<u8>> {
    let encoded = root
        .pointer("/data/0/b64_json")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            let reason = root
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("response carried no image data");
            anyhow!("image generation failed: {reason}")
        })?;
    general_purpose::STANDARD
        .decode(encoded)
        .context("image payload is not valid base64")
}

/// Offline generator that returns a tiny fixed PNG, so the composer flow can run
/// without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderImageGenerator;

const PLACEHOLDER_PNG: &str = concat!(
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJ",
    "RU5ErkJggg=="
);

#[async_trait]
impl ImageGenerator for PlaceholderImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage> {
        let bytes = general_purpose::STANDARD
            .decode(PLACEHOLDER_PNG)
            .context("placeholder image is not valid base64")?;
        Ok(GeneratedImage {
            prompt: prompt.to_string(),
            mime_type: "image/png".to_string(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageGenerator, PlaceholderImageGenerator, decode_first_image};
    use serde_json::json;

    #[test]
    fn decodes_b64_payload() {
        let value = json!({"data": [{"b64_json": "aGVsbG8="}]});
        assert_eq!(decode_first_image(&value).expect("decode"), b"hello".to_vec());
    }

    #[test]
    fn surfaces_api_error_message() {
        let value = json!({"error": {"message": "content policy"}});
        let err = decode_first_image(&value).expect_err("no data");
        assert!(err.to_string().contains("content policy"));
    }

    #[tokio::test]
    async fn placeholder_returns_png() {
        let image = PlaceholderImageGenerator.generate("a cat").await.expect("generate");
        assert!(image.bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        assert_eq!(image.prompt, "a cat");
    }
}
