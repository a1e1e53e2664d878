use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use snapsight_contracts::intake::UploadedImage;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::error::{truncate_text, GatewayError};
use crate::intake::read_image;

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant that analyzes images and provides detailed insights.";
pub const DEFAULT_INSTRUCTION: &str = "Please analyze these images and provide insights.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// One chat-completions request: a system message, then a user message
/// whose first part is the instruction and whose remaining parts are the
/// images in session order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

impl ChatCompletionRequest {
    pub fn image_count(&self) -> usize {
        self.messages
            .iter()
            .filter_map(|message| match &message.content {
                MessageContent::Parts(parts) => Some(parts),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .filter(|part| matches!(part, ContentPart::ImageUrl { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

/// Text of the first completion choice plus whatever usage the provider reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub fn effective_instruction(instruction: &str) -> &str {
    let trimmed = instruction.trim();
    if trimmed.is_empty() {
        DEFAULT_INSTRUCTION
    } else {
        instruction
    }
}

/// Reads and base64-encodes one image as a `data:` URL.
pub fn image_data_url(image: &UploadedImage) -> Result<String, GatewayError> {
    let bytes = read_image(image).map_err(|source| GatewayError::Encoding {
        name: image.name().to_string(),
        source,
    })?;
    let encoded = BASE64.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", image.mime()))
}

/// Builds the request, encoding every image. Any failed read fails the whole build.
pub fn build_request(
    model: &str,
    max_tokens: u32,
    images: &[UploadedImage],
    instruction: &str,
) -> Result<ChatCompletionRequest, GatewayError> {
    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::Text {
        text: effective_instruction(instruction).to_string(),
    });
    for image in images {
        parts.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image_data_url(image)?,
            },
        });
    }
    Ok(ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: Role::System,
                content: MessageContent::Text(SYSTEM_INSTRUCTION.to_string()),
            },
            ChatMessage {
                role: Role::User,
                content: MessageContent::Parts(parts),
            },
        ],
        max_tokens,
    })
}

fn analysis_from_body(body: &str, requested_model: &str) -> Result<Analysis, GatewayError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|err| {
        GatewayError::InvalidResponse(format!("{err}: {}", truncate_text(body.trim(), 200)))
    })?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(GatewayError::EmptyResponse)?;
    let usage = parsed.usage.unwrap_or_default();
    Ok(Analysis {
        text,
        model: parsed
            .model
            .unwrap_or_else(|| requested_model.to_string()),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    })
}

pub trait AnalysisGateway: Send + Sync {
    fn name(&self) -> &str;
    fn analyze(
        &self,
        model: &str,
        images: &[UploadedImage],
        instruction: &str,
    ) -> Result<Analysis, GatewayError>;
}

#[derive(Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Box<dyn AnalysisGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: AnalysisGateway + 'static>(&mut self, gateway: G) {
        self.gateways
            .insert(gateway.name().to_string(), Box::new(gateway));
    }

    pub fn get(&self, name: &str) -> Option<&dyn AnalysisGateway> {
        self.gateways.get(name).map(|gateway| gateway.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }

    /// Hands out ownership of one gateway, dropping the rest.
    pub fn into_gateway(mut self, name: &str) -> Option<Box<dyn AnalysisGateway>> {
        self.gateways.remove(name)
    }
}

pub fn default_gateway_registry(config: &GatewayConfig) -> Result<GatewayRegistry, GatewayError> {
    let mut registry = GatewayRegistry::new();
    registry.register(DryrunGateway);
    registry.register(OpenAiGateway::new(config)?);
    Ok(registry)
}

/// Offline gateway. Encodes the images like the real one, then describes
/// what it would have sent.
pub struct DryrunGateway;

impl AnalysisGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn analyze(
        &self,
        model: &str,
        images: &[UploadedImage],
        instruction: &str,
    ) -> Result<Analysis, GatewayError> {
        let request = build_request(model, 0, images, instruction)?;
        let names = images
            .iter()
            .map(UploadedImage::name)
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            "[dryrun] {} image(s) for {model}: {names}\nInstruction: {}",
            request.image_count(),
            effective_instruction(instruction).trim()
        );
        Ok(Analysis {
            text,
            model: model.to_string(),
            input_tokens: None,
            output_tokens: None,
        })
    }
}

pub struct OpenAiGateway {
    api_base: String,
    api_key: Option<SecretString>,
    max_tokens: u32,
    http: HttpClient,
}

impl OpenAiGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            http,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

impl AnalysisGateway for OpenAiGateway {
    fn name(&self) -> &str {
        "openai"
    }

    fn analyze(
        &self,
        model: &str,
        images: &[UploadedImage],
        instruction: &str,
    ) -> Result<Analysis, GatewayError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(GatewayError::MissingCredential)?;
        let request = build_request(model, self.max_tokens, images, instruction)?;
        let endpoint = self.endpoint();
        debug!(
            %endpoint,
            model,
            images = request.image_count(),
            max_tokens = request.max_tokens,
            "sending chat completion"
        );

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .json(&request)
            .send()?;
        let status = response.status();
        let body = response.text()?;
        debug!(status = status.as_u16(), bytes = body.len(), "chat completion returned");
        if !status.is_success() {
            return Err(GatewayError::from_status(status.as_u16(), &body));
        }
        analysis_from_body(&body, model)
    }
}
