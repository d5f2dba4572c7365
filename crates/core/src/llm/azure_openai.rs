use crate::config::Settings;
use crate::error::{ReviewError, Service};
use crate::llm::json;
use crate::llm::usage::TokenUsage;
use crate::llm::{GenerateInput, Generation, LlmClient};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    max_tokens: u32,
}

impl AzureOpenAiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let endpoint = settings.require_azure_openai_endpoint()?.to_string();
        let api_key = settings.require_azure_openai_api_key()?.to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.azure_openai_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            endpoint,
            api_key,
            deployment: settings.azure_openai_deployment.clone(),
            api_version: settings.azure_openai_api_version.clone(),
            max_tokens: settings.azure_openai_max_tokens,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint.trim_end_matches('/'),
            self.deployment
        )
    }

    async fn chat_completion(
        &self,
        req: &ChatCompletionRequest,
    ) -> anyhow::Result<ChatCompletionResponse> {
        let api_key = HeaderValue::from_str(&self.api_key).map_err(|_| {
            ReviewError::configuration("AZURE_OPENAI_API_KEY is not a valid header value")
        })?;
        let mut headers = HeaderMap::new();
        headers.insert("api-key", api_key);

        let res = self
            .http
            .post(self.url())
            .query(&[("api-version", self.api_version.as_str())])
            .headers(headers)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                let detail = if e.is_timeout() {
                    format!("request timed out: {e}")
                } else {
                    format!("request failed: {e}")
                };
                ReviewError::external(Service::Model, "http", detail)
            })?;

        let status = res.status();
        let text = res.text().await.map_err(|e| {
            ReviewError::external(
                Service::Model,
                "http",
                format!("failed to read response body: {e}"),
            )
        })?;
        if !status.is_success() {
            return Err(ReviewError::external(Service::Model, "http", format!("status={status}"))
                .with_raw_output(text)
                .into());
        }

        serde_json::from_str::<ChatCompletionResponse>(&text).map_err(|e| {
            let detail = format!("unexpected response shape: {e}");
            ReviewError::external(Service::Model, "decode", detail)
                .with_raw_output(text)
                .into()
        })
    }

    fn system_prompt() -> String {
        [
            "You are an investment portfolio reviewer.",
            "Return ONLY one valid JSON object. No markdown, no prose, no comments, no trailing commas.",
            "Output schema:",
            "{",
            "  \"recommendations\": {",
            "    \"buy\": [ { \"symbol\": \"...\", \"company\": \"...\", \"reason\": \"...\" } ],",
            "    \"sell\": [ { \"symbol\": \"...\", \"company\": \"...\", \"reason\": \"...\" } ],",
            "    \"hold\": [ { \"symbol\": \"...\", \"company\": \"...\", \"reason\": \"...\" } ],",
            "    \"buy-new\": [ { \"symbol\": \"...\", \"company\": \"...\", \"reason\": \"...\" } ]",
            "  },",
            "  \"analysis\": [ { \"symbol\": \"...\", \"company\": \"...\", \"highlights\": [\"...\", \"...\"] } ],",
            "  \"notes\": \"overall sentiment or alerts\"",
            "}",
            "Rules:",
            "- every portfolio symbol appears exactly once across buy, sell and hold",
            "- buy-new lists only symbols that are NOT in the portfolio",
            "- analysis has one entry per portfolio symbol",
            "- each reason and highlight is one short sentence",
        ]
        .join("\n")
    }

    fn user_prompt(input: &GenerateInput) -> String {
        format!(
            "Today is {}.\n\
Review the portfolio below and recommend buy, sell or hold for every holding.\n\
Also suggest {} new symbols to buy (buy-new). Focus: {}.\n\n\
Portfolio (TSV):\n{}",
            input.as_of_date,
            input.new_ideas,
            input.focus,
            input.portfolio_tsv()
        )
    }
}

#[async_trait::async_trait]
impl LlmClient for AzureOpenAiClient {
    fn provider(&self) -> &'static str {
        "azure_openai"
    }

    async fn generate_review(&self, input: GenerateInput) -> anyhow::Result<Generation> {
        let req = ChatCompletionRequest {
            messages: vec![
                Message {
                    role: "system",
                    content: Self::system_prompt(),
                },
                Message {
                    role: "user",
                    content: Self::user_prompt(&input),
                },
            ],
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };

        let res = self.chat_completion(&req).await?;
        let usage = res.usage.unwrap_or_default();

        let Some(choice) = res.choices.into_iter().next() else {
            return Err(
                ReviewError::external(Service::Model, "decode", "response has no choices").into(),
            );
        };
        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                max_tokens = self.max_tokens,
                completion_tokens = usage.completion_tokens,
                "model stopped at max_tokens; output is likely truncated"
            );
        }
        let text = choice.message.content.unwrap_or_default();

        let review = json::parse_review(&text, &input.portfolio).map_err(|e| {
            ReviewError::external(Service::Model, "parse", format!("{e:#}"))
                .with_raw_output(text.clone())
        })?;

        tracing::info!(
            provider = self.provider(),
            deployment = %self.deployment,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            recommendations = review.recommendations.len(),
            new_ideas = review.new_ideas.len(),
            "model review generated"
        );

        Ok(Generation { review, usage })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
