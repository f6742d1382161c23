use crate::config::LlmConfig;
use crate::error::ApiError;
use crate::models::Analysis;
use serde::Deserialize;
use serde_json::json;

/// Client for the LLM messages API. Reply generation and analysis are
/// best-effort integrations; any provider failure maps to an upstream error
/// and never touches email state.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

pub struct GeneratedReply {
    pub text: String,
    pub tokens_used: u64,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    output_tokens: u64,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_reply(
        &self,
        original_message: &str,
        context: &str,
        tone: &str,
        signature: &str,
    ) -> Result<GeneratedReply, ApiError> {
        let prompt = format!(
            "You are an assistant generating email replies. Write a polite, \
             concise reply to the following message.\n\n\
             Original Message:\n\"{original_message}\"\n\n\
             Additional Context: {context}\n\nTone: {tone}\n\n\
             User's Signature: {signature}\n\n\
             Generate only the email body content, no subject line, no \
             placeholder text."
        );

        let response = self.complete(&prompt, self.max_tokens).await?;
        Ok(GeneratedReply {
            text: response
                .content
                .first()
                .map(|block| block.text.trim().to_string())
                .unwrap_or_default(),
            tokens_used: response.usage.map(|u| u.output_tokens).unwrap_or(0),
        })
    }

    pub async fn analyze(&self, content: &str) -> Result<(Analysis, u64), ApiError> {
        let prompt = format!(
            "Analyze the following email. Respond with JSON only:\n\
             {{\"sentiment\": \"positive|neutral|negative\", \
             \"urgency\": \"low|medium|high\", \
             \"keywords\": [\"up to five keywords\"], \
             \"summary\": \"one or two sentences\"}}\n\n\
             Email content:\n\"{content}\""
        );

        let response = self.complete(&prompt, 500).await?;
        let text = response
            .content
            .first()
            .map(|block| block.text.trim().to_string())
            .unwrap_or_default();
        let tokens = response.usage.map(|u| u.output_tokens).unwrap_or(0);
        Ok((parse_analysis(&text), tokens))
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<MessagesResponse, ApiError> {
        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": max_tokens,
                "messages": [{ "role": "user", "content": prompt }],
            }))
            .send()
            .await
            .map_err(|err| ApiError::Upstream(format!("LLM request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "LLM API returned an error");
            return Err(ApiError::Upstream(format!(
                "LLM API returned status {status}"
            )));
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|err| ApiError::Upstream(format!("invalid LLM response: {err}")))
    }
}

/// Extracts the JSON object from the model's answer; a model that ignores
/// the format yields the neutral fallback rather than an error.
fn parse_analysis(text: &str) -> Analysis {
    let candidate = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };
    serde_json::from_str(candidate).unwrap_or_else(|_| Analysis {
        sentiment: "neutral".to_string(),
        urgency: "medium".to_string(),
        keywords: Vec::new(),
        summary: "Unable to analyze email content".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = "Here is the analysis:\n{\"sentiment\": \"positive\", \
                    \"urgency\": \"low\", \"keywords\": [\"invoice\"], \
                    \"summary\": \"Payment confirmation.\"}\nHope that helps.";
        let analysis = parse_analysis(text);
        assert_eq!(analysis.sentiment, "positive");
        assert_eq!(analysis.keywords, vec!["invoice".to_string()]);
    }

    #[test]
    fn malformed_answers_fall_back_to_neutral() {
        let analysis = parse_analysis("I cannot do that.");
        assert_eq!(analysis.sentiment, "neutral");
        assert_eq!(analysis.urgency, "medium");
        assert!(analysis.keywords.is_empty());
    }
}
