use std::sync::Arc;
use std::time::Duration;

use assessment_core::{AssessmentError, AssessmentResult, PipelineResult, RunMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque text-completion call to the reasoning model.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> PipelineResult<String>;

    fn model_name(&self) -> String;
}

/// Fixed low temperature for reproducible verdicts.
const COMPLETION_TEMPERATURE: f64 = 0.3;
/// Generous ceiling so the model never truncates its JSON mid-object.
const COMPLETION_MAX_TOKENS: u32 = 20_000;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for an OpenAI-style chat-completions endpoint.
pub struct ChatCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    deadline: Duration,
}

impl ChatCompletionClient {
    pub fn new(base_url: String, api_key: String, model: String, deadline: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url,
            api_key,
            model,
            deadline,
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> PipelineResult<String> {
        if self.api_key.trim().is_empty() {
            return Err(AssessmentError::Configuration(
                "completion API key is not configured".to_string(),
            ));
        }

        let request = CompletionRequest {
            model: &self.model,
            messages: vec![CompletionMessage {
                role: "user",
                content: prompt,
            }],
            temperature: COMPLETION_TEMPERATURE,
            max_tokens: COMPLETION_MAX_TOKENS,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AssessmentError::Timeout(self.deadline)
                } else {
                    AssessmentError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AssessmentError::Transport(format!(
                "completion HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AssessmentError::Transport(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                AssessmentError::Transport("completion response had no choices".to_string())
            })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

/// Sends a rendered prompt to the reasoning model, extracts a JSON object
/// from its free-form reply, validates its shape, and enriches the result
/// with run metadata.
pub struct AssessmentClient {
    provider: Arc<dyn CompletionProvider>,
}

impl AssessmentClient {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    pub async fn assess(
        &self,
        prompt: &str,
        data_sources: &[String],
    ) -> PipelineResult<AssessmentResult> {
        let started = std::time::Instant::now();

        let text = self.provider.complete(prompt).await?;
        let value = extract_json(&text).ok_or(AssessmentError::NoStructuredOutput)?;
        let (score, analysis, reasoning, key_factors) = validate_verdict(&value)?;

        Ok(AssessmentResult {
            score,
            analysis,
            reasoning,
            key_factors,
            metadata: RunMetadata {
                model: self.provider.model_name(),
                data_sources: data_sources.to_vec(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

/// Extraction chain, stopping at the first step that parses:
/// 1. the interior of a fenced ```json block,
/// 2. the whole text,
/// 3. the substring between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(inner) = fenced_json_block(text) {
        if let Ok(value) = serde_json::from_str(inner) {
            return Some(value);
        }
    }

    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn fenced_json_block(text: &str) -> Option<&str> {
    let fence = text.find("```json")?;
    let body = &text[fence + "```json".len()..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Shape validation for the model's verdict. Every violation names the
/// offending field.
pub fn validate_verdict(value: &Value) -> PipelineResult<(i64, String, String, Vec<String>)> {
    let obj = value
        .as_object()
        .ok_or_else(|| AssessmentError::validation("score", "output is not a JSON object"))?;

    for field in ["score", "analysis", "reasoning", "key_factors"] {
        if !obj.contains_key(field) {
            return Err(AssessmentError::validation(field, "missing required field"));
        }
    }

    let score = obj["score"]
        .as_f64()
        .filter(|s| s.is_finite())
        .ok_or_else(|| AssessmentError::validation("score", "must be a finite number"))?;
    if !(1.0..=100.0).contains(&score) {
        return Err(AssessmentError::validation(
            "score",
            format!("must be within [1, 100], got {}", score),
        ));
    }

    let analysis = obj["analysis"]
        .as_str()
        .ok_or_else(|| AssessmentError::validation("analysis", "must be a string"))?
        .to_string();
    let reasoning = obj["reasoning"]
        .as_str()
        .ok_or_else(|| AssessmentError::validation("reasoning", "must be a string"))?
        .to_string();

    let key_factors = obj["key_factors"]
        .as_array()
        .ok_or_else(|| AssessmentError::validation("key_factors", "must be an array"))?
        .iter()
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .collect();

    Ok((score.round() as i64, analysis, reasoning, key_factors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VERDICT: &str =
        r#"{"score": 73, "analysis": "a", "reasoning": "b", "key_factors": ["x"]}"#;

    #[test]
    fn extracts_fenced_json_with_surrounding_prose() {
        let text = format!(
            "Here is my assessment of the market.\n```json\n{}\n```\nLet me know if you need more.",
            VERDICT
        );
        let value = extract_json(&text).unwrap();
        assert_eq!(value, extract_json(VERDICT).unwrap());
        assert_eq!(value["score"], 73);
    }

    #[test]
    fn extracts_whole_text_as_json() {
        let value = extract_json(VERDICT).unwrap();
        assert_eq!(value["analysis"], "a");
    }

    #[test]
    fn extracts_by_brace_slicing_with_trailing_prose() {
        let text = format!("The verdict follows. {} Hope this helps!", VERDICT);
        let value = extract_json(&text).unwrap();
        assert_eq!(value["score"], 73);
    }

    #[test]
    fn prose_without_json_extracts_nothing() {
        assert!(extract_json("The market is probably fine, no numbers today.").is_none());
        assert!(extract_json("").is_none());
    }

    #[test]
    fn score_outside_range_fails_validation() {
        for score in [101, 0, -5, 1000] {
            let value = json!({
                "score": score, "analysis": "a", "reasoning": "b", "key_factors": []
            });
            let err = validate_verdict(&value).unwrap_err();
            match err {
                AssessmentError::Validation { field, .. } => assert_eq!(field, "score"),
                other => panic!("expected validation error, got {:?}", other),
            }
        }
    }

    #[test]
    fn boundary_scores_pass_range_but_other_fields_still_required() {
        for score in [1, 100] {
            let value = json!({"score": score});
            let err = validate_verdict(&value).unwrap_err();
            match err {
                AssessmentError::Validation { field, .. } => {
                    assert_ne!(field, "score", "range check should pass for {}", score)
                }
                other => panic!("expected validation error, got {:?}", other),
            }

            let full = json!({
                "score": score, "analysis": "a", "reasoning": "b", "key_factors": ["k"]
            });
            let (parsed, ..) = validate_verdict(&full).unwrap();
            assert_eq!(parsed, score);
        }
    }

    #[test]
    fn non_finite_or_missing_score_names_score_field() {
        let missing = json!({"analysis": "a", "reasoning": "b", "key_factors": []});
        match validate_verdict(&missing).unwrap_err() {
            AssessmentError::Validation { field, .. } => assert_eq!(field, "score"),
            other => panic!("expected validation error, got {:?}", other),
        }

        let not_number = json!({
            "score": "high", "analysis": "a", "reasoning": "b", "key_factors": []
        });
        match validate_verdict(&not_number).unwrap_err() {
            AssessmentError::Validation { field, .. } => assert_eq!(field, "score"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn key_factors_must_be_an_array() {
        let value = json!({
            "score": 50, "analysis": "a", "reasoning": "b", "key_factors": "pi_cycle"
        });
        match validate_verdict(&value).unwrap_err() {
            AssessmentError::Validation { field, .. } => assert_eq!(field, "key_factors"),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
