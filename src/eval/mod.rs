//! Answer scoring through an OpenAI-compatible chat completion API.
//!
//! One answer is scored on three fixed dimensions, each returning a score
//! and a short rationale in a JSON object keyed by the Chinese dimension
//! names. [`EvalClient`] owns the HTTP side: endpoint construction, bearer
//! auth, the retry policy for rate limits and transport faults, and
//! decoding the (possibly fenced) JSON out of the model reply.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EvalError;
use crate::input::ConversationTurn;
use crate::utils::backoff_delay;
use crate::utils::json_extraction::extract_json_object;

/// Environment variable holding the API base URL.
pub const ENV_API_BASE: &str = "LLM_API_BASE";
/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "LLM_API_KEY";
/// Environment variable holding the model identifier.
pub const ENV_MODEL: &str = "LLM_MODEL";

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Score and rationale for one dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionScore {
    #[serde(rename = "分数")]
    pub score: u32,
    #[serde(rename = "理由")]
    pub rationale: String,
}

/// Full three-dimension verdict for one answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    #[serde(rename = "最终准确率")]
    pub accuracy: DimensionScore,
    #[serde(rename = "专业度")]
    pub professionalism: DimensionScore,
    #[serde(rename = "语气合理")]
    pub tone: DimensionScore,
}

/// Render the scoring prompt for one question/answer pair.
///
/// When a conversation prefix is supplied it is rendered as a numbered
/// history block, and the accuracy criterion additionally asks the judge
/// to weigh coherence with that history.
pub fn build_eval_prompt(
    question: &str,
    answer: &str,
    context: Option<&[ConversationTurn]>,
) -> String {
    let mut history = String::new();
    if let Some(turns) = context.filter(|t| !t.is_empty()) {
        history.push_str("\n对话历史:\n");
        for (i, turn) in turns.iter().enumerate() {
            history.push_str(&format!(
                "{}. {}: {}\n",
                i + 1,
                turn.role.display_name(),
                turn.content
            ));
        }
        history.push('\n');
    }

    let coherence_note = if history.is_empty() {
        ""
    } else {
        "考虑上下文连贯性，但不需要评判对话历史用assistant的回复"
    };

    format!(
        r#"你是一个专业的AI评估专家，现在需要评估苏州科技馆数字人助手趣波（QuBoo）的回复质量。

背景：趣波是苏州科技馆的AI智能助手，专门为游客提供科技馆参观、票务、展厅、活动等相关信息和服务，帮助游客获得优质的科技体验。

对话历史: {history}
用户问题: {question}
助手回复: {answer}

请从以下三个角度评估回复质量：

1. 最终准确率：回复内容是否准确回答了用户问题，是否解决了用户的查询需求，是否与科技馆业务目标高度贴合。{coherence_note} 评分1-100分。

2. 专业度：用词是否精准、术语是否正确、业务上下文是否符合科技馆场景的专业水准。评分1-100分。

3. 语气合理：语气是否礼貌友好、风格是否匹配科技馆数字助手场景（亲切、引导性、专业但不生硬）。评分1-100分。

请以JSON格式输出评估结果：
{{
  "最终准确率": {{"分数": 数字, "理由": "简要说明"}},
  "专业度": {{"分数": 数字, "理由": "简要说明"}},
  "语气合理": {{"分数": 数字, "理由": "简要说明"}}
}}"#
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Client for the scoring endpoint.
pub struct EvalClient {
    api_base: String,
    api_key: String,
    model: String,
    http: reqwest::Client,
}

impl EvalClient {
    /// Build a client from `LLM_API_BASE`, `LLM_API_KEY` and `LLM_MODEL`.
    ///
    /// Missing variables are fatal; the caller is expected to fail the run
    /// before dispatching any work.
    pub fn from_env() -> Result<Self, EvalError> {
        let api_base = std::env::var(ENV_API_BASE).map_err(|_| EvalError::MissingApiBase)?;
        let api_key = std::env::var(ENV_API_KEY).map_err(|_| EvalError::MissingApiKey)?;
        let model = std::env::var(ENV_MODEL).map_err(|_| EvalError::MissingModel)?;
        Ok(Self::with_config(api_base, api_key, model))
    }

    pub fn with_config(api_base: String, api_key: String, model: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_base,
            api_key,
            model,
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Score one answer, retrying rate limits and transport faults with
    /// exponential backoff. Non-429 API errors and malformed replies are
    /// returned without retry.
    pub async fn score(&self, prompt: &str) -> Result<Evaluation, EvalError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.1,
        };

        let mut last: Option<EvalError> = None;

        for attempt in 0..MAX_RETRIES {
            let response = self
                .http
                .post(self.completions_url())
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            let err = match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: ChatResponse = resp
                        .json()
                        .await
                        .map_err(|e| EvalError::MalformedResponse(e.to_string()))?;
                    return decode_evaluation(&body);
                }
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let detail = resp.text().await.unwrap_or_default();
                    EvalError::RateLimited(detail)
                }
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(EvalError::Status { code, body });
                }
                Err(e) => EvalError::Transport(e.to_string()),
            };

            if attempt + 1 < MAX_RETRIES {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "Transient scoring failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            last = Some(err);
        }

        Err(match last {
            Some(EvalError::RateLimited(_)) => EvalError::RateLimitExhausted {
                attempts: MAX_RETRIES,
            },
            Some(err) => EvalError::TransportExhausted {
                attempts: MAX_RETRIES,
                last: err.to_string(),
            },
            None => EvalError::TransportExhausted {
                attempts: MAX_RETRIES,
                last: "no attempts were made".to_string(),
            },
        })
    }
}

fn decode_evaluation(body: &ChatResponse) -> Result<Evaluation, EvalError> {
    let content = body
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .ok_or_else(|| EvalError::MalformedResponse("response had no choices".to_string()))?;

    let json = extract_json_object(content).ok_or_else(|| {
        EvalError::MalformedResponse("no JSON object found in model reply".to_string())
    })?;

    let evaluation: Evaluation =
        serde_json::from_str(&json).map_err(|e| EvalError::MalformedResponse(e.to_string()))?;

    for (name, dimension) in [
        ("最终准确率", &evaluation.accuracy),
        ("专业度", &evaluation.professionalism),
        ("语气合理", &evaluation.tone),
    ] {
        if !(1..=100).contains(&dimension.score) {
            return Err(EvalError::MalformedResponse(format!(
                "{name} score {} outside 1-100",
                dimension.score
            )));
        }
    }

    Ok(evaluation)
}
