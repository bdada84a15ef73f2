//! Chat-completions planner.
//!
//! Implements [`ActionPlanner`] against any OpenAI-compatible endpoint:
//! - bounded retry with exponential backoff on 408/429/5xx and network errors
//! - 401/403 surface immediately as [`PlannerError::Auth`] with a config hint
//! - page screenshots are sent inline as base64 data URLs
//!
//! # Configuration
//!
//! - `STEP_REPLAY_PLANNER_ENDPOINT`: chat completions URL
//! - `STEP_REPLAY_PLANNER_MODEL`: model name
//! - `STEP_REPLAY_PLANNER_API_KEY` (or `OPENAI_API_KEY`): bearer token
//! - `STEP_REPLAY_PLANNER_MAX_RETRIES`: retries after the first attempt

use async_trait::async_trait;
use base64::Engine;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::codec::{PlannerOutput, normalize_planner_output};
use crate::config::{ENV_PLANNER_API_KEY, PlannerSettings};
use crate::driver::{ActionPlanner, BrowserDriver, ObservedMatch, PageState, PlannerError};
use crate::engine::execute_action;

pub const BASE_BACKOFF_MS: u64 = 200;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP {status} from planner endpoint. {hint}")]
    Auth { status: u16, hint: String },

    #[error("planner endpoint failed after {attempts} attempt(s): {reason}")]
    Unavailable { attempts: usize, reason: String },

    #[error("invalid planner response: {0}")]
    InvalidResponse(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<ProviderError> for PlannerError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Auth { status, hint } => PlannerError::Auth { status, hint },
            ProviderError::Unavailable { attempts, reason } => {
                PlannerError::Unavailable { attempts, reason }
            }
            ProviderError::InvalidResponse(msg) => PlannerError::Malformed(msg),
            ProviderError::Client(e) => PlannerError::Unavailable {
                attempts: 0,
                reason: e.to_string(),
            },
        }
    }
}

pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

pub fn next_backoff_ms(attempt: usize) -> u64 {
    BASE_BACKOFF_MS.saturating_mul(1_u64 << attempt.min(6))
}

fn is_retryable_http_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

const ACTION_SYSTEM_PROMPT: &str = "You drive a web browser for an automated test. \
Reply with JSON only: an array of actions, each {\"selector\": string, \"method\": \
\"click\"|\"fill\"|\"type\"|\"select\"|\"check\"|\"uncheck\"|\"hover\"|\"press\", \
\"arguments\": [string], \"description\": string}. Use selectors from the page outline. \
Reply [] if the instruction cannot be performed on this page.";

const OBSERVE_SYSTEM_PROMPT: &str = "You locate elements on a web page. Reply with JSON \
only: an array of {\"selector\": string, \"description\": string} for every element \
in the page outline matching the query. Reply [] when nothing matches.";

const ASSERTION_SYSTEM_PROMPT: &str = "You write checks for automated browser tests. \
Reply with a single JSON object and nothing else.";

/// Planner backed by an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct ChatPlanner {
    client: reqwest::Client,
    settings: PlannerSettings,
}

impl ChatPlanner {
    pub fn new(settings: PlannerSettings) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout.max(Duration::from_millis(1)))
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    /// Send one chat request with retry and return the reply text
    pub async fn complete(&self, system: &str, user: &str, page: &PageState) -> ProviderResult<String> {
        let body = json!({
            "model": self.settings.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user_content(user, page)},
            ],
        });

        let max_retries = self.settings.max_retries;
        let mut attempt = 0;
        loop {
            let mut request = self.client.post(&self.settings.endpoint).json(&body);
            if let Some(key) = &self.settings.api_key {
                request = request.bearer_auth(key.trim());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        let raw = response.text().await.map_err(|e| {
                            ProviderError::InvalidResponse(format!("failed to read body: {}", e))
                        })?;
                        return parse_chat_response(&raw);
                    }

                    if status == 401 || status == 403 {
                        return Err(ProviderError::Auth {
                            status,
                            hint: auth_hint(&self.settings),
                        });
                    }

                    let raw = response.text().await.unwrap_or_default();
                    if attempt < max_retries && should_retry_status(status) {
                        let backoff = next_backoff_ms(attempt);
                        tracing::warn!(
                            "planner returned HTTP {}, retrying in {}ms ({}/{})",
                            status,
                            backoff,
                            attempt + 1,
                            max_retries
                        );
                        sleep(Duration::from_millis(backoff)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Unavailable {
                        attempts: attempt + 1,
                        reason: format!("HTTP {}: {}", status, truncate(&raw, 200)),
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff = next_backoff_ms(attempt);
                        tracing::warn!("planner request failed ({}), retrying in {}ms", error, backoff);
                        sleep(Duration::from_millis(backoff)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Unavailable {
                        attempts: attempt + 1,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl ActionPlanner for ChatPlanner {
    async fn plan(&self, instruction: &str, page: &PageState) -> Result<Value, PlannerError> {
        let reply = self
            .complete(ACTION_SYSTEM_PROMPT, &format!("Instruction: {}", instruction), page)
            .await?;
        // Unparseable replies stay opaque so the step can fall back
        Ok(parse_reply_json(&reply).unwrap_or(Value::String(reply)))
    }

    async fn act(
        &self,
        instruction: &str,
        page: &PageState,
        driver: &dyn BrowserDriver,
    ) -> Result<Value, PlannerError> {
        let prompt = format!(
            "Instruction: {}\nThe previous attempt produced nothing usable. \
             Propose the most direct actions that perform it.",
            instruction
        );
        let reply = self.complete(ACTION_SYSTEM_PROMPT, &prompt, page).await?;
        let raw = parse_reply_json(&reply).unwrap_or(Value::Null);
        let actions = match normalize_planner_output(&raw) {
            PlannerOutput::Actions(actions) if !actions.is_empty() => actions,
            _ => {
                return Ok(json!({
                    "success": false,
                    "message": format!("model proposed no actions for '{}'", instruction),
                    "actions": [],
                }));
            }
        };

        let mut performed = Vec::new();
        for action in &actions {
            if let Err(e) = execute_action(driver, action).await {
                return Ok(json!({
                    "success": false,
                    "message": format!("{} failed: {}", action.summary(), e),
                    "actions": performed,
                }));
            }
            performed.push(action.clone());
        }
        Ok(json!({
            "success": true,
            "message": format!("performed {} action(s)", performed.len()),
            "actionDescription": instruction,
            "actions": performed,
        }))
    }

    async fn observe(&self, query: &str, page: &PageState) -> Result<Vec<ObservedMatch>, PlannerError> {
        let reply = self
            .complete(OBSERVE_SYSTEM_PROMPT, &format!("Query: {}", query), page)
            .await?;
        let raw = parse_reply_json(&reply)
            .ok_or_else(|| PlannerError::Malformed("observe reply is not JSON".to_string()))?;
        let items = match raw {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("matches").or_else(|| map.remove("elements")) {
                Some(Value::Array(items)) => items,
                _ => return Err(PlannerError::Malformed("observe reply has no matches".to_string())),
            },
            _ => return Err(PlannerError::Malformed("observe reply has no matches".to_string())),
        };
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<ObservedMatch>(item).ok())
            .filter(|m| !m.selector.trim().is_empty())
            .collect())
    }

    async fn plan_assertions(&self, prompt: &str, page: &PageState) -> Result<String, PlannerError> {
        Ok(self.complete(ASSERTION_SYSTEM_PROMPT, prompt, page).await?)
    }
}

fn user_content(text: &str, page: &PageState) -> Value {
    let text = format!(
        "{}\n\nURL: {}\nTitle: {}\nPage outline:\n{}",
        text, page.url, page.title, page.outline
    );
    match &page.screenshot {
        Some(png) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(png);
            json!([
                {"type": "text", "text": text},
                {"type": "image_url", "image_url": {"url": format!("data:image/png;base64,{}", encoded)}},
            ])
        }
        None => Value::String(text),
    }
}

/// Reply text from `choices[0].message`, falling back to `reasoning_content`
/// for thinking models
fn parse_chat_response(raw: &str) -> ProviderResult<String> {
    let response: Value = serde_json::from_str(raw)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    let message = &response["choices"][0]["message"];
    ["content", "reasoning_content"]
        .iter()
        .filter_map(|key| message[*key].as_str())
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse("reply has no content".to_string()))
}

/// Parse a model reply as JSON, tolerating code fences and surrounding prose
fn parse_reply_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find(['[', '{'])?;
    let close = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    let end = trimmed.rfind(close)?;
    (end > start)
        .then(|| serde_json::from_str(&trimmed[start..=end]).ok())
        .flatten()
}

fn auth_hint(settings: &PlannerSettings) -> String {
    if settings.api_key.is_none() {
        format!("No API key configured; set {}.", ENV_PLANNER_API_KEY)
    } else {
        format!("Check the key in {} for {}.", ENV_PLANNER_API_KEY, settings.endpoint)
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockBrowser, MockPage};
    use httpmock::prelude::*;

    fn settings(server: &MockServer, max_retries: usize) -> PlannerSettings {
        PlannerSettings {
            endpoint: server.url("/v1/chat/completions"),
            model: "test-model".to_string(),
            api_key: Some("test-key".to_string()),
            max_retries,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn reply(content: &str) -> Value {
        json!({"choices": [{"message": {"content": content}, "finish_reason": "stop"}]})
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(next_backoff_ms(0), 200);
        assert_eq!(next_backoff_ms(1), 400);
        assert_eq!(next_backoff_ms(2), 800);
        assert!(should_retry_status(429));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(400));
    }

    #[test]
    fn test_parse_reply_json() {
        assert_eq!(parse_reply_json("[]"), Some(json!([])));
        assert_eq!(
            parse_reply_json("```json\n[{\"selector\": \"#a\"}]\n```"),
            Some(json!([{"selector": "#a"}]))
        );
        assert_eq!(parse_reply_json("no idea"), None);
    }

    #[test]
    fn test_reasoning_content_fallback() {
        let raw = json!({"choices": [{"message": {"content": "", "reasoning_content": "[]"}}]});
        assert_eq!(parse_chat_response(&raw.to_string()).unwrap(), "[]");
        assert!(parse_chat_response("{}").is_err());
    }

    #[tokio::test]
    async fn test_plan_sends_bearer_and_parses_actions() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key")
                .json_body_includes(json!({"model": "test-model"}).to_string());
            then.status(200)
                .json_body(reply("[{\"selector\": \"#login\", \"method\": \"click\"}]"));
        });

        let planner = ChatPlanner::new(settings(&server, 2)).unwrap();
        let raw = planner.plan("click login", &PageState::default()).await.unwrap();
        mock.assert();
        match normalize_planner_output(&raw) {
            PlannerOutput::Actions(actions) => assert_eq!(actions[0].selector, "#login"),
            other => panic!("expected actions, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("unauthorized");
        });

        let planner = ChatPlanner::new(settings(&server, 2)).unwrap();
        let err = planner.plan("click login", &PageState::default()).await.unwrap_err();
        mock.assert_hits(1);
        assert!(err.is_auth());
        assert!(err.to_string().contains(ENV_PLANNER_API_KEY));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("overloaded");
        });

        let planner = ChatPlanner::new(settings(&server, 1)).unwrap();
        let err = planner.plan("click login", &PageState::default()).await.unwrap_err();
        mock.assert_hits(2);
        assert!(matches!(err, PlannerError::Unavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_act_executes_proposed_actions() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(reply("[{\"selector\": \"#q\", \"method\": \"fill\", \"arguments\": [\"rust\"]}]"));
        });

        let browser = MockBrowser::new(vec![MockPage::new("https://x/").input("#q", "Search")]);
        browser.open("https://x/");
        let planner = ChatPlanner::new(settings(&server, 0)).unwrap();
        let raw = planner
            .act("search for rust", &PageState::default(), &browser)
            .await
            .unwrap();
        assert_eq!(raw["success"], true);
        assert_eq!(raw["actions"][0]["selector"], "#q");
        assert_eq!(browser.value_of("#q").as_deref(), Some("rust"));
    }

    #[test]
    fn test_screenshot_is_inlined() {
        let page = PageState {
            screenshot: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        let content = user_content("hi", &page);
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert!(user_content("hi", &PageState::default()).is_string());
    }
}
