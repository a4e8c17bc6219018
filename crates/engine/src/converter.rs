//! Natural-language strategy structuring
//!
//! A converter turns free text into a [`ParsedStrategy`]. The LLM-backed
//! converter talks to any OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::ConvertError;
use crate::types::{RiskManagement, StrategyLogic};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "groq/compound";
const REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_CODE: &str = r#"def calculate_signals(data):
    data['SMA_20'] = data['close'].rolling(window=20).mean()
    data['SMA_50'] = data['close'].rolling(window=50).mean()
    data['signal'] = 0
    data.loc[data['SMA_20'] > data['SMA_50'], 'signal'] = 1
    data.loc[data['SMA_20'] < data['SMA_50'], 'signal'] = -1
    return data
"#;

/// Structured strategy plus the opaque code the service generated for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub logic: StrategyLogic,
}

/// SMA(20)/SMA(50) crossover with 2% stop and 4% target
pub fn default_strategy() -> ParsedStrategy {
    ParsedStrategy {
        code: Some(DEFAULT_CODE.to_string()),
        logic: StrategyLogic {
            entry_conditions: vec![
                "SMA_20 crosses above SMA_50".to_string(),
                "Price is above both moving averages".to_string(),
            ],
            exit_conditions: vec![
                "SMA_20 crosses below SMA_50".to_string(),
                "Price falls below SMA_20".to_string(),
            ],
            indicators: vec!["SMA_20".to_string(), "SMA_50".to_string()],
            risk_management: RiskManagement::default(),
        },
    }
}

#[async_trait]
pub trait StrategyConverter: Send + Sync {
    async fn convert(&self, description: &str) -> Result<ParsedStrategy, ConvertError>;
}

/// Always answers with the same strategy
#[derive(Debug, Clone)]
pub struct FixedStrategyConverter {
    strategy: ParsedStrategy,
}

impl FixedStrategyConverter {
    pub fn new(strategy: ParsedStrategy) -> Self {
        Self { strategy }
    }
}

impl Default for FixedStrategyConverter {
    fn default() -> Self {
        Self::new(default_strategy())
    }
}

#[async_trait]
impl StrategyConverter for FixedStrategyConverter {
    async fn convert(&self, _description: &str) -> Result<ParsedStrategy, ConvertError> {
        Ok(self.strategy.clone())
    }
}

/// Connection settings for the chat-completions service
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmStrategyConverter {
    client: Client,
    config: LlmConfig,
}

impl LlmStrategyConverter {
    pub fn new(config: LlmConfig) -> Result<Self, ConvertError> {
        if config.api_key.trim().is_empty() {
            return Err(ConvertError::MissingApiKey);
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, config })
    }

    fn prompt(description: &str) -> String {
        format!(
            "You are a trading strategy expert. Convert the following natural language trading \
strategy into code that can be executed in a backtesting engine.

Natural Language Strategy: {description}

Requirements:
1. Generate code that implements the strategy logic
2. The code should work with OHLCV data (Open, High, Low, Close, Volume)
3. Include proper entry and exit conditions
4. Implement risk management (stop loss, take profit)
5. Use common technical indicators (SMA, EMA, RSI, MACD, Bollinger Bands, etc.)

Return the response in this JSON format:
{{
  \"code\": \"code here\",
  \"entryConditions\": [\"condition1\", \"condition2\"],
  \"exitConditions\": [\"condition1\", \"condition2\"],
  \"indicators\": [\"indicator1\", \"indicator2\"],
  \"riskManagement\": {{ \"stopLoss\": 2.0, \"takeProfit\": 4.0 }}
}}

Only return valid JSON, no additional text."
        )
    }
}

#[async_trait]
impl StrategyConverter for LlmStrategyConverter {
    async fn convert(&self, description: &str) -> Result<ParsedStrategy, ConvertError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [{ "role": "user", "content": Self::prompt(description) }],
            "temperature": 0.7,
            "max_completion_tokens": 2048,
            "top_p": 1,
            "stream": false,
        });

        debug!(model = %self.config.model, "Requesting strategy conversion");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConvertError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ConvertError::EmptyResponse)?;

        let parsed = parse_strategy_content(&content)?;
        info!(
            indicators = parsed.logic.indicators.len(),
            stop_loss = parsed.logic.risk_management.stop_loss,
            take_profit = parsed.logic.risk_management.take_profit,
            "Strategy converted"
        );
        Ok(parsed)
    }
}

/// Parse the model's reply, tolerating a surrounding Markdown code fence
pub fn parse_strategy_content(content: &str) -> Result<ParsedStrategy, ConvertError> {
    let body = strip_code_fence(content);
    if body.is_empty() {
        return Err(ConvertError::EmptyResponse);
    }
    Ok(serde_json::from_str(body)?)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{
        "code": "def f(data): pass",
        "entryConditions": ["RSI below 30"],
        "exitConditions": ["RSI above 70"],
        "indicators": ["RSI_14"],
        "riskManagement": { "stopLoss": 1.5, "takeProfit": 3.0 }
    }"#;

    #[test]
    fn test_parse_plain_json() {
        let parsed = parse_strategy_content(REPLY).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("def f(data): pass"));
        assert_eq!(parsed.logic.indicators, vec!["RSI_14"]);
        assert_eq!(parsed.logic.risk_management.stop_loss, 1.5);
        assert_eq!(parsed.logic.risk_management.take_profit, 3.0);
    }

    #[test]
    fn test_parse_fenced_json() {
        let fenced = format!("```json\n{}\n```", REPLY);
        let parsed = parse_strategy_content(&fenced).unwrap();
        assert_eq!(parsed.logic.entry_conditions, vec!["RSI below 30"]);
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed = parse_strategy_content(r#"{"indicators": ["EMA_9"]}"#).unwrap();
        assert!(parsed.code.is_none());
        assert_eq!(parsed.logic.risk_management, RiskManagement::default());
    }

    #[test]
    fn test_malformed_and_empty_content() {
        assert!(matches!(
            parse_strategy_content("not json"),
            Err(ConvertError::Malformed(_))
        ));
        assert!(matches!(
            parse_strategy_content("```\n```"),
            Err(ConvertError::EmptyResponse)
        ));
    }

    #[test]
    fn test_default_strategy_shape() {
        let strategy = default_strategy();
        assert_eq!(strategy.logic.indicators, vec!["SMA_20", "SMA_50"]);
        assert_eq!(strategy.logic.risk_management.stop_loss, 2.0);
        assert_eq!(strategy.logic.risk_management.take_profit, 4.0);
    }

    #[test]
    fn test_missing_api_key_rejected() {
        assert!(matches!(
            LlmStrategyConverter::new(LlmConfig::new("  ")),
            Err(ConvertError::MissingApiKey)
        ));
    }

    #[tokio::test]
    async fn test_fixed_converter() {
        let converter = FixedStrategyConverter::default();
        let parsed = converter.convert("anything").await.unwrap();
        assert_eq!(parsed, default_strategy());
    }
}
