use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::EstimatorError;
use crate::mcp::ToolDescriptor;

/// Maps text to a token count for some tokenizer.
///
/// Implementations must be deterministic and safe to call from several
/// verification tasks at once. Wrap stateful tokenizers in
/// [`SerializedEstimator`].
#[async_trait]
pub trait TokenEstimator: Send + Sync {
    async fn estimate(&self, text: &str) -> Result<usize, EstimatorError>;
}

/// Rough estimate from character count, four characters per token by default.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f32,
}

impl CharRatioEstimator {
    pub fn new(chars_per_token: f32) -> Self {
        Self { chars_per_token }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4.0)
    }
}

#[async_trait]
impl TokenEstimator for CharRatioEstimator {
    async fn estimate(&self, text: &str) -> Result<usize, EstimatorError> {
        if self.chars_per_token.is_nan() || self.chars_per_token <= 0.0 {
            return Err(EstimatorError(format!(
                "chars_per_token must be positive, got {}",
                self.chars_per_token
            )));
        }
        let chars = text.chars().count() as f32;
        Ok((chars / self.chars_per_token).ceil() as usize)
    }
}

/// Runs a non-reentrant tokenizer one call at a time.
pub struct SerializedEstimator<F> {
    inner: Mutex<F>,
}

impl<F> SerializedEstimator<F>
where
    F: FnMut(&str) -> Result<usize, EstimatorError> + Send,
{
    pub fn new(tokenize: F) -> Self {
        Self {
            inner: Mutex::new(tokenize),
        }
    }
}

#[async_trait]
impl<F> TokenEstimator for SerializedEstimator<F>
where
    F: FnMut(&str) -> Result<usize, EstimatorError> + Send,
{
    async fn estimate(&self, text: &str) -> Result<usize, EstimatorError> {
        let mut tokenize = self.inner.lock().await;
        (tokenize)(text)
    }
}

/// Tokens charged for the `tools/list` framing around the tool entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingOverhead {
    /// Estimate the serialized result envelope with its tool array emptied.
    #[default]
    Measured,
    Fixed(usize),
    Disabled,
}

impl FramingOverhead {
    pub async fn tokens(
        &self,
        estimator: &dyn TokenEstimator,
        envelope: &Value,
    ) -> Result<usize, EstimatorError> {
        match self {
            Self::Measured => estimator.estimate(&envelope.to_string()).await,
            Self::Fixed(n) => Ok(*n),
            Self::Disabled => Ok(0),
        }
    }
}

/// Compact JSON of the parts of a tool a model actually sees. Object keys
/// come out sorted, so equal tools always produce equal text.
pub fn canonical_tool_text(tool: &ToolDescriptor) -> String {
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": tool.input_schema,
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tool() -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({ "type": "object", "properties": { "path": { "type": "string" } } }),
        }
    }

    #[tokio::test]
    async fn char_ratio_rounds_up() {
        let est = CharRatioEstimator::default();
        assert_eq!(est.estimate("").await.unwrap(), 0);
        assert_eq!(est.estimate("abcd").await.unwrap(), 1);
        assert_eq!(est.estimate("abcde").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn char_ratio_rejects_nonsense_ratio() {
        assert!(CharRatioEstimator::new(0.0).estimate("x").await.is_err());
    }

    #[test]
    fn canonical_text_has_sorted_keys() {
        let text = canonical_tool_text(&tool());
        assert_eq!(
            text,
            r#"{"description":"Read a file","inputSchema":{"properties":{"path":{"type":"string"}},"type":"object"},"name":"read_file"}"#
        );
    }

    #[tokio::test]
    async fn framing_overhead_modes() {
        let est = CharRatioEstimator::default();
        let envelope = json!({ "tools": [] });
        assert_eq!(
            FramingOverhead::Measured.tokens(&est, &envelope).await.unwrap(),
            3
        );
        assert_eq!(
            FramingOverhead::Fixed(12).tokens(&est, &envelope).await.unwrap(),
            12
        );
        assert_eq!(
            FramingOverhead::Disabled.tokens(&est, &envelope).await.unwrap(),
            0
        );
    }

    #[test]
    fn framing_overhead_config_shape() {
        let fixed: FramingOverhead = serde_json::from_str(r#"{"fixed":40}"#).unwrap();
        assert_eq!(fixed, FramingOverhead::Fixed(40));
        let measured: FramingOverhead = serde_json::from_str(r#""measured""#).unwrap();
        assert_eq!(measured, FramingOverhead::Measured);
    }

    #[tokio::test]
    async fn serialized_estimator_allows_stateful_tokenizers() {
        // Reuses one scratch buffer across calls, so it must never run twice at once.
        let mut scratch = String::new();
        let est = Arc::new(SerializedEstimator::new(move |text: &str| {
            scratch.clear();
            scratch.push_str(text);
            Ok(scratch.len())
        }));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let est = Arc::clone(&est);
                tokio::spawn(async move { est.estimate(&"x".repeat(i)).await.unwrap() })
            })
            .collect();
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(h.await.unwrap(), i);
        }
    }
}
