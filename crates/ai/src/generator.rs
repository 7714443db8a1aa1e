use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AiError;

/// Produces an answer for a single question.
///
/// Implementations may call a remote model; callers measure latency around
/// `generate` and treat any error as an internal failure.
#[async_trait::async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, question: &str) -> Result<String, AiError>;
}

#[async_trait::async_trait]
impl<G> AnswerGenerator for Arc<G>
where
    G: AnswerGenerator + ?Sized,
{
    async fn generate(&self, question: &str) -> Result<String, AiError> {
        (**self).generate(question).await
    }
}

/// In-process generator returning a deterministic canned answer.
///
/// Stand-in for the hosted model in development and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAnswerGenerator {
    assistant_name: String,
}

impl LocalAnswerGenerator {
    pub fn new(assistant_name: impl Into<String>) -> Self {
        Self {
            assistant_name: assistant_name.into(),
        }
    }
}

impl Default for LocalAnswerGenerator {
    fn default() -> Self {
        Self::new("Luca IA")
    }
}

#[async_trait::async_trait]
impl AnswerGenerator for LocalAnswerGenerator {
    async fn generate(&self, question: &str) -> Result<String, AiError> {
        if question.is_empty() {
            return Err(AiError::InvalidInput("question is empty".to_string()));
        }
        debug!(chars = question.chars().count(), "generating canned answer");
        Ok(format!(
            "{}: Thanks for asking about '{}'. This is a simulated answer.",
            self.assistant_name, question
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_answer_echoes_question() {
        let answer = LocalAnswerGenerator::default()
            .generate("how do invoices work?")
            .await
            .unwrap();
        assert_eq!(
            answer,
            "Luca IA: Thanks for asking about 'how do invoices work?'. This is a simulated answer."
        );
    }

    #[tokio::test]
    async fn works_through_shared_trait_object() {
        let generator: Arc<dyn AnswerGenerator> = Arc::new(LocalAnswerGenerator::new("Bot"));
        let answer = generator.generate("ping").await.unwrap();
        assert!(answer.starts_with("Bot: "));
    }

    #[tokio::test]
    async fn empty_question_is_rejected() {
        let err = LocalAnswerGenerator::default().generate("").await.unwrap_err();
        assert!(matches!(err, AiError::InvalidInput(_)));
    }
}
