use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid question input: {0}")]
    InvalidInput(String),

    #[error("answer generation failed: {0}")]
    GenerationFailed(String),
}
