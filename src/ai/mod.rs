mod classifier;
mod gemini;
mod prompt;

pub use classifier::{BatchOutcome, ClassificationRun, Classifier};
pub use gemini::{CategorizationRequest, CategorizationService, GeminiClient};
pub use prompt::generate_classification_prompt;
