pub mod client;
pub mod payload;
pub mod pipeline;
pub mod prompt;

pub use client::{AssessmentClient, ChatCompletionClient, CompletionProvider};
pub use payload::PayloadBuilder;
pub use pipeline::{AssessmentPipeline, RunReport};
pub use prompt::PromptRenderer;
