//! Context assembly, prompting, and the answer generation seam

pub mod answer;
pub mod context;
pub mod prompt;

pub use answer::{AnswerGenerator, AnswerService, PreparedQuestion};
pub use context::ContextAssembler;
pub use prompt::{Prompt, PromptBuilder};
