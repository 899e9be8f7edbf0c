//! Background document processing: registry and embedding worker

mod registry;
mod worker;

pub use registry::DocumentRegistry;
pub use worker::{DocumentProcessor, ProcessOutcome, NO_TEXT_EXTRACTED};
