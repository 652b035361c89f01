pub mod chunking;
pub mod config;
pub mod error;
pub mod gamma;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod schema;
pub mod stats;
pub mod summarizer;
