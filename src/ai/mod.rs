mod summarizer;

pub use summarizer::{ClaudeSummarizer, SummaryInput, Summarizer};
