mod entry;
mod summary;

pub use entry::{EnrichmentResult, Entry, NewEntry, ProcessingStatus, SourceType};
pub use summary::{SummaryCacheEntry, SummaryResult};
