//! File transfer: streamed copy, retry with backoff, run summaries.

pub mod copy;
pub mod progress;

pub use copy::{copy_file, ensure_parent, CopyOptions, CopyOutcome, RetryPolicy};
pub use progress::RunSummary;
