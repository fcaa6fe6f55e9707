pub mod classifier;

// Re-export common types
pub use classifier::{ContentClassifier, InsufficientReason, Verdict};
