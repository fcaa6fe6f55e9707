pub mod raw;

// Re-export common types
pub use raw::{FilesystemSink, OutputSink, RawStorage};
