pub mod dispatcher;
pub mod remote;

// Re-export common types
pub use dispatcher::RenderDispatcher;
pub use remote::{RemoteRenderService, RenderService, RenderedPage};
