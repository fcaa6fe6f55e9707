pub mod static_xhr;
pub mod transport;

// Re-export common types
pub use static_xhr::StaticXhrPool;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
