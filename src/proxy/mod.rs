pub mod context;
pub mod handler;

pub use context::{BoxBody, RequestContext};
pub use handler::handle_request;

use async_trait::async_trait;
use hyper::body::Incoming;
use hyper::{Request, Response};

/// The application the limiter protects. Admitted requests are forwarded
/// here; the gateway only annotates the response it gets back.
#[async_trait]
pub trait Downstream: Send + Sync + 'static {
    async fn handle(&self, req: Request<Incoming>) -> Response<BoxBody>;
}
