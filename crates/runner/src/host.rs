use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use http_body::Frame;
use std::{pin::Pin, sync::Arc};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type BoxedStream<T> = Pin<Box<dyn futures::Stream<Item = T> + Send + Sync>>;

pub type HttpBodyStream = BoxedStream<core::result::Result<Frame<Bytes>, BoxError>>;
pub type HttpResponse = http::Response<HttpBodyStream>;

/// Final URL of a response after redirects, set by hosts that follow them.
///
/// Stored in the response extensions; without it the request URL is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseUrl(pub url::Url);

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Services the embedder provides to a running source.
#[async_trait::async_trait]
pub trait Host: Send + Sync + 'static {
    /// Perform an HTTP request on behalf of the guest.
    ///
    /// Implementations own redirect behavior and header hygiene. In particular,
    /// remove any caller-supplied `Host` header before dispatching.
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError>;

    /// Receives every line the guest prints. Lines are also logged under
    /// [`crate::TRACE_TARGET_GUEST`].
    fn print(&self, _message: &str) {}
}

#[async_trait::async_trait]
impl<T: Host + ?Sized> Host for Arc<T> {
    async fn http_request(&self, req: HttpRequest) -> core::result::Result<HttpResponse, BoxError> {
        (**self).http_request(req).await
    }

    fn print(&self, message: &str) {
        (**self).print(message);
    }
}
