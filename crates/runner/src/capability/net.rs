//! `net`: outbound HTTP on behalf of the guest.
//!
//! Requests are arena resources. The guest builds one up with `init` and the
//! `set_*` functions, dispatches it with `send` or `send_all`, then reads the
//! response back through the same handle.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tracing::{debug, warn};
use url::Url;
use wasmtime::Caller;

use super::{Capability, Registrar, context};
use crate::{
    arena::{Document, Image},
    host::{BoxError, HttpBodyStream, HttpRequest, ResponseUrl},
    memory::{GuestMemory, guest_offset},
    rate_limit::TimeUnit,
    state::{HostState, SourceContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum Status {
    Success = 0,
    InvalidDescriptor = -1,
    InvalidString = -2,
    InvalidMethod = -3,
    InvalidUrl = -4,
    InvalidBufferSize = -6,
    MissingData = -7,
    MissingResponse = -8,
    MissingUrl = -9,
    RequestError = -10,
    FailedMemoryWrite = -11,
    NotAnImage = -12,
}

/// Method selector passed to `net.init`.
#[must_use]
pub const fn method_from_raw(raw: i32) -> Option<Method> {
    Some(match raw {
        0 => Method::GET,
        1 => Method::POST,
        2 => Method::PUT,
        3 => Method::HEAD,
        4 => Method::DELETE,
        _ => return None,
    })
}

/// Response captured by a completed send.
#[derive(Debug, Clone)]
pub struct NetResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Bytes,
}

/// A request under construction, and its response once sent.
#[derive(Debug, Clone)]
pub struct NetRequest {
    pub method: Method,
    pub url: Option<Url>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub response: Option<NetResponse>,
    /// Transport error of the last send, if it failed.
    pub error: Option<String>,
}

impl NetRequest {
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            url: None,
            headers: HeaderMap::new(),
            body: None,
            response: None,
            error: None,
        }
    }

    /// The request as handed to [`crate::Host::http_request`]. `None` until a
    /// URL is set.
    #[must_use]
    pub fn to_http_request(&self) -> Option<HttpRequest> {
        let url = self.url.as_ref()?;
        let uri = url.as_str().parse::<Uri>().ok()?;
        Some(HttpRequest {
            method: self.method.clone(),
            uri,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }

    fn complete(&mut self, outcome: Result<NetResponse, String>) -> Status {
        match outcome {
            Ok(response) => {
                self.response = Some(response);
                self.error = None;
                Status::Success
            }
            Err(error) => {
                self.response = None;
                self.error = Some(error);
                Status::RequestError
            }
        }
    }
}

async fn collect_body(mut body: HttpBodyStream, max_bytes: usize) -> Result<Bytes, BoxError> {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.next().await {
        if let Ok(data) = frame?.into_data() {
            if buf.len().saturating_add(data.len()) > max_bytes {
                return Err(format!("response body exceeds {max_bytes} bytes").into());
            }
            buf.extend_from_slice(&data);
        }
    }
    Ok(buf.freeze())
}

/// Wait for the rate limiter, dispatch through the host and buffer the body.
async fn perform(
    ctx: Arc<SourceContext>,
    request: HttpRequest,
    url: Url,
) -> Result<NetResponse, String> {
    ctx.rate_limiter().acquire().await;
    debug!(method = %request.method, %url, "sending request");
    let response = ctx
        .host()
        .http_request(request)
        .await
        .map_err(|e| e.to_string())?;
    let (parts, body) = response.into_parts();
    let body = collect_body(body, ctx.max_response_bytes())
        .await
        .map_err(|e| e.to_string())?;
    let url = parts
        .extensions
        .get::<ResponseUrl>()
        .map_or(url, |final_url| final_url.0.clone());
    Ok(NetResponse {
        status: parts.status,
        headers: parts.headers,
        url,
        body,
    })
}

type Prepared = Result<(HttpRequest, Url), Status>;

fn prepare(ctx: &SourceContext, handle: i32) -> Prepared {
    let arena = ctx.arena().lock();
    let request = arena
        .request(handle)
        .map_err(|_| Status::InvalidDescriptor)?;
    let url = request.url.clone().ok_or(Status::MissingUrl)?;
    let http = request.to_http_request().ok_or(Status::InvalidUrl)?;
    Ok((http, url))
}

fn record(ctx: &SourceContext, handle: i32, outcome: Result<NetResponse, String>) -> Status {
    if let Err(error) = &outcome {
        warn!(source = ctx.source_key(), handle, %error, "request failed");
    }
    ctx.arena()
        .lock()
        .request_mut(handle)
        .map_or(Status::InvalidDescriptor, |request| request.complete(outcome))
}

pub struct Net;

impl Capability for Net {
    fn namespace(&self) -> &'static str {
        "net"
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        registrar
            .func("init", init)
            .func("send", send)
            .func("send_all", send_all)
            .func("set_url", set_url)
            .func("set_header", set_header)
            .func("set_body", set_body)
            .func("data_len", data_len)
            .func("read_data", read_data)
            .func("get_image", get_image)
            .func("get_status_code", get_status_code)
            .func("get_header", get_header)
            .func("html", html)
            .func("set_rate_limit", set_rate_limit);
    }
}

fn init(caller: Caller<'_, HostState>, method: i32) -> i32 {
    let Some(method) = method_from_raw(method) else {
        return Status::InvalidMethod as i32;
    };
    context(&caller)
        .arena()
        .lock()
        .store(NetRequest::new(method))
}

fn send(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    let ctx = context(&caller);
    let (request, url) = match prepare(&ctx, handle) {
        Ok(prepared) => prepared,
        Err(status) => return status as i32,
    };
    let outcome = ctx
        .bridge()
        .run(perform(Arc::clone(&ctx), request, url))
        .unwrap_or_else(|e| Err(e.to_string()));
    record(&ctx, handle, outcome) as i32
}

fn send_all(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> i32 {
    if len <= 0 {
        return Status::InvalidDescriptor as i32;
    }
    let Ok(memory) = GuestMemory::from_caller(&mut caller) else {
        return Status::InvalidDescriptor as i32;
    };
    let handles = match (guest_offset(ptr), guest_offset(len)) {
        (Ok(ptr), Ok(len)) => match memory.read_i32s(&caller, ptr, len) {
            Ok(handles) => handles,
            Err(_) => return Status::InvalidDescriptor as i32,
        },
        _ => return Status::InvalidDescriptor as i32,
    };
    let ctx = context(&caller);
    let prepared: Vec<Prepared> = handles.iter().map(|&h| prepare(&ctx, h)).collect();
    let dispatch = {
        let ctx = Arc::clone(&ctx);
        async move {
            let pending = prepared.into_iter().map(|prepared| {
                let ctx = Arc::clone(&ctx);
                async move {
                    match prepared {
                        Ok((request, url)) => Ok(perform(ctx, request, url).await),
                        Err(status) => Err(status),
                    }
                }
            });
            futures::future::join_all(pending).await
        }
    };
    let outcomes = match ctx.bridge().run(dispatch) {
        Ok(outcomes) => outcomes,
        Err(error) => {
            warn!(%error, "send_all aborted");
            return Status::RequestError as i32;
        }
    };
    let statuses: Vec<i32> = handles
        .iter()
        .zip(outcomes)
        .map(|(&handle, outcome)| match outcome {
            Ok(outcome) => record(&ctx, handle, outcome) as i32,
            Err(status) => status as i32,
        })
        .collect();
    let written = guest_offset(ptr).and_then(|ptr| memory.write_i32s(&mut caller, ptr, &statuses));
    if written.is_err() {
        return Status::FailedMemoryWrite as i32;
    }
    if statuses.iter().all(|&s| s == Status::Success as i32) {
        Status::Success as i32
    } else {
        Status::RequestError as i32
    }
}

fn read_string(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Option<String> {
    let memory = GuestMemory::from_caller(caller).ok()?;
    memory
        .read_str(&*caller, guest_offset(ptr).ok()?, guest_offset(len).ok()?)
        .ok()
}

fn with_request(
    caller: &Caller<'_, HostState>,
    handle: i32,
    update: impl FnOnce(&mut NetRequest) -> Status,
) -> i32 {
    context(caller)
        .arena()
        .lock()
        .request_mut(handle)
        .map_or(Status::InvalidDescriptor, update) as i32
}

fn set_url(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, len: i32) -> i32 {
    let text = (len > 0).then(|| read_string(&mut caller, ptr, len)).flatten();
    with_request(&caller, handle, |request| {
        let Some(text) = text else {
            return Status::InvalidString;
        };
        match Url::parse(&text) {
            Ok(url) => {
                request.url = Some(url);
                Status::Success
            }
            Err(_) => Status::InvalidUrl,
        }
    })
}

fn set_header(
    mut caller: Caller<'_, HostState>,
    handle: i32,
    key_ptr: i32,
    key_len: i32,
    value_ptr: i32,
    value_len: i32,
) -> i32 {
    let key = read_string(&mut caller, key_ptr, key_len);
    let value = read_string(&mut caller, value_ptr, value_len);
    with_request(&caller, handle, |request| {
        let parsed = key
            .and_then(|k| HeaderName::try_from(k).ok())
            .zip(value.and_then(|v| HeaderValue::try_from(v).ok()));
        let Some((name, value)) = parsed else {
            return Status::InvalidString;
        };
        request.headers.insert(name, value);
        Status::Success
    })
}

fn set_body(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, len: i32) -> i32 {
    let body = GuestMemory::from_caller(&mut caller).ok().and_then(|memory| {
        let (ptr, len) = (guest_offset(ptr).ok()?, guest_offset(len).ok()?);
        memory.read_bytes(&caller, ptr, len).ok()
    });
    with_request(&caller, handle, |request| {
        let Some(body) = body else {
            return Status::InvalidString;
        };
        request.body = Some(body.into());
        Status::Success
    })
}

/// Response body of a sent request, or the status explaining its absence.
fn response_body(ctx: &SourceContext, handle: i32) -> Result<Bytes, Status> {
    let arena = ctx.arena().lock();
    let request = arena
        .request(handle)
        .map_err(|_| Status::InvalidDescriptor)?;
    request
        .response
        .as_ref()
        .map(|response| response.body.clone())
        .ok_or(Status::MissingData)
}

fn data_len(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    match response_body(&context(&caller), handle) {
        Ok(body) => i32::try_from(body.len()).unwrap_or(Status::InvalidBufferSize as i32),
        Err(status) => status as i32,
    }
}

fn read_data(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, size: i32) -> i32 {
    let body = match response_body(&context(&caller), handle) {
        Ok(body) => body,
        Err(status) => return status as i32,
    };
    let Some(chunk) = usize::try_from(size)
        .ok()
        .filter(|size| *size <= body.len())
        .map(|size| body.slice(..size))
    else {
        return Status::InvalidBufferSize as i32;
    };
    let written = guest_offset(ptr).and_then(|ptr| {
        GuestMemory::from_caller(&mut caller)?.write_bytes(&mut caller, ptr, &chunk)
    });
    match written {
        Ok(()) => Status::Success as i32,
        Err(_) => Status::FailedMemoryWrite as i32,
    }
}

fn get_image(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    let ctx = context(&caller);
    let body = match response_body(&ctx, handle) {
        Ok(body) => body,
        Err(status) => return status as i32,
    };
    match Image::from_bytes(body) {
        Some(image) => ctx.arena().lock().store(image),
        None => Status::NotAnImage as i32,
    }
}

fn get_status_code(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    let ctx = context(&caller);
    let arena = ctx.arena().lock();
    match arena.request(handle) {
        Ok(request) => request
            .response
            .as_ref()
            .map_or(Status::MissingResponse as i32, |response| {
                i32::from(response.status.as_u16())
            }),
        Err(_) => Status::InvalidDescriptor as i32,
    }
}

fn get_header(mut caller: Caller<'_, HostState>, handle: i32, ptr: i32, len: i32) -> i32 {
    let name = read_string(&mut caller, ptr, len);
    let ctx = context(&caller);
    let mut arena = ctx.arena().lock();
    let value = match arena.request(handle) {
        Err(_) => return Status::InvalidDescriptor as i32,
        Ok(request) => {
            let Some(response) = &request.response else {
                return Status::MissingResponse as i32;
            };
            let Some(name) = name else {
                return Status::InvalidString as i32;
            };
            match response.headers.get(name.as_str()) {
                Some(value) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
                None => return Status::MissingData as i32,
            }
        }
    };
    arena.store(value)
}

fn html(caller: Caller<'_, HostState>, handle: i32) -> i32 {
    let ctx = context(&caller);
    let mut arena = ctx.arena().lock();
    let document = match arena.request(handle) {
        Err(_) => return Status::InvalidDescriptor as i32,
        Ok(request) => match &request.response {
            Some(response) => Document {
                html: String::from_utf8_lossy(&response.body).into_owned(),
                base_url: Some(response.url.to_string()),
            },
            None => return Status::MissingData as i32,
        },
    };
    arena.store(document)
}

fn set_rate_limit(caller: Caller<'_, HostState>, permits: i32, period: i32, unit: i32) {
    let period = TimeUnit::from_raw(unit).duration(period);
    debug!(permits, ?period, "rate limit configured");
    context(&caller).rate_limiter().set(permits, period);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_map_from_selector() {
        assert_eq!(method_from_raw(0), Some(Method::GET));
        assert_eq!(method_from_raw(4), Some(Method::DELETE));
        assert_eq!(method_from_raw(5), None);
    }

    #[test]
    fn request_without_url_has_no_http_form() {
        let mut request = NetRequest::new(Method::POST);
        assert!(request.to_http_request().is_none());
        request.url = Some(Url::parse("https://example.com/a?b=c").expect("url"));
        request.body = Some(Bytes::from_static(b"x"));
        let http = request.to_http_request().expect("http");
        assert_eq!(http.method, Method::POST);
        assert_eq!(http.uri, "https://example.com/a?b=c");
        assert_eq!(http.body.as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn failed_send_clears_previous_response() {
        let mut request = NetRequest::new(Method::GET);
        let url = Url::parse("https://example.com").expect("url");
        let status = request.complete(Ok(NetResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            url,
            body: Bytes::new(),
        }));
        assert_eq!(status, Status::Success);
        assert_eq!(request.complete(Err("reset".into())), Status::RequestError);
        assert!(request.response.is_none());
        assert_eq!(request.error.as_deref(), Some("reset"));
    }

    #[tokio::test]
    async fn body_collection_is_capped() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, BoxError>(http_body::Frame::data(Bytes::from_static(b"abc"))),
            Ok(http_body::Frame::data(Bytes::from_static(b"def"))),
        ]);
        let body: HttpBodyStream = Box::pin(chunks);
        assert!(collect_body(body, 5).await.is_err());

        let chunks = futures::stream::iter(vec![Ok::<_, BoxError>(http_body::Frame::data(
            Bytes::from_static(b"abc"),
        ))]);
        let body: HttpBodyStream = Box::pin(chunks);
        assert_eq!(collect_body(body, 5).await.expect("body"), "abc");
    }
}
