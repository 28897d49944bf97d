//! [`Host`] implementation backed by `reqwest`.

use futures::StreamExt;
use http::header::HOST;
use http_body::Frame;
use url::Url;

use crate::host::{BoxError, Host, HttpBodyStream, HttpRequest, HttpResponse, ResponseUrl};

const USER_AGENT: &str = concat!("sourcebridge/", env!("CARGO_PKG_VERSION"));

/// Sends guest requests with a shared `reqwest` client. Redirects are
/// followed and the final URL is reported through [`ResponseUrl`].
#[derive(Debug, Clone)]
pub struct ReqwestHost {
    client: reqwest::Client,
}

impl ReqwestHost {
    /// # Errors
    /// Fails if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Host for ReqwestHost {
    async fn http_request(&self, mut req: HttpRequest) -> Result<HttpResponse, BoxError> {
        // The client derives `Host` from the URL.
        req.headers.remove(HOST);
        let url = Url::parse(&req.uri.to_string())?;
        let mut builder = self.client.request(req.method, url).headers(req.headers);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }
        let mut resp = builder.send().await?;

        let final_url = resp.url().clone();
        let mut response = http::Response::builder()
            .status(resp.status())
            .version(resp.version())
            .extension(ResponseUrl(final_url));
        if let Some(headers) = response.headers_mut() {
            *headers = std::mem::take(resp.headers_mut());
        }
        let body: HttpBodyStream = Box::pin(resp.bytes_stream().map(|chunk| match chunk {
            Ok(data) => Ok(Frame::data(data)),
            Err(e) => Err(e.into()),
        }));
        Ok(response.body(body)?)
    }
}
