use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

/// Probe methods the engine dispatches. HEAD is used opportunistically and
/// escalated to GET when a hit needs a body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeMethod {
    Head,
    Get,
}

impl ProbeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMethod::Head => "HEAD",
            ProbeMethod::Get => "GET",
        }
    }
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Status line plus headers, CRLF separated, ending with a blank line.
    pub header_block: String,
    pub body: String,
}

impl ProbeResponse {
    /// The full exchange as a printable string: headers followed by body.
    pub fn raw(&self) -> String {
        let mut out = String::with_capacity(self.header_block.len() + self.body.len());
        out.push_str(&self.header_block);
        out.push_str(&self.body);
        out
    }

    pub fn is_textual(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.trim_start().starts_with("text"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid URL '{url}'")]
    InvalidUrl { url: String },

    #[error("request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body: {source}")]
    Body {
        #[source]
        source: reqwest::Error,
    },
}

/// The HTTP seam the engine probes through. Object-safe so the worker pool,
/// oracle and tests can share one `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        method: ProbeMethod,
        url: &'a str,
    ) -> BoxFuture<'a, Result<ProbeResponse, TransportError>>;
}

#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn build(
        proxy: Option<&str>,
        timeout_seconds: usize,
        follow_redirects: bool,
        extra_headers: &[(String, String)],
    ) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:95.0) Gecko/20100101 Firefox/95.0",
            ),
        );
        for (name, value) in extra_headers {
            let name = match reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => name,
                Err(_) => continue,
            };
            let value = match reqwest::header::HeaderValue::from_str(value) {
                Ok(value) => value,
                Err(_) => continue,
            };
            headers.insert(name, value);
        }

        let redirect_policy = if follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let timeout = Duration::from_secs(timeout_seconds.try_into().unwrap_or(10));
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(redirect_policy)
            .timeout(timeout)
            .danger_accept_invalid_hostnames(true)
            .danger_accept_invalid_certs(true);

        if let Some(proxy) = proxy.filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

/// Renders the status line and headers the way the raw wire response reads.
fn header_block(status: reqwest::StatusCode, headers: &reqwest::header::HeaderMap) -> String {
    let mut out = String::with_capacity(20 * (headers.len() + 1));
    out.push_str("HTTP/1.1 ");
    out.push_str(status.as_str());
    if let Some(reason) = status.canonical_reason() {
        out.push(' ');
        out.push_str(reason);
    }
    out.push_str("\r\n");
    for (name, value) in headers.iter() {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or(""));
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

impl Transport for ReqwestTransport {
    fn send<'a>(
        &'a self,
        method: ProbeMethod,
        url: &'a str,
    ) -> BoxFuture<'a, Result<ProbeResponse, TransportError>> {
        Box::pin(async move {
            let parsed = reqwest::Url::parse(url).map_err(|_| TransportError::InvalidUrl {
                url: url.to_string(),
            })?;
            let request = match method {
                ProbeMethod::Head => self.client.head(parsed),
                ProbeMethod::Get => self.client.get(parsed),
            };
            let response = request
                .send()
                .await
                .map_err(|e| TransportError::Request { source: e })?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());
            let header_block = header_block(status, response.headers());
            let body = match method {
                ProbeMethod::Head => String::new(),
                ProbeMethod::Get => response
                    .text()
                    .await
                    .map_err(|e| TransportError::Body { source: e })?,
            };

            Ok(ProbeResponse {
                status: status.as_u16(),
                content_type,
                header_block,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_content_type_detection() {
        let mut resp = ProbeResponse {
            status: 200,
            content_type: Some("text/html; charset=utf-8".to_string()),
            header_block: String::new(),
            body: String::new(),
        };
        assert!(resp.is_textual());

        resp.content_type = Some("application/octet-stream".to_string());
        assert!(!resp.is_textual());

        resp.content_type = None;
        assert!(!resp.is_textual());
    }

    #[test]
    fn raw_concatenates_headers_and_body() {
        let resp = ProbeResponse {
            status: 200,
            content_type: None,
            header_block: "HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\n".to_string(),
            body: "hello".to_string(),
        };
        assert_eq!(resp.raw(), "HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\nhello");
    }
}
