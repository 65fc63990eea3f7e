//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::de::DeserializeOwned;

use crate::method::Method;

/// An incoming HTTP request with its body already buffered.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Starts a request by hand, for tests and for embedding the middleware
    /// stack behind another server.
    ///
    /// ```rust
    /// use vitrine::{Method, Request};
    ///
    /// let req = Request::builder(Method::Post, "/api/products?draft=1")
    ///     .header("content-type", "application/json")
    ///     .body(br#"{"name":"mug"}"#.to_vec())
    ///     .build();
    /// assert_eq!(req.path(), "/api/products");
    /// ```
    pub fn builder(method: Method, uri: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            req: Request {
                method,
                uri: uri.into(),
                headers: Vec::new(),
                body: Vec::new(),
                params: HashMap::new(),
                remote_addr: None,
            },
        }
    }

    pub fn method(&self) -> Method { self.method }
    /// Path plus query string, as received.
    pub fn uri(&self) -> &str { &self.uri }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        self.uri.split_once('?').map_or(self.uri.as_str(), |(path, _)| path)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/products/{id}`, `req.param("id")` on `/products/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Deserialises the body as JSON.
    ///
    /// The error converts into a validation [`Failure`](crate::Failure), so
    /// `req.json::<T>()?` inside a wrapped handler answers 400.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Best-effort client address: first `X-Forwarded-For` entry, then the
    /// socket peer, then `"unknown"`.
    pub fn client_ip(&self) -> String {
        client_ip(&self.headers, self.remote_addr)
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Also used by the server for requests it rejects before building a
/// [`Request`].
pub(crate) fn client_ip(headers: &[(String, String)], remote_addr: Option<SocketAddr>) -> String {
    find_header(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .or_else(|| remote_addr.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}

pub(crate) fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Builder returned by [`Request::builder`].
pub struct RequestBuilder {
    req: Request,
}

impl RequestBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.req.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.req.body = body;
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.req.params.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.req.remote_addr = Some(addr);
        self
    }

    pub fn build(self) -> Request {
        self.req
    }
}
