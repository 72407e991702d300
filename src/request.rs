//! Incoming HTTP request type.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version, header};

/// An incoming HTTP request with its body fully buffered.
///
/// Cheap to clone: headers are a small map and the body is a ref-counted
/// [`Bytes`]. Every handler receives its own clone, so middleware can still
/// read the original after the handler has run.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    /// Wraps an [`http::Request`] whose body has already been collected.
    pub fn new(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            params: HashMap::new(),
            remote_addr: None,
        }
    }

    /// Sets the peer address of the underlying connection.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string without the leading `?`; empty when absent.
    pub fn query(&self) -> &str {
        self.uri.query().unwrap_or_default()
    }

    /// Replaces the request URI. Middleware that rewrites paths uses this.
    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Case-insensitive header lookup. Non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn user_agent(&self) -> &str {
        self.header(header::USER_AGENT.as_str()).unwrap_or_default()
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Best-effort client address.
    ///
    /// Behind a reverse proxy the peer is the proxy itself, so the first
    /// `X-Forwarded-For` entry wins, then `X-Real-IP`, then the peer address.
    /// Empty when none is known.
    pub fn client_ip(&self) -> String {
        let forwarded = self
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_owned();
        }
        if let Some(ip) = self.header("x-real-ip").map(str::trim).filter(|v| !v.is_empty()) {
            return ip.to_owned();
        }
        self.remote_addr.map(|a| a.ip().to_string()).unwrap_or_default()
    }

    /// Renders the request head as it would appear on the wire, without the
    /// body. Used for diagnostics only.
    ///
    /// `Authorization` values are replaced with `*`.
    pub fn dump(&self) -> String {
        let target = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut out = String::new();
        let _ = write!(out, "{} {} {:?}\r\n", self.method, target, self.version);

        // Host first, as clients send it; HTTP/2 carries it in the URI authority.
        let host = self
            .header(header::HOST.as_str())
            .map(str::to_owned)
            .or_else(|| self.uri.authority().map(|a| a.to_string()));
        if let Some(host) = host {
            let _ = write!(out, "Host: {host}\r\n");
        }

        for (name, value) in &self.headers {
            if *name == header::HOST {
                continue;
            }
            if *name == header::AUTHORIZATION {
                let _ = write!(out, "{name}: *\r\n");
                continue;
            }
            let _ = write!(out, "{name}: {}\r\n", String::from_utf8_lossy(value.as_bytes()));
        }
        out.push_str("\r\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str, headers: &[(&str, &str)]) -> Request {
        let mut builder = http::Request::builder().uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        Request::new(builder.body(Bytes::from_static(b"secret body")).unwrap())
    }

    #[test]
    fn path_and_query_are_split() {
        let req = request("/search?q=rust&page=2", &[]);
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query(), "q=rust&page=2");
        assert_eq!(request("/plain", &[]).query(), "");
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();

        let req = request("/", &[("x-forwarded-for", "203.0.113.7, 10.0.0.2")]).with_remote_addr(peer);
        assert_eq!(req.client_ip(), "203.0.113.7");

        let req = request("/", &[("x-real-ip", "198.51.100.4")]).with_remote_addr(peer);
        assert_eq!(req.client_ip(), "198.51.100.4");

        let req = request("/", &[]).with_remote_addr(peer);
        assert_eq!(req.client_ip(), "10.0.0.1");

        assert_eq!(request("/", &[]).client_ip(), "");
    }

    #[test]
    fn dump_excludes_body_and_masks_authorization() {
        let req = request(
            "/orders?id=9",
            &[("host", "shop.test"), ("authorization", "Bearer abc"), ("user-agent", "curl/8")],
        );
        let dump = req.dump();

        assert!(dump.starts_with("GET /orders?id=9 HTTP/1.1\r\nHost: shop.test\r\n"));
        assert!(dump.contains("authorization: *\r\n"));
        assert!(dump.contains("user-agent: curl/8\r\n"));
        assert!(dump.ends_with("\r\n\r\n"));
        assert!(!dump.contains("Bearer"));
        assert!(!dump.contains("secret body"));
    }
}
