use std::fmt;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use once_cell::sync::Lazy;
use tracing::warn;

/// The WebDAV `COPY` extension method.
pub static COPY: Lazy<Method> =
    Lazy::new(|| Method::from_bytes(b"COPY").expect("COPY is a valid method token"));

/// Which way the bytes flow relative to this server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Fetch from the remote `Source` into the local resource.
    Pull,
    /// Send the local resource to the remote `Destination`.
    Push,
}

impl Direction {
    pub fn log_prefix(&self) -> &'static str {
        match self {
            Direction::Pull => "PullRequest",
            Direction::Push => "PushRequest",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Pull => write!(f, "pull"),
            Direction::Push => write!(f, "push"),
        }
    }
}

/// Authenticated identity of the requesting client.
///
/// Opaque to the transfer engine; it is handed to the storage backend on
/// every open and recorded in the transfer log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    /// Mapped user name, `None` for anonymous clients.
    pub name: Option<String>,
    /// Connection identifier, e.g. `user.123:45@host`.
    pub client_id: String,
}

/// An incoming `COPY` or `OPTIONS` request.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub method: Method,
    /// Local resource path, optionally followed by `?` and opaque parameters.
    pub resource: String,
    pub headers: HeaderMap,
    pub security: SecurityContext,
    /// Host name of the requesting client.
    pub client_host: String,
}

impl CopyRequest {
    pub fn new(method: Method, resource: impl Into<String>) -> Self {
        Self {
            method,
            resource: resource.into(),
            headers: HeaderMap::new(),
            security: SecurityContext::default(),
            client_host: String::new(),
        }
    }

    /// A `COPY` request for `resource`.
    pub fn copy(resource: impl Into<String>) -> Self {
        Self::new(COPY.clone(), resource)
    }

    pub fn options(resource: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, resource)
    }

    /// Append a header. Names or values that are not valid HTTP are dropped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "dropping invalid request header"),
        }
        self
    }

    pub fn security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }

    pub fn client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = host.into();
        self
    }

    pub fn is_copy(&self) -> bool {
        self.method == *COPY
    }

    /// Case-insensitive header lookup; non-UTF-8 values read as absent.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// `TransferHeader<Name>: value` pairs, returned as `(Name, value)`.
    pub fn transfer_headers(&self) -> Vec<(String, String)> {
        const PREFIX: &str = "transferheader";
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                let forwarded = name.as_str().strip_prefix(PREFIX)?;
                if forwarded.is_empty() {
                    return None;
                }
                Some((forwarded.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect()
    }
}
