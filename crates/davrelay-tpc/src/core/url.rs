//! URL and opaque-parameter helpers.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything except RFC 3986 unreserved characters gets escaped.
const ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-escape a single value.
pub fn escape(value: &str) -> String {
    utf8_percent_encode(value, ESCAPE).to_string()
}

/// WebDAV clients write `davs://`; the HTTP client needs `https://`.
pub fn rewrite_davs(url: &str) -> String {
    match url.strip_prefix("davs://") {
        Some(rest) => format!("https://{rest}"),
        None => url.to_string(),
    }
}

/// Split `path?opaque` into its two halves; the opaque part may be empty.
pub fn split_resource(resource: &str) -> (&str, &str) {
    resource.split_once('?').unwrap_or((resource, ""))
}

/// Join two `&`-separated parameter lists.
pub fn join_opaque(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left}&{right}"),
    }
}

/// `authz=<escaped token>` for a client `Authorization` header.
pub fn authz_opaque(authorization: Option<&str>) -> String {
    authorization
        .map(|token| format!("authz={}", escape(token)))
        .unwrap_or_default()
}

/// Make storage opaque data safe for a client-facing URI.
///
/// Storage opaque data only forbids `&` and `=`, so values may contain
/// characters URI parsers reject. Names are kept, values are escaped, empty
/// parameters are dropped.
pub fn encode_opaque_for_uri(opaque: &str) -> String {
    opaque
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| match param.split_once('=') {
            Some((name, value)) => format!("{name}={}", escape(value)),
            None => param.to_string(),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// `Location` value sending the client to another data server.
pub fn redirect_location(https: bool, host: &str, port: u16, resource: &str, opaque: &str) -> String {
    let scheme = if https { "https" } else { "http" };
    let path = resource.trim_start_matches('/');
    let mut location = format!("{scheme}://{host}:{port}/{path}");
    if !opaque.is_empty() {
        location.push('?');
        location.push_str(&encode_opaque_for_uri(opaque));
    }
    location
}
