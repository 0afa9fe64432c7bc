use http::Uri;
use http::uri::{Authority, PathAndQuery, Scheme};

use crate::error::DispatchError;
use crate::instance::Instance;
use crate::request::Request;
use crate::util::redact_uri_for_logs;

/// Logical service name carried in the request target's host.
pub fn service_name(request: &Request) -> Result<&str, DispatchError> {
    match request.uri().host() {
        Some(host) if !host.trim().is_empty() => Ok(host),
        _ => Err(DispatchError::MissingServiceName {
            uri: redact_uri_for_logs(&request.uri().to_string()),
        }),
    }
}

/// Retargets `request` at `instance`.
///
/// Host and port come from the instance. A secure instance upgrades `http` to
/// `https` and `ws` to `wss`; any other scheme is kept. Path, query, user-info,
/// headers and body are carried over untouched. A target without a scheme is
/// treated as `http`.
pub fn rewrite(request: &Request, instance: &Instance) -> Result<Request, DispatchError> {
    let host = instance.host().trim();
    if host.is_empty() {
        return Err(invalid_instance(instance, "instance host is empty"));
    }

    let original = request.uri();
    let scheme = reconcile_scheme(original.scheme_str(), instance.is_secure());
    let authority = instance_authority(original, host, instance.port());

    let mut parts = original.clone().into_parts();
    parts.scheme = Some(
        scheme
            .parse::<Scheme>()
            .map_err(|_| invalid_instance(instance, format!("unsupported scheme {scheme}")))?,
    );
    parts.authority = Some(
        authority
            .parse::<Authority>()
            .map_err(|_| invalid_instance(instance, format!("invalid authority {authority}")))?,
    );
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    let uri = Uri::from_parts(parts)
        .map_err(|source| invalid_instance(instance, format!("cannot build target: {source}")))?;

    Ok(request.clone().with_uri(uri))
}

fn reconcile_scheme(original: Option<&str>, secure: bool) -> String {
    let original = original.unwrap_or("http");
    if secure {
        if original.eq_ignore_ascii_case("http") {
            return "https".to_owned();
        }
        if original.eq_ignore_ascii_case("ws") {
            return "wss".to_owned();
        }
    }
    original.to_owned()
}

fn instance_authority(original: &Uri, host: &str, port: Option<u16>) -> String {
    let mut authority = String::new();
    if let Some((userinfo, _)) = original
        .authority()
        .and_then(|authority| authority.as_str().rsplit_once('@'))
    {
        authority.push_str(userinfo);
        authority.push('@');
    }
    if host.contains(':') && !host.starts_with('[') {
        authority.push('[');
        authority.push_str(host);
        authority.push(']');
    } else {
        authority.push_str(host);
    }
    if let Some(port) = port {
        authority.push(':');
        authority.push_str(&port.to_string());
    }
    authority
}

fn invalid_instance(instance: &Instance, reason: impl Into<String>) -> DispatchError {
    DispatchError::InvalidInstance {
        service: instance.service_id().to_owned(),
        instance_id: instance.id().to_owned(),
        reason: reason.into(),
    }
}
