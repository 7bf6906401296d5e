//! The forwarding proxy: resolve a connection, guarantee a fresh access
//! token, relay the request upstream, and stream the response back.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use zeroize::Zeroize;

use crate::errors::AppError;
use crate::AppState;

/// Query parameter reserved for account selection on proxy paths. Always
/// stripped before the request goes upstream.
const ACCOUNT_PARAM: &str = "account";

/// The main handler for all proxied requests.
#[tracing::instrument(skip_all, fields(req_id = %uuid::Uuid::new_v4().simple()))]
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    Path((provider, path)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    // -- 1. Resolve provider config; the store is not touched for unknown
    //       slugs.
    let provider_cfg = state
        .registry
        .get(&provider)
        .ok_or_else(|| AppError::UnknownProvider(provider.clone()))?
        .clone();

    // -- 2. Resolve the connection --
    let account = account_param(query.as_deref());
    let (record, account) = state.tokens.resolve(&provider, account.as_deref()).await?;

    // -- 3. Guarantee a usable access token; this is the only step with a
    //       side effect (the store write inside a refresh).
    let record = state.tokens.ensure_fresh(&provider_cfg, record).await?;
    let access_token = record.access_token.ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("refresh produced no access token"))
    })?;

    // -- 4. Build the upstream URL, minus the account selector --
    let upstream_url = build_upstream_url(&provider_cfg.base_url, &path, query.as_deref());

    // -- 5. Forwarded headers: inbound minus hop-by-hop, then our bearer.
    //       The caller's own authorization never goes upstream.
    let mut upstream_headers = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            upstream_headers.append(n, v);
        }
    }

    let mut bearer = format!("Bearer {}", access_token);
    upstream_headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("access token not header-safe")))?,
    );
    bearer.zeroize();

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid method: {}", e)))?;

    // -- 6. Forward. Body goes along verbatim for methods that carry one.
    let body = matches!(method.as_str(), "POST" | "PUT" | "PATCH").then_some(body);

    tracing::debug!(
        provider = %provider,
        account = %account,
        method = %method,
        path = %path,
        "forwarding request upstream"
    );

    let upstream_resp = state
        .upstream
        .forward(reqwest_method, &upstream_url, upstream_headers, body)
        .await?;

    // -- 7. Mirror the upstream status and stream the body back --
    let status = upstream_resp.status();
    let resp_headers = upstream_resp.headers().clone();

    let mut response = Response::builder()
        .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));

    for (name, value) in resp_headers.iter() {
        if strip_response_header(name.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            axum::http::HeaderName::from_bytes(name.as_str().as_bytes()),
            axum::http::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response = response.header(n, v);
        }
    }

    response
        .body(Body::from_stream(upstream_resp.bytes_stream()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("response build failed: {}", e)))
}

/// Request headers that must not travel upstream. `host` and
/// `authorization` are replaced rather than copied.
fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "authorization"
            | "content-length"
    )
}

/// Response headers that do not survive proxying. The transport already
/// decoded the content, so the encoding and length headers would lie.
fn strip_response_header(name: &str) -> bool {
    matches!(
        name,
        "connection" | "keep-alive" | "transfer-encoding" | "content-encoding" | "content-length"
    )
}

fn account_param(query: Option<&str>) -> Option<String> {
    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == ACCOUNT_PARAM)
            .map(|(_, v)| v.into_owned())
    })
}

fn build_upstream_url(base_url: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}/{}", base_url, path);
    if let Some(forwarded) = strip_account_query(query) {
        url.push('?');
        url.push_str(&forwarded);
    }
    url
}

/// The original query string with the reserved account selector removed;
/// `None` when nothing is left to forward.
fn strip_account_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let mut any = false;
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        if k == ACCOUNT_PARAM {
            continue;
        }
        serializer.append_pair(&k, &v);
        any = true;
    }
    any.then(|| serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_param_extracted() {
        assert_eq!(
            account_param(Some("account=daniel&x=1")),
            Some("daniel".to_string())
        );
        assert_eq!(account_param(Some("x=1")), None);
        assert_eq!(account_param(None), None);
    }

    #[test]
    fn account_selector_stripped_from_query() {
        assert_eq!(
            strip_account_query(Some("account=daniel&foo=bar")),
            Some("foo=bar".to_string())
        );
        assert_eq!(strip_account_query(Some("account=daniel")), None);
        assert_eq!(strip_account_query(None), None);
    }

    #[test]
    fn upstream_url_joins_base_path_and_query() {
        assert_eq!(
            build_upstream_url(
                "https://api.ouraring.com",
                "v2/usercollection/daily_sleep",
                Some("account=daniel&start_date=2024-01-01"),
            ),
            "https://api.ouraring.com/v2/usercollection/daily_sleep?start_date=2024-01-01"
        );
        assert_eq!(
            build_upstream_url("https://api.example.com", "x", None),
            "https://api.example.com/x"
        );
    }

    #[test]
    fn query_values_stay_encoded() {
        assert_eq!(
            strip_account_query(Some("q=a%20b&account=x")),
            Some("q=a+b".to_string())
        );
    }

    #[test]
    fn hop_by_hop_headers_not_forwarded() {
        for name in [
            "connection",
            "keep-alive",
            "proxy-authenticate",
            "proxy-authorization",
            "te",
            "trailers",
            "transfer-encoding",
            "upgrade",
            "host",
            "authorization",
        ] {
            assert!(is_hop_by_hop(name), "{} should be dropped", name);
        }
        assert!(!is_hop_by_hop("accept"));
        assert!(!is_hop_by_hop("x-custom"));
    }

    #[test]
    fn response_header_strip_set() {
        assert!(strip_response_header("content-encoding"));
        assert!(strip_response_header("transfer-encoding"));
        assert!(!strip_response_header("content-type"));
    }
}
