//! Request mutation, merge policy, hop-by-hop stripping, and upstream
//! forwarding.

use std::collections::{HashMap, HashSet};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::datasources::RequestView;
use crate::errors::AppError;
use crate::resolver;
use crate::rules;

/// Headers that must never be forwarded, regardless of merge policy.
const HOP_BY_HOP: &[&str] = &[
    "keep-alive",
    "transfer-encoding",
    "te",
    "connection",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

pub async fn handle_request(
    config: &Config,
    client: &reqwest::Client,
    req: Request<Body>,
) -> Result<Response<Body>, AppError> {
    let (mut parts, body) = req.into_parts();

    let request_view = RequestView {
        method: parts.method.clone(),
        uri: parts.uri.clone(),
        headers: parts.headers.clone(),
    };
    let host = request_view
        .host()
        .map(str::to_string)
        .unwrap_or_default();

    if let Some(matched) = rules::select(&config.matches, &host, &parts.uri.to_string()) {
        let cancel = CancellationToken::new();
        let namespace = resolver::resolve(&matched.data_sources, &request_view, &cancel).await?;
        let produced = matched.header_builder.generate_headers(&namespace)?;
        enforce_error_if_missing(&matched.error_if_missing, &produced)?;
        merge_headers(&mut parts.headers, produced, &config.proxy.preserve_headers);
    }

    strip_hop_by_hop(&mut parts.headers);

    let target = target_url(&parts.uri, &parts.headers)?;
    let outbound = client
        .request(parts.method.clone(), target)
        .headers(parts.headers.clone())
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .build()
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let response = client
        .execute(outbound)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    if response.status().is_server_error() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::Upstream(format!("upstream replied {status}: {text}")));
    }

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut out = Response::builder().status(status);
    for (name, value) in response.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out = out.header(name, value);
        }
    }
    let body = Body::from_stream(response.bytes_stream());
    out.body(body).map_err(|e| AppError::Upstream(e.to_string()))
}

/// `errorIfMissing` enforcement: a header named there whose generated
/// value is absent or empty fails the request.
fn enforce_error_if_missing(
    error_if_missing: &[String],
    produced: &HashMap<String, Option<Vec<String>>>,
) -> Result<(), AppError> {
    for name in error_if_missing {
        let missing = match produced.get(name) {
            None => true,
            Some(None) => true,
            Some(Some(values)) => values.iter().all(|v| v.is_empty()),
        };
        if missing {
            return Err(AppError::data_source(format!(
                "required header '{name}' was not produced"
            )));
        }
    }
    Ok(())
}

/// Merge policy: a produced `None` schedules the header for removal;
/// otherwise the client's existing
/// values are cleared unless the header is in `preserve_headers`, in
/// which case produced values are appended after the client's.
fn merge_headers(
    headers: &mut HeaderMap,
    produced: HashMap<String, Option<Vec<String>>>,
    preserve_headers: &[String],
) {
    let preserve: HashSet<&str> = preserve_headers.iter().map(String::as_str).collect();

    for (name, values) in produced {
        let header_name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(_) => {
                warn!(header = %name, "produced header name is not a valid HTTP header name");
                continue;
            }
        };

        match values {
            None => {
                headers.remove(&header_name);
            }
            Some(values) => {
                if !preserve.contains(name.as_str()) {
                    headers.remove(&header_name);
                }
                for value in values {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        headers.append(header_name.clone(), value);
                    }
                }
            }
        }
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// The original destination for this request. A forward proxy
/// receives an absolute-form request target (`GET http://host/path
/// HTTP/1.1`); when the transport has already normalized that into a
/// relative target, the `Host` header supplies the authority instead.
fn target_url(uri: &axum::http::Uri, headers: &HeaderMap) -> Result<reqwest::Url, AppError> {
    if uri.scheme().is_some() {
        return reqwest::Url::parse(&uri.to_string())
            .map_err(|e| AppError::Upstream(format!("invalid request target: {e}")));
    }
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Upstream("request has no absolute URI and no Host header".to_string()))?;
    let rest = uri
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| "/".to_string());
    reqwest::Url::parse(&format!("http://{host}{rest}"))
        .map_err(|e| AppError::Upstream(format!("invalid request target: {e}")))
}
