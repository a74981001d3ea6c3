use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming as IncomingBody;
use hyper::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::message::{clean_headers, Headers, HEADER_FROM};
use crate::metrics;

type HttpResponse = Response<Full<Bytes>>;

const COOKIE_NAME: &str = "auth-token";

/// Maps one HTTP request onto the broker contract. Thin glue only: every
/// decision below is a status code around a broker, session or registry
/// call.
pub async fn handle_request(
    req: Request<IncomingBody>,
    ctx: AppContext,
) -> std::result::Result<HttpResponse, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method.as_str(), path.as_str()) {
        ("POST", "/auth") => handle_auth(req, &ctx).await,
        ("GET", "/new") => handle_new(req, &ctx).await,
        ("POST", "/proxy") => handle_proxy(req, &ctx).await,
        ("POST", "/send") => handle_send(req, &ctx).await,
        ("GET", "/key") => handle_private_key(req, &ctx).await,
        ("GET", _) if path.starts_with("/key/") => {
            handle_public_key(&path["/key/".len()..], &ctx).await
        }
        ("GET", "/logout") => handle_logout(req, &ctx).await,
        ("GET", "/health") => Ok(text_response(StatusCode::OK, "OK")),
        ("GET", "/metrics") => handle_metrics(),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    };

    Ok(response.unwrap_or_else(error_response))
}

#[derive(Debug, Deserialize)]
struct AuthRequest {
    #[serde(rename = "auth-module", default = "default_auth_module")]
    module: String,
    username: String,
    password: String,
}

fn default_auth_module() -> String {
    "internal".to_string()
}

async fn handle_auth(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    let wants_json = req
        .headers()
        .get(hyper::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    let body = read_body(req).await?;
    let auth: AuthRequest = serde_json::from_slice(&body)
        .map_err(|_| Error::authentication("no auth data"))?;

    let token = ctx
        .auth
        .authenticate(&auth.module, &auth.username, &auth.password, &ctx.sessions)
        .await?;

    if wants_json {
        return json_response(StatusCode::OK, &json!({ "result": "ok", "token": token }));
    }

    let cookie = ctx
        .sessions
        .cookie_header(&token)
        .await
        .ok_or_else(|| Error::config("freshly issued token has no session entry"))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(SET_COOKIE, cookie)
        .body(Full::new(Bytes::new()))
        .map_err(|e| Error::config(format!("cookie header unrepresentable: {e}")))
}

async fn handle_new(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    let username = authorize(&req, ctx).await?;

    match ctx.broker.fetch(&username).await? {
        None => Ok(empty_response(StatusCode::NO_CONTENT)),
        Some(telegram) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            for (name, value) in &telegram.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            builder
                .body(Full::new(Bytes::from(telegram.body)))
                .map_err(|e| Error::validation(format!("queued headers unrepresentable: {e}")))
        }
    }
}

async fn handle_proxy(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    let username = authorize(&req, ctx).await?;

    let mut headers = clean_headers(collect_headers(&req));
    headers.insert(HEADER_FROM.to_string(), username);

    let body = read_body(req).await?;
    ctx.broker
        .post(headers, String::from_utf8_lossy(&body).into_owned(), false)?;

    Ok(empty_response(StatusCode::CREATED))
}

async fn handle_send(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    let headers: Headers = collect_headers(&req);
    let body = read_body(req).await?;

    ctx.broker
        .post(headers, String::from_utf8_lossy(&body).into_owned(), true)?;

    Ok(empty_response(StatusCode::CREATED))
}

async fn handle_private_key(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    let username = authorize(&req, ctx).await?;

    let key = ctx
        .registry
        .private_key(&username)
        .ok_or_else(|| Error::routing(format!("user \"{username}\" has no key")))?;

    Ok(text_response(StatusCode::OK, key))
}

async fn handle_public_key(username: &str, ctx: &AppContext) -> Result<HttpResponse> {
    let key = ctx
        .registry
        .public_key(username)
        .ok_or_else(|| Error::routing(format!("user \"{username}\" has no key")))?;

    Ok(text_response(StatusCode::OK, key))
}

async fn handle_logout(req: Request<IncomingBody>, ctx: &AppContext) -> Result<HttpResponse> {
    if let Some(token) = cookie_token(&req) {
        ctx.sessions.kill(&token).await;
    }
    Ok(empty_response(StatusCode::NO_CONTENT))
}

fn handle_metrics() -> Result<HttpResponse> {
    let metrics_data = metrics::gather_metrics()
        .map_err(|e| Error::config(format!("failed to gather metrics: {e}")))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Full::new(Bytes::from(metrics_data)))
        .expect("static response"))
}

// ============================================================================
// Helpers
// ============================================================================

async fn authorize(req: &Request<IncomingBody>, ctx: &AppContext) -> Result<String> {
    let token = cookie_token(req).ok_or_else(|| Error::authorization("missing auth token"))?;
    ctx.sessions
        .validate(&token)
        .await
        .ok_or_else(|| Error::authorization("invalid or expired token"))
}

fn cookie_token(req: &Request<IncomingBody>) -> Option<String> {
    let cookies = req.headers().get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

fn collect_headers(req: &Request<IncomingBody>) -> Headers {
    req.headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn read_body(req: Request<IncomingBody>) -> Result<Bytes> {
    Ok(req
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::validation(format!("unreadable request body: {e}")))?
        .to_bytes())
}

fn text_response(status: StatusCode, body: impl Into<String>) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    response
}

fn empty_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Result<HttpResponse> {
    let body = serde_json::to_vec(value)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response"))
}

fn error_response(err: Error) -> HttpResponse {
    err.log();

    let status = err.status_code();
    let body = if status.is_server_error() {
        json!({ "error": "Internal server error", "error_code": err.error_code() })
    } else {
        json!({ "error": err.to_string(), "error_code": err.error_code() })
    };

    let bytes = serde_json::to_vec(&body)
        .unwrap_or_else(|_| b"{\"error\":\"Internal server error\"}".to_vec());

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, "application/json".parse().expect("static header"));
    response
}
