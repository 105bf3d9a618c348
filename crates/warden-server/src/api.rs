//! REST routes and handlers.
//!
//! Wire notes: `{kind}` in URLs is the plural string `blocklist` or
//! `whitelist`; every error is `{"error": "<message>"}`; conflicts on
//! create return 400 (the established wire contract), not 409.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use warden_filter::{ClientPolicy, Decision, FilterEngine, FilterError, ListKind};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FilterEngine>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
struct ListRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DomainsRequest {
    #[serde(default)]
    domains: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CheckResponse {
    #[serde(rename = "clientIP")]
    client_ip: String,
    domain: String,
    allowed: bool,
}

/// Error wrapper mapping engine failures onto the wire contract.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn invalid_json() -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: "invalid JSON body".to_string(),
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        let status = match &err {
            FilterError::NotFound { .. } => StatusCode::NOT_FOUND,
            FilterError::Timeout => StatusCode::REQUEST_TIMEOUT,
            FilterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/lists", get(get_all_lists))
        .route("/lists/{kind}", get(get_lists_by_kind).post(create_list))
        .route(
            "/lists/{kind}/{name}",
            get(get_list).put(update_list).delete(delete_list),
        )
        .route(
            "/lists/{kind}/{name}/domains",
            axum::routing::post(add_domains).delete(remove_domains),
        )
        .route("/clients", get(get_all_clients).post(create_client))
        .route(
            "/clients/{ip}",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/check/{ip}/{domain}", get(check_domain))
}

// === List handlers ===

async fn get_all_lists(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.engine.list_meta(None)?).into_response())
}

async fn get_lists_by_kind(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    Ok(Json(state.engine.list_meta(Some(kind))?).into_response())
}

async fn get_list(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    Ok(Json(state.engine.list(&name, kind)?).into_response())
}

async fn create_list(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;

    let content = state.engine.create_list(&body.name, kind, &body.domains)?;
    Ok((StatusCode::CREATED, Json(content)).into_response())
}

/// `name` and `type` come from the URL; any copies in the body are
/// ignored.
async fn update_list(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    body: Result<Json<ListRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;

    let content = state.engine.update_list(&name, kind, &body.domains)?;
    Ok(Json(content).into_response())
}

async fn delete_list(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    state.engine.delete_list(&name, kind)?;
    Ok(no_content())
}

// === Domain management handlers ===

async fn add_domains(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    body: Result<Json<DomainsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;

    state.engine.add_entries(&name, kind, &body.domains)?;
    Ok(Json(json!({})).into_response())
}

async fn remove_domains(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
    body: Result<Json<DomainsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let kind: ListKind = kind.parse()?;
    let Json(body) = body.map_err(|_| ApiError::invalid_json())?;

    state.engine.remove_entries(&name, kind, &body.domains)?;
    Ok(Json(json!({})).into_response())
}

// === Client handlers ===

async fn get_all_clients(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.engine.clients()?).into_response())
}

async fn get_client(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.engine.client(&ip)?).into_response())
}

async fn create_client(
    State(state): State<AppState>,
    body: Result<Json<ClientPolicy>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(policy) = body.map_err(|_| ApiError::invalid_json())?;
    let created = state.engine.create_client(policy)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

/// The client IP comes from the URL; any copy in the body is ignored.
async fn update_client(
    State(state): State<AppState>,
    Path(ip): Path<String>,
    body: Result<Json<ClientPolicy>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(mut policy) = body.map_err(|_| ApiError::invalid_json())?;
    policy.ip = ip;
    let updated = state.engine.update_client(policy)?;
    Ok(Json(updated).into_response())
}

async fn delete_client(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Response, ApiError> {
    state.engine.delete_client(&ip)?;
    Ok(no_content())
}

// === Lookup probe ===

async fn check_domain(
    State(state): State<AppState>,
    Path((ip, domain)): Path<(String, String)>,
) -> Response {
    let allowed = state.engine.decide(&ip, &domain) == Decision::Allow;
    Json(CheckResponse {
        client_ip: ip,
        domain,
        allowed,
    })
    .into_response()
}

fn no_content() -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::CONTENT_TYPE, "application/json")],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{header, Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;
    use crate::app;

    fn test_app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(FilterEngine::new(
            dir.path().join("clients.json"),
            dir.path().join("blocklists"),
            dir.path().join("whitelists"),
        ));
        engine.initialize().unwrap();
        (dir, app(engine))
    }

    async fn send(
        app: &Router,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = match body {
            Some(value) => Request::builder()
                .method(method)
                .uri(path)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        };
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn check(app: &Router, ip: &str, domain: &str) -> bool {
        let (status, body) =
            send(app, Method::GET, &format!("/api/check/{ip}/{domain}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["clientIP"], ip);
        assert_eq!(body["domain"], domain);
        body["allowed"].as_bool().unwrap()
    }

    #[tokio::test]
    async fn block_with_exception_flow() {
        let (_dir, app) = test_app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "ads", "domains": ["example.com !mail"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "ads");
        assert_eq!(body["type"], "blocklist");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/clients",
            Some(json!({
                "ip": "10.0.0.1",
                "blocklists": ["ads"],
                "whitelists": [],
                "mode": "blocklist"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        assert!(!check(&app, "10.0.0.1", "example.com").await);
        assert!(!check(&app, "10.0.0.1", "tracker.example.com").await);
        assert!(check(&app, "10.0.0.1", "mail.example.com").await);
        assert!(check(&app, "10.0.0.1", "other.com").await);
    }

    #[tokio::test]
    async fn whitelist_only_client() {
        let (_dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/whitelist",
            Some(json!({"name": "ok", "domains": ["work.example.com"]})),
        )
        .await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/clients",
            Some(json!({"ip": "10.0.0.2", "whitelists": ["ok"], "mode": "whitelist"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        assert!(check(&app, "10.0.0.2", "work.example.com").await);
        assert!(check(&app, "10.0.0.2", "deep.work.example.com").await);
        assert!(!check(&app, "10.0.0.2", "facebook.com").await);
    }

    #[tokio::test]
    async fn unknown_client_is_denied() {
        let (_dir, app) = test_app();
        assert!(!check(&app, "10.0.0.99", "example.com").await);
    }

    #[tokio::test]
    async fn list_deletion_cascades_to_clients() {
        let (dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "x", "domains": ["a.com"]})),
        )
        .await;
        send(
            &app,
            Method::POST,
            "/api/clients",
            Some(json!({"ip": "10.0.0.1", "blocklists": ["x"], "mode": "blocklist"})),
        )
        .await;

        let (status, _) = send(&app, Method::DELETE, "/api/lists/blocklist/x", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Method::GET, "/api/clients/10.0.0.1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blocklists"], json!([]));

        let doc: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("clients.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(doc["10.0.0.1"]["blocklists"], json!([]));
    }

    #[tokio::test]
    async fn add_then_remove_domains() {
        let (_dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "ads", "domains": []})),
        )
        .await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/lists/blocklist/ads/domains",
            Some(json!({"domains": ["a.com", "b.com !x"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/api/lists/blocklist/ads", None).await;
        let domains = body["domains"].as_array().unwrap();
        assert!(domains.contains(&json!("a.com")));
        assert!(domains.contains(&json!("b.com !x")));

        let (status, _) = send(
            &app,
            Method::DELETE,
            "/api/lists/blocklist/ads/domains",
            Some(json!({"domains": ["a.com"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/api/lists/blocklist/ads", None).await;
        assert_eq!(body["domains"], json!(["b.com !x"]));
    }

    #[tokio::test]
    async fn duplicate_create_conflicts_with_400() {
        let (_dir, app) = test_app();

        let payload = json!({"name": "ads", "domains": ["a.com"]});
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(payload.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) =
            send(&app, Method::POST, "/api/lists/blocklist", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn unknown_kind_is_bad_request() {
        let (_dir, app) = test_app();
        let (status, body) = send(&app, Method::GET, "/api/lists/greylist", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid list type"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (_dir, app) = test_app();
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/api/lists/blocklist")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid JSON body");
    }

    #[tokio::test]
    async fn missing_list_is_not_found() {
        let (_dir, app) = test_app();
        let (status, body) = send(&app, Method::GET, "/api/lists/blocklist/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn put_list_overrides_name_and_type_from_url() {
        let (_dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "ads", "domains": ["a.com"]})),
        )
        .await;

        // The body's name and type are ignored in favor of the URL.
        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/lists/blocklist/ads",
            Some(json!({"name": "other", "type": "whitelist", "domains": ["b.com"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "ads");
        assert_eq!(body["type"], "blocklist");
        assert_eq!(body["domains"], json!(["b.com"]));
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, app) = test_app();

        let (_, created) = send(
            &app,
            Method::POST,
            "/api/lists/whitelist",
            Some(json!({"name": "ok", "domains": ["b.com", "a.com !www"]})),
        )
        .await;

        let (status, fetched) = send(&app, Method::GET, "/api/lists/whitelist/ok", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["name"], created["name"]);
        assert_eq!(fetched["type"], created["type"]);

        let mut got: Vec<String> = fetched["domains"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        got.sort();
        assert_eq!(got, ["a.com !www", "b.com"]);
    }

    #[tokio::test]
    async fn client_update_and_delete() {
        let (_dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "ads", "domains": ["a.com"]})),
        )
        .await;
        send(
            &app,
            Method::POST,
            "/api/clients",
            Some(json!({"ip": "10.0.0.1", "blocklists": ["ads"], "mode": "blocklist"})),
        )
        .await;

        // The URL's IP wins over the body's.
        let (status, body) = send(
            &app,
            Method::PUT,
            "/api/clients/10.0.0.1",
            Some(json!({"ip": "10.9.9.9", "blocklists": [], "mode": "whitelist"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ip"], "10.0.0.1");
        assert_eq!(body["mode"], "whitelist");

        let (status, _) = send(&app, Method::DELETE, "/api/clients/10.0.0.1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, Method::GET, "/api/clients/10.0.0.1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn client_referencing_unknown_list_is_rejected() {
        let (_dir, app) = test_app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/clients",
            Some(json!({"ip": "10.0.0.1", "blocklists": ["ghost"], "mode": "blocklist"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("referenced blocklist not found"));
    }

    #[tokio::test]
    async fn list_index_reports_both_kinds() {
        let (_dir, app) = test_app();

        send(
            &app,
            Method::POST,
            "/api/lists/blocklist",
            Some(json!({"name": "ads", "domains": ["a.com", "b.com"]})),
        )
        .await;
        send(
            &app,
            Method::POST,
            "/api/lists/whitelist",
            Some(json!({"name": "ok", "domains": ["c.com"]})),
        )
        .await;

        let (status, body) = send(&app, Method::GET, "/api/lists", None).await;
        assert_eq!(status, StatusCode::OK);
        let all = body.as_array().unwrap();
        assert_eq!(all.len(), 2);

        let (status, body) = send(&app, Method::GET, "/api/lists/blocklist", None).await;
        assert_eq!(status, StatusCode::OK);
        let blocks = body.as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["name"], "ads");
        assert_eq!(blocks[0]["count"], 2);
        assert!(blocks[0]["lastModified"].is_string());
    }

    #[tokio::test]
    async fn responses_carry_json_content_type() {
        let (_dir, app) = test_app();
        let mut request = Request::builder()
            .method(Method::GET)
            .uri("/api/lists")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4242))));

        let response = app.clone().oneshot(request).await.unwrap();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.starts_with("application/json"));
    }
}
