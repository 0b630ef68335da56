//! REST surface. Every handler is a passthrough to the [`CommandRouter`]:
//! it builds the equivalent `{cmd, val}` request, dispatches it, fans out
//! any control notification over the hub, and renders the reply.
//!
//! | Method | Path                     | Command            |
//! |--------|--------------------------|--------------------|
//! | GET    | `/health`                | (liveness, no origin check) |
//! | GET    | `/sysinfo`               | `get_system_info`  |
//! | GET    | `/metrics`               | `get_metrics`      |
//! | GET    | `/status`                | `module_status`    |
//! | GET    | `/{module}/get`          | `{module}_get`     |
//! | POST   | `/{module}/set/{value}`  | `{module}_set`     |
//! | POST   | `/volume/mute`           | `volume_mute`      |
//! | GET    | `/usb/drives`            | `usb_drives`       |
//! | GET    | `/usb/unmounted`         | `usb_unmounted`    |
//! | POST   | `/usb/mount`             | `usb_mount`        |
//! | POST   | `/usb/remove`            | `usb_remove`       |
//! | GET    | `/fs/list/{path}`        | `fs_list`          |
//! | GET    | `/fs/read/{path}`        | `fs_read`          |
//! | POST   | `/fs/write/{path}`       | `fs_write`         |
//! | POST   | `/fs/mkdir/{path}`       | `fs_mkdir`         |
//! | DELETE | `/fs/delete/{path}`      | `fs_delete`        |
//!
//! Errors are rendered as `{"error": <kind>, "message": ...}` with the
//! status from [`status_for`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use hostlink_middleware::ConnectionHub;
use hostlink_types::{Envelope, LinkError};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

pub fn build_router(hub: Arc<ConnectionHub>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sysinfo", get(sysinfo))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/volume/mute", post(volume_mute))
        .route("/usb/drives", get(usb_drives))
        .route("/usb/unmounted", get(usb_unmounted))
        .route("/usb/mount", post(usb_mount))
        .route("/usb/remove", post(usb_remove))
        .route("/fs/list/{*path}", get(fs_list))
        .route("/fs/read/{*path}", get(fs_read))
        .route("/fs/write/{*path}", post(fs_write))
        .route("/fs/mkdir/{*path}", post(fs_mkdir))
        .route("/fs/delete/{*path}", delete(fs_delete))
        .route("/{module}/get", get(module_get))
        .route("/{module}/set/{value}", get(module_set).post(module_set))
        .layer(middleware::from_fn_with_state(Arc::clone(&hub), check_origin))
        .with_state(hub)
}

/// HTTP status for an error kind.
pub fn status_for(kind: &str) -> StatusCode {
    match kind {
        "invalid_argument" => StatusCode::BAD_REQUEST,
        "path_rejected" | "origin_rejected" => StatusCode::FORBIDDEN,
        "unknown_command" => StatusCode::NOT_FOUND,
        "provider_failure" => StatusCode::BAD_GATEWAY,
        "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "provider_timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &LinkError) -> Response {
    let body = json!({ "error": err.kind(), "message": err.to_string() });
    (status_for(err.kind()), Json(body)).into_response()
}

fn render(reply: Envelope) -> Response {
    if !reply.is_error() {
        return Json(reply.val).into_response();
    }
    let kind = reply.val.get("kind").and_then(Value::as_str).unwrap_or("internal");
    let body = json!({ "error": kind, "message": reply.val.get("message").cloned().unwrap_or(Value::Null) });
    (status_for(kind), Json(body)).into_response()
}

async fn passthrough(hub: Arc<ConnectionHub>, cmd: &str, val: Value) -> Response {
    let dispatch = hub.router().dispatch(Envelope::new(cmd, val)).await;
    if let Some((class, env)) = &dispatch.notify {
        let report = hub.broadcast(*class, env);
        debug!(%cmd, delivered = report.delivered, "notification sent");
    }
    render(dispatch.reply)
}

/// Empty body → `null`; otherwise JSON.
fn json_body(body: &Bytes) -> Result<Value, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| error_response(&LinkError::InvalidArgument(format!("invalid JSON body: {e}"))))
}

// ── Origin check ────────────────────────────────────────────────────────────

async fn check_origin(State(hub): State<Arc<ConnectionHub>>, req: Request, next: Next) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0.ip());

    if let Err(e) = hub.policy().check(origin.as_deref(), peer) {
        warn!(origin = ?origin, peer = ?peer, path = %req.uri().path(), "http request refused");
        return error_response(&e);
    }

    let mut resp = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    if let Some(value) = origin.and_then(|o| HeaderValue::from_str(&o).ok()) {
        let headers = resp.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("content-type"));
        headers.insert(header::VARY, HeaderValue::from_static("origin"));
    }
    resp
}

// ── Handlers ────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn sysinfo(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "get_system_info", Value::Null).await
}

async fn metrics(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "get_metrics", Value::Null).await
}

async fn status(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "module_status", Value::Null).await
}

async fn volume_mute(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "volume_mute", Value::Null).await
}

async fn usb_drives(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "usb_drives", Value::Null).await
}

async fn usb_unmounted(State(hub): State<Arc<ConnectionHub>>) -> Response {
    passthrough(hub, "usb_unmounted", Value::Null).await
}

async fn module_get(State(hub): State<Arc<ConnectionHub>>, Path(module): Path<String>) -> Response {
    passthrough(hub, &format!("{module}_get"), Value::Null).await
}

async fn module_set(
    State(hub): State<Arc<ConnectionHub>>,
    Path((module, value)): Path<(String, String)>,
) -> Response {
    passthrough(hub, &format!("{module}_set"), Value::String(value)).await
}

async fn usb_mount(State(hub): State<Arc<ConnectionHub>>, body: Bytes) -> Response {
    match json_body(&body) {
        Ok(val) => passthrough(hub, "usb_mount", val).await,
        Err(resp) => resp,
    }
}

async fn usb_remove(State(hub): State<Arc<ConnectionHub>>, body: Bytes) -> Response {
    match json_body(&body) {
        Ok(val) => passthrough(hub, "usb_remove", val).await,
        Err(resp) => resp,
    }
}

#[derive(Debug, Default, Deserialize)]
struct FsParams {
    max_size: Option<u64>,
    max_entries: Option<u64>,
}

fn fs_args(path: String, params: FsParams) -> Value {
    let mut args = Map::new();
    args.insert("path".into(), Value::String(path));
    if let Some(n) = params.max_size {
        args.insert("max_size".into(), Value::from(n));
    }
    if let Some(n) = params.max_entries {
        args.insert("max_entries".into(), Value::from(n));
    }
    Value::Object(args)
}

async fn fs_list(
    State(hub): State<Arc<ConnectionHub>>,
    Path(path): Path<String>,
    Query(params): Query<FsParams>,
) -> Response {
    passthrough(hub, "fs_list", fs_args(path, params)).await
}

async fn fs_read(
    State(hub): State<Arc<ConnectionHub>>,
    Path(path): Path<String>,
    Query(params): Query<FsParams>,
) -> Response {
    passthrough(hub, "fs_read", fs_args(path, params)).await
}

/// Body is `{"content": ..., "type": "text"|"binary"}`; a body that is not
/// JSON is written verbatim as text.
async fn fs_write(State(hub): State<Arc<ConnectionHub>>, Path(path): Path<String>, body: Bytes) -> Response {
    let mut args = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = Map::new();
            map.insert(
                "content".into(),
                Value::String(String::from_utf8_lossy(&body).into_owned()),
            );
            map
        }
    };
    args.insert("path".into(), Value::String(path));
    passthrough(hub, "fs_write", Value::Object(args)).await
}

async fn fs_mkdir(State(hub): State<Arc<ConnectionHub>>, Path(path): Path<String>) -> Response {
    passthrough(hub, "fs_mkdir", json!({ "path": path })).await
}

async fn fs_delete(State(hub): State<Arc<ConnectionHub>>, Path(path): Path<String>) -> Response {
    passthrough(hub, "fs_delete", json!({ "path": path })).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::time::Duration;

    use hostlink_hal::{SharedProvider, SimProvider};
    use hostlink_kernel::{BlockingPool, MetricsCache, ModuleRegistry, OriginPolicy, PathGuard};
    use hostlink_middleware::{CommandRouter, RouterContext};
    use hostlink_types::{ModuleName, MountedVolume};
    use tokio::net::TcpListener;

    struct Harness {
        base: String,
        hub: Arc<ConnectionHub>,
        cache: Arc<MetricsCache>,
        guard: Arc<PathGuard>,
        client: reqwest::Client,
    }

    async fn start() -> Result<Harness, Box<dyn Error>> {
        let provider: SharedProvider = Arc::new(SimProvider::new());
        let cache = Arc::new(MetricsCache::new());
        let guard = Arc::new(PathGuard::new());
        let ctx = RouterContext::new(
            provider,
            Arc::clone(&cache),
            Arc::new(ModuleRegistry::default()),
            BlockingPool::new(2, Duration::from_secs(2)),
            Arc::clone(&guard),
        );
        let router = Arc::new(CommandRouter::new(ctx, &ModuleName::ALL));
        let hub = Arc::new(ConnectionHub::new(Arc::new(OriginPolicy::default()), router));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = build_router(Arc::clone(&hub));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
        });
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Harness { base: format!("http://{addr}"), hub, cache, guard, client })
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for("invalid_argument"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("path_rejected"), StatusCode::FORBIDDEN);
        assert_eq!(status_for("unknown_command"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("provider_timeout"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for("channel"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn cached_module_and_unknown_module() -> Result<(), Box<dyn Error>> {
        let h = start().await?;
        let resp = h.client.get(format!("{}/cpu/get", h.base)).send().await?;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        h.cache.put(ModuleName::Cpu, json!({"percent": 21.0}));
        let body: Value = h.client.get(format!("{}/cpu/get", h.base)).send().await?.json().await?;
        assert_eq!(body["value"]["percent"], 21.0);

        let resp = h.client.get(format!("{}/toaster/get", h.base)).send().await?;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = resp.json().await?;
        assert_eq!(body["error"], "unknown_command");
        Ok(())
    }

    #[tokio::test]
    async fn set_broadcasts_to_socket_clients() -> Result<(), Box<dyn Error>> {
        let h = start().await?;
        let mut reg = h.hub.accept(Some("http://localhost:3000"), None)?;
        while reg.outbound.try_recv().is_ok() {}

        let body: Value = h
            .client
            .post(format!("{}/volume/set/120", h.base))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(body["percent"], 100);

        let text = reg.outbound.try_recv()?;
        let env: Envelope = serde_json::from_str(&text)?;
        assert_eq!(env, Envelope::new("volume_update", json!({"percent": 100})));
        Ok(())
    }

    #[tokio::test]
    async fn foreign_origin_gets_403_but_health_is_open() -> Result<(), Box<dyn Error>> {
        let h = start().await?;
        let resp = h
            .client
            .get(format!("{}/metrics", h.base))
            .header("Origin", "https://evil.example")
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = resp.json().await?;
        assert_eq!(body["error"], "origin_rejected");

        let resp = h
            .client
            .get(format!("{}/health", h.base))
            .header("Origin", "https://evil.example")
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = h
            .client
            .get(format!("{}/metrics", h.base))
            .header("Origin", "https://turbowarp.org")
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("https://turbowarp.org")
        );
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_round_trip_and_rejection() -> Result<(), Box<dyn Error>> {
        let h = start().await?;
        let dir = tempfile::tempdir()?;
        h.guard.replace_volumes(vec![MountedVolume {
            root_path: dir.path().to_path_buf(),
            label: "STICK".into(),
            filesystem_kind: "vfat".into(),
            device: "/dev/sdz1".into(),
        }]);
        let rel = dir.path().display().to_string();
        let rel = rel.trim_start_matches('/');

        let resp = h
            .client
            .post(format!("{}/fs/write/{rel}/a.txt", h.base))
            .body(r#"{"content":"hi"}"#)
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = h
            .client
            .get(format!("{}/fs/read/{rel}/a.txt", h.base))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(body["content"], "hi");

        let resp = h.client.get(format!("{}/fs/read/etc/passwd", h.base)).send().await?;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: Value = resp.json().await?;
        assert_eq!(body["error"], "path_rejected");

        let resp = h.client.delete(format!("{}/fs/delete/{rel}/a.txt", h.base)).send().await?;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!dir.path().join("a.txt").exists());
        Ok(())
    }
}
