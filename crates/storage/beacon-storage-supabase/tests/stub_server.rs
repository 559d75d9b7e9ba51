//! Prober and settings store against a local PostgREST stand-in
//!
//! The stand-in answers canned responses per path and records every request.

use axum::{
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use beacon_core::testing::ManualClock;
use beacon_core::{
    AttemptOutcome, BootstrapBuilder, BootstrapSettings, BeaconError, ConfigSource,
    Configuration, ConnectivityProber, Credentials, MemoryStore, PermissionLevel,
    RemoteSettingsStore, AUTH_ERROR, SETTING_KEYS,
};
use beacon_storage_supabase::{SupabaseProber, SupabaseSettingsStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One request as the stand-in saw it
#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    fn query(&self) -> &str {
        self.uri.query().unwrap_or("")
    }
}

#[derive(Default)]
struct PostgrestState {
    responses: HashMap<String, (StatusCode, String)>,
    requests: RwLock<Vec<Recorded>>,
}

struct Stub {
    base: String,
    state: Arc<PostgrestState>,
}

impl Stub {
    async fn requests(&self) -> Vec<Recorded> {
        self.state.requests.read().await.clone()
    }
}

async fn answer(
    State(state): State<Arc<PostgrestState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let (status, payload) = state
        .responses
        .get(uri.path())
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, String::new()));
    state.requests.write().await.push(Recorded {
        method,
        uri,
        headers,
        body,
    });
    (status, [(header::CONTENT_TYPE, "application/json")], payload)
}

async fn serve(routes: Vec<(&str, StatusCode, &str)>) -> Stub {
    let state = Arc::new(PostgrestState {
        responses: routes
            .into_iter()
            .map(|(path, status, body)| (path.to_string(), (status, body.to_string())))
            .collect(),
        ..Default::default()
    });
    let app = Router::new().fallback(answer).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Stub { base, state }
}

fn route<'a>(path: &'a str, status: StatusCode, body: &'a str) -> (&'a str, StatusCode, &'a str) {
    (path, status, body)
}

#[tokio::test]
async fn test_probe_reachable_with_read_permission() {
    let stub = serve(vec![
        route("/rest/v1/", StatusCode::OK, "{}"),
        route("/rest/v1/system_settings", StatusCode::OK, "[]"),
    ])
    .await;

    let result = SupabaseProber::new()
        .with_permission_check("system_settings")
        .probe(&Configuration::new(&stub.base, "anon-key"))
        .await;

    assert!(result.is_connected);
    assert_eq!(result.permission, PermissionLevel::Read);

    let requests = stub.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("apikey"), "anon-key");
    assert_eq!(requests[0].header("authorization"), "Bearer anon-key");
    assert_eq!(requests[1].uri.path(), "/rest/v1/system_settings");
    assert_eq!(requests[1].query(), "select=key&limit=1");
}

#[tokio::test]
async fn test_probe_restricted_permission_still_connects() {
    let stub = serve(vec![
        route("/rest/v1/", StatusCode::OK, "{}"),
        route(
            "/rest/v1/system_settings",
            StatusCode::FORBIDDEN,
            r#"{"code":"42501","message":"permission denied for table system_settings"}"#,
        ),
    ])
    .await;

    let result = SupabaseProber::new()
        .with_permission_check("system_settings")
        .probe(&Configuration::new(&stub.base, "anon-key"))
        .await;

    assert!(result.is_connected);
    assert_eq!(result.permission, PermissionLevel::Restricted);
}

#[tokio::test]
async fn test_probe_missing_root_counts_as_connected() {
    let stub = serve(vec![]).await;

    let result = SupabaseProber::new()
        .probe(&Configuration::new(&stub.base, "anon-key"))
        .await;

    assert!(result.is_connected);
    assert_eq!(result.permission, PermissionLevel::Unverified);
    assert_eq!(stub.requests().await.len(), 1);
}

#[tokio::test]
async fn test_probe_rejected_key_is_auth_error() {
    let stub = serve(vec![route(
        "/rest/v1/",
        StatusCode::UNAUTHORIZED,
        r#"{"message":"Invalid API key"}"#,
    )])
    .await;

    let result = SupabaseProber::new()
        .probe(&Configuration::new(&stub.base, "wrong"))
        .await;

    assert!(!result.is_connected);
    assert_eq!(result.error_code.as_deref(), Some(AUTH_ERROR));
    assert_eq!(result.error_kind(), beacon_core::ErrorKind::Auth);
}

#[tokio::test]
async fn test_probe_server_error_reports_status() {
    let stub = serve(vec![route("/rest/v1/", StatusCode::SERVICE_UNAVAILABLE, "")]).await;

    let result = SupabaseProber::new()
        .probe(&Configuration::new(&stub.base, "anon-key"))
        .await;

    assert!(!result.is_connected);
    assert_eq!(result.error_code.as_deref(), Some("http_503"));
}

#[tokio::test]
async fn test_fetch_settings_filters_keys() {
    let stub = serve(vec![route(
        "/rest/v1/system_settings",
        StatusCode::OK,
        r#"[{"key":"supabase_url","value":"https://real.supabase.co"},{"key":"initialized","value":true}]"#,
    )])
    .await;

    let store = SupabaseSettingsStore::new("system_settings");
    let rows = store
        .fetch_settings(&Credentials::new(&stub.base, "boot-key"), SETTING_KEYS)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].value.as_deref(), Some("true"));
    let requests = stub.requests().await;
    assert_eq!(requests[0].method, Method::GET);
    assert!(requests[0]
        .query()
        .starts_with("select=key,value&key=in.(supabase_url,supabase_anon_key"));
}

#[tokio::test]
async fn test_fetch_settings_surfaces_http_errors() {
    let stub = serve(vec![route("/rest/v1/system_settings", StatusCode::UNAUTHORIZED, "{}")]).await;

    let err = SupabaseSettingsStore::new("system_settings")
        .fetch_settings(&Credentials::new(&stub.base, "boot-key"), SETTING_KEYS)
        .await
        .unwrap_err();

    assert!(matches!(err, BeaconError::Http { status: 401, .. }));
}

#[tokio::test]
async fn test_publish_upserts_with_service_key() {
    let stub = serve(vec![route("/rest/v1/system_settings", StatusCode::CREATED, "")]).await;

    let written = SupabaseSettingsStore::new("system_settings")
        .publish_settings(
            &stub.base,
            "service-key",
            &Configuration::new("https://real.supabase.co", "anon-key"),
        )
        .await
        .unwrap();

    assert_eq!(written, 3);
    let request = stub.requests().await.remove(0);
    assert_eq!(request.method, Method::POST);
    assert_eq!(request.uri.path(), "/rest/v1/system_settings");
    assert_eq!(request.query(), "on_conflict=key");
    assert_eq!(request.header("authorization"), "Bearer service-key");
    assert!(request.header("prefer").contains("resolution=merge-duplicates"));

    let rows: Vec<serde_json::Value> = serde_json::from_str(&request.body).unwrap();
    let keys: Vec<&str> = rows.iter().filter_map(|r| r["key"].as_str()).collect();
    assert!(keys.contains(&"supabase_anon_key"));
    assert!(!request.body.contains("service-key"));
}

#[tokio::test]
async fn test_bootstrap_from_remote_settings_over_http() {
    // The settings point back at the stub so the assembled configuration probes cleanly
    let listener_stub = serve(vec![route("/rest/v1/", StatusCode::OK, "{}")]).await;
    let rows = format!(
        r#"[{{"key":"supabase_url","value":"{}"}},{{"key":"supabase_anon_key","value":"real-key"}}]"#,
        listener_stub.base
    );
    let bootstrap_stub = serve(vec![
        route("/rest/v1/", StatusCode::OK, "{}"),
        route("/rest/v1/system_settings", StatusCode::OK, &rows),
    ])
    .await;

    let settings = BootstrapSettings {
        environment: "stub".to_string(),
        ..Default::default()
    };
    let bootstrapper = BootstrapBuilder::new(
        settings,
        Arc::new(MemoryStore::new()),
        Arc::new(SupabaseProber::new()),
    )
    .clock(Arc::new(ManualClock::default()))
    .remote(
        Some(Credentials::new(&bootstrap_stub.base, "boot-key")),
        Arc::new(SupabaseSettingsStore::new("system_settings")),
    )
    .build();

    match bootstrapper.attempt().await.unwrap() {
        AttemptOutcome::Connected {
            configuration,
            source,
        } => {
            assert_eq!(source, ConfigSource::RemoteBootstrap);
            assert_eq!(configuration.url, listener_stub.base);
            assert_eq!(configuration.anon_key, "real-key");
        }
        other => panic!("expected a connection, got {:?}", other),
    }
    assert_eq!(listener_stub.requests().await.len(), 1);
}
