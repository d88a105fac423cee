//! End-to-end integration tests: a real listener, a real HTTP client, and
//! session state persisted to disk across an engine restart.

use std::path::Path;
use std::sync::Arc;

use reqctx_server::{ContextEngine, EngineConfig};
use reqctx_services::{
    JsonFileSessionStorage, JsonlActivityLog, SessionMonitor, SessionStoreRegistry,
};
use reqctx_transport::{TransportConfig, TransportServer};
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use serde_json::Value;
use tempfile::TempDir;

fn persistent_engine(dir: &Path) -> Arc<ContextEngine> {
    let monitor = SessionMonitor::new(
        Arc::new(JsonFileSessionStorage::new(dir.join("sessions.json"))),
        Arc::new(JsonlActivityLog::new(dir.join("activity.jsonl"))),
    );
    let engine = Arc::new(ContextEngine::new(EngineConfig::default(), monitor));
    engine.start();
    engine
}

async fn start_server(engine: Arc<ContextEngine>) -> TransportServer {
    let config = TransportConfig {
        port: 0,
        ..TransportConfig::default()
    };
    TransportServer::start(config, engine, Arc::new(SessionStoreRegistry::new()))
        .await
        .unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn session_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
        .expect("session cookie")
}

#[tokio::test]
async fn flash_survives_one_redirect_over_the_wire() {
    let dir = TempDir::new().unwrap();
    let engine = persistent_engine(dir.path());
    let mut server = start_server(engine.clone()).await;
    let base = format!("http://127.0.0.1:{}", server.port());
    let http = client();

    let response = http
        .post(format!("{base}/flash?key=notice&value=hello&to=/inbox"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FOUND);
    assert_eq!(
        response.headers().get(LOCATION).unwrap().to_str().unwrap(),
        "/view/inbox"
    );
    let cookie = session_cookie(&response);

    let body: Value = http
        .get(format!("{base}/view/inbox?read=notice"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["attributes"]["notice"], "hello");
    assert_eq!(body["redirected"], true);

    let body: Value = http
        .get(format!("{base}/view/inbox?read=notice"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["attributes"]["notice"], Value::Null);

    server.stop().await;
    engine.shutdown();
}

#[tokio::test]
async fn sessions_and_activity_persist_across_restart() {
    let dir = TempDir::new().unwrap();

    {
        let engine = persistent_engine(dir.path());
        let mut server = start_server(engine.clone()).await;
        let base = format!("http://127.0.0.1:{}", server.port());
        let http = client();

        let response = http
            .post(format!("{base}/login?user=alice"))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
        let cookie = session_cookie(&response);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["sessionId"], 0);

        let body: Value = http
            .get(format!("{base}/view/reports?quarter=q3"))
            .header(COOKIE, &cookie)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["user"]["name"], "alice");

        let response = http
            .post(format!("{base}/logout"))
            .header(COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        server.stop().await;
        engine.shutdown();
    }

    let log = JsonlActivityLog::new(dir.path().join("activity.jsonl"));
    let records = log.read_all().unwrap();
    let page = records
        .iter()
        .find(|a| a.text.as_deref().is_some_and(|t| t.contains("q3")))
        .expect("page request record");
    let text: Value = serde_json::from_str(page.text.as_deref().unwrap()).unwrap();
    assert_eq!(text["uri"], "/view/reports");
    assert_eq!(text["remoteAddress"], "127.0.0.1");

    let engine = persistent_engine(dir.path());
    let sessions = engine.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].state.as_str(), "INACTIVE");
    assert_eq!(sessions[0].user_name(), Some("alice"));

    let mut server = start_server(engine.clone()).await;
    let base = format!("http://127.0.0.1:{}", server.port());
    let body: Value = client()
        .post(format!("{base}/login?user=bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["sessionId"], 1);

    server.stop().await;
    engine.shutdown();
}
