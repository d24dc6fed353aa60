use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use mermaid_studio::catalog::find_example;
use mermaid_studio::config::{RendererBackend, RepairProvider, StudioSettings};
use mermaid_studio::model::client::ModelClientError;
use mermaid_studio::render::{ConfiguredRenderer, DiagramRenderer, RenderAdapter, RenderError};
use mermaid_studio::repair::{CodeRepairer, RepairError, RepairService};
use mermaid_studio::test_support::{
    FLOWCHART_SVG, remove_dir_if_exists, settings_for_test, temp_path,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

const FIXED_CODE: &str = "flowchart TD\n    A[Start] --> B{Missing Bracket}\n    B --> C[End]";

#[derive(Debug, Clone)]
struct Reply {
    status: StatusCode,
    text: String,
}

#[derive(Debug, Clone, Default)]
struct Recorded {
    bodies: Vec<Value>,
    headers: Vec<HeaderMap>,
}

#[derive(Clone)]
struct FakeState {
    reply: Reply,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeState {
    fn record(&self, headers: HeaderMap, body: Value) {
        let mut recorded = self.recorded.lock().expect("record lock");
        recorded.headers.push(headers);
        recorded.bodies.push(body);
    }

    fn error_response(&self) -> Option<Response> {
        (!self.reply.status.is_success())
            .then(|| (self.reply.status, self.reply.text.clone()).into_response())
    }
}

struct FakeServer {
    base_url: String,
    recorded: Arc<Mutex<Recorded>>,
}

impl FakeServer {
    fn recorded(&self) -> Recorded {
        self.recorded.lock().expect("record lock").clone()
    }
}

/// Serves Kroki's `/mermaid/svg` and the three repair provider endpoints.
async fn start_fake_server(reply: Reply) -> Option<FakeServer> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(error) if error.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(error) => panic!("ephemeral port should be available for bind: {error}"),
    };
    let addr = listener
        .local_addr()
        .expect("listener should have local address");
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let state = FakeState {
        reply,
        recorded: Arc::clone(&recorded),
    };

    let app = Router::new()
        .route("/mermaid/svg", post(kroki_svg))
        .route("/v1beta/models/*rest", post(gemini_generate))
        .route("/v1/chat/completions", post(openai_chat))
        .route("/api/chat", post(ollama_chat))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Some(FakeServer {
        base_url: format!("http://{addr}"),
        recorded,
    })
}

async fn kroki_svg(body: String) -> Response {
    if body.contains("B{Missing Bracket\n") {
        return (
            StatusCode::BAD_REQUEST,
            "Error 400: Parse error on line 3:\n...B{Missing Bracket    B --> C[End]\n-----------------------^\nExpecting 'DIAMOND_STOP', got 'PE'",
        )
            .into_response();
    }
    (StatusCode::OK, FLOWCHART_SVG).into_response()
}

async fn gemini_generate(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record(headers, body);
    if let Some(response) = state.error_response() {
        return response;
    }
    Json(json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": state.reply.text }] } }]
    }))
    .into_response()
}

async fn openai_chat(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record(headers, body);
    if let Some(response) = state.error_response() {
        return response;
    }
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": state.reply.text } }]
    }))
    .into_response()
}

async fn ollama_chat(
    State(state): State<FakeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record(headers, body);
    if let Some(response) = state.error_response() {
        return response;
    }
    Json(json!({
        "message": { "role": "assistant", "content": state.reply.text },
        "done": true
    }))
    .into_response()
}

fn ok_reply(text: &str) -> Reply {
    Reply {
        status: StatusCode::OK,
        text: text.to_owned(),
    }
}

fn settings_for(server: &FakeServer, provider: RepairProvider) -> StudioSettings {
    let mut settings = settings_for_test();
    settings.repair_provider = provider;
    settings.repair_model = "test-model".to_owned();
    settings.gemini_base_url = server.base_url.clone();
    settings.openai_base_url = format!("{}/v1", server.base_url);
    settings.ollama_base_url = server.base_url.clone();
    settings.kroki_base_url = server.base_url.clone();
    settings.renderer = RendererBackend::Kroki;
    settings.repair_timeout_ms = 5_000;
    settings.render_timeout_ms = 5_000;
    settings
}

fn broken_code() -> &'static str {
    find_example("broken")
        .expect("broken example should exist")
        .code
}

#[tokio::test]
async fn gemini_repair_sends_key_and_low_temperature() {
    let reply = format!("```mermaid\n{FIXED_CODE}\n```");
    let Some(server) = start_fake_server(ok_reply(&reply)).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let mut settings = settings_for(&server, RepairProvider::Gemini);
    settings.gemini_api_key = Some("test-key".to_owned());

    let fixed = RepairService::new(settings)
        .repair(broken_code(), "Parse error on line 2:")
        .await
        .expect("repair should succeed");
    assert_eq!(fixed, FIXED_CODE);

    let recorded = server.recorded();
    assert_eq!(recorded.bodies.len(), 1);
    assert_eq!(
        recorded.headers[0]
            .get("x-goog-api-key")
            .and_then(|value| value.to_str().ok()),
        Some("test-key")
    );
    let body = &recorded.bodies[0];
    let temperature = body["generationConfig"]["temperature"]
        .as_f64()
        .expect("temperature should be set");
    assert!((temperature - 0.1).abs() < 1e-6);
    assert!(
        body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .is_some_and(|text| text.contains("expert Mermaid.js"))
    );
    let prompt = body["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("user prompt should be present");
    assert!(prompt.contains("Error Message: \"Parse error on line 2:\""));
    assert!(prompt.contains(broken_code()));
}

#[tokio::test]
async fn openai_repair_uses_bearer_auth() {
    let Some(server) = start_fake_server(ok_reply(FIXED_CODE)).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let mut settings = settings_for(&server, RepairProvider::OpenAi);
    settings.openai_api_key = Some("sk-test".to_owned());

    let fixed = RepairService::new(settings)
        .repair(broken_code(), "Parse error")
        .await
        .expect("repair should succeed");
    assert_eq!(fixed, FIXED_CODE);

    let recorded = server.recorded();
    assert_eq!(
        recorded.headers[0]
            .get("authorization")
            .and_then(|value| value.to_str().ok()),
        Some("Bearer sk-test")
    );
    assert_eq!(recorded.bodies[0]["model"], "test-model");
}

#[tokio::test]
async fn provider_http_error_is_a_transport_failure() {
    let reply = Reply {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        text: "model exploded".to_owned(),
    };
    let Some(server) = start_fake_server(reply).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };

    let error = RepairService::new(settings_for(&server, RepairProvider::Ollama))
        .repair(broken_code(), "Parse error")
        .await
        .expect_err("HTTP 500 should fail");

    match error {
        RepairError::Transport(ModelClientError::HttpStatus { status, body }) => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "model exploded");
        }
        other => panic!("unexpected repair error: {other}"),
    }
}

#[tokio::test]
async fn blank_model_reply_is_an_empty_response() {
    let Some(server) = start_fake_server(ok_reply("```mermaid\n\n```")).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };

    let error = RepairService::new(settings_for(&server, RepairProvider::Ollama))
        .repair(broken_code(), "Parse error")
        .await
        .expect_err("blank reply should fail");
    assert!(matches!(error, RepairError::EmptyResponse), "got: {error}");
}

#[tokio::test]
async fn kroki_backend_distinguishes_rejection_from_success() {
    let Some(server) = start_fake_server(ok_reply(FIXED_CODE)).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let settings = settings_for(&server, RepairProvider::Ollama);
    let renderer = ConfiguredRenderer::from_settings(&settings);

    let svg = renderer
        .render_svg(FIXED_CODE)
        .await
        .expect("valid text should render");
    assert!(svg.contains("flowchart-A-0"));

    let adapter = RenderAdapter::new(renderer, Duration::from_secs(5));
    let error = adapter
        .render(broken_code())
        .await
        .expect_err("broken text should be rejected");
    // Kroki counts the init directive as line 1 and prefixes its status;
    // the banner shows neither.
    assert!(matches!(error, RenderError::Rejected(_)), "got: {error}");
    assert_eq!(error.headline(), "Parse error on line 2:");
    assert!(error.to_string().ends_with("Expecting 'DIAMOND_STOP', got 'PE'"));
}

#[tokio::test]
async fn cli_fix_writes_repaired_diagram() {
    let Some(server) = start_fake_server(ok_reply(FIXED_CODE)).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let work_dir = temp_path("cli_fix");
    std::fs::create_dir_all(&work_dir).expect("work dir should be creatable");
    let diagram_path = work_dir.join("broken.mmd");
    std::fs::write(&diagram_path, broken_code()).expect("diagram should be writable");

    let output = cli_command(&server, &work_dir)
        .arg("fix")
        .arg(&diagram_path)
        .arg("--write")
        .output()
        .await
        .expect("CLI should run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "CLI failed: {stderr}");
    assert!(stderr.contains("render error: Parse error on line 2:"), "{stderr}");
    let written = std::fs::read_to_string(&diagram_path).expect("diagram should be readable");
    assert_eq!(written.trim_end(), FIXED_CODE);

    let recorded = server.recorded();
    assert_eq!(recorded.bodies.len(), 1, "exactly one repair request");
    remove_dir_if_exists(&work_dir);
}

#[tokio::test]
async fn cli_export_writes_png_into_out_dir() {
    let Some(server) = start_fake_server(ok_reply(FIXED_CODE)).await else {
        eprintln!("skipping: local TCP bind is not permitted in this environment");
        return;
    };
    let work_dir = temp_path("cli_export");
    std::fs::create_dir_all(&work_dir).expect("work dir should be creatable");
    let diagram_path = work_dir.join("flowchart.mmd");
    std::fs::write(&diagram_path, FIXED_CODE).expect("diagram should be writable");
    let out_dir = work_dir.join("out");

    let output = cli_command(&server, &work_dir)
        .arg("export")
        .arg(&diagram_path)
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .await
        .expect("CLI should run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "CLI failed: {stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let written = Path::new(stdout.trim());
    assert!(written.starts_with(&out_dir));
    let name = written
        .file_name()
        .and_then(|name| name.to_str())
        .expect("file name");
    assert!(name.starts_with("diagram-") && name.ends_with(".png"), "{name}");
    assert!(written.exists());
    assert!(server.recorded().bodies.is_empty(), "export never repairs");

    remove_dir_if_exists(&work_dir);
}

fn cli_command(server: &FakeServer, work_dir: &Path) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(env!("CARGO_BIN_EXE_mermaid_studio"));
    command
        .current_dir(work_dir)
        .env("REPAIR_PROVIDER", "ollama")
        .env("REPAIR_MODEL", "test-model")
        .env("OLLAMA_BASE_URL", &server.base_url)
        .env("DIAGRAM_RENDERER", "kroki")
        .env("KROKI_BASE_URL", &server.base_url)
        .env("REPAIR_TIMEOUT_MS", "5000")
        .env("RENDER_TIMEOUT_MS", "5000")
        .env("RUST_LOG", "error")
        .env_remove("STUDIO_LOG_DIR")
        .env_remove("STUDIO_EXPORT_DIR");
    command
}
