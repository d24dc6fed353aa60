use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::{RendererBackend, RepairProvider, StudioSettings};
use crate::render::{DiagramRenderer, RenderError};
use crate::repair::{CodeRepairer, RepairError};

pub const FLOWCHART_SVG: &str = include_str!("../tests/fixtures/flowchart.svg");

pub fn temp_path(prefix: &str) -> PathBuf {
    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "mermaid_studio_{prefix}_{}_{}",
        std::process::id(),
        now_ns
    ))
}

pub fn remove_dir_if_exists(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

pub fn settings_for_test() -> StudioSettings {
    StudioSettings {
        repair_provider: RepairProvider::Ollama,
        repair_model: "qwen2.5-coder:7b".to_owned(),
        gemini_api_key: None,
        openai_api_key: None,
        gemini_base_url: "http://127.0.0.1:9".to_owned(),
        openai_base_url: "http://127.0.0.1:9/v1".to_owned(),
        ollama_base_url: "http://127.0.0.1:9".to_owned(),
        repair_timeout_ms: 1_000,
        renderer: RendererBackend::Merman,
        mmdc_path: "mmdc".to_owned(),
        kroki_base_url: "http://127.0.0.1:9".to_owned(),
        render_timeout_ms: 1_000,
        render_debounce_ms: 0,
        export_dir: temp_path("exports"),
    }
}

#[derive(Debug, Default)]
struct ScriptedRendererState {
    outcomes: HashMap<String, Result<String, String>>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
}

/// Renderer with canned outcomes keyed by the exact input text. Unknown text
/// is rejected. Clones share the script and the call counter.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRenderer {
    state: Arc<Mutex<ScriptedRendererState>>,
}

impl ScriptedRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_on(self, text: &str, svg: &str) -> Self {
        self.with_state(|state| {
            state.outcomes.insert(text.to_owned(), Ok(svg.to_owned()));
        })
    }

    pub fn fail_on(self, text: &str, message: &str) -> Self {
        self.with_state(|state| {
            state.outcomes.insert(text.to_owned(), Err(message.to_owned()));
        })
    }

    pub fn delay_on(self, text: &str, delay: Duration) -> Self {
        self.with_state(|state| {
            state.delays.insert(text.to_owned(), delay);
        })
    }

    pub fn call_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.calls.load(Ordering::SeqCst))
            .unwrap_or_default()
    }

    fn with_state(self, update: impl FnOnce(&mut ScriptedRendererState)) -> Self {
        if let Ok(mut state) = self.state.lock() {
            update(&mut state);
        }
        self
    }

    fn script_for(&self, text: &str) -> (Option<Result<String, String>>, Option<Duration>) {
        match self.state.lock() {
            Ok(state) => {
                state.calls.fetch_add(1, Ordering::SeqCst);
                (
                    state.outcomes.get(text).cloned(),
                    state.delays.get(text).copied(),
                )
            }
            Err(_) => (None, None),
        }
    }
}

impl DiagramRenderer for ScriptedRenderer {
    async fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        let (outcome, delay) = self.script_for(source);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Some(Ok(svg)) => Ok(svg),
            Some(Err(message)) => Err(RenderError::Rejected(message)),
            None => Err(RenderError::Rejected(format!(
                "Parse error on line 1:\nno scripted outcome for `{source}`"
            ))),
        }
    }
}

/// Repairer returning a fixed outcome and recording every request.
#[derive(Debug, Clone)]
pub struct ScriptedRepairer {
    outcome: Result<String, String>,
    delay: Duration,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedRepairer {
    pub fn fixing_to(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_owned()),
            delay: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    /// Fails every request as an empty model response.
    pub fn failing() -> Self {
        Self {
            outcome: Err(String::new()),
            delay: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(broken_code, error_message)` pairs received so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl CodeRepairer for ScriptedRepairer {
    async fn repair(&self, broken_code: &str, error_message: &str) -> Result<String, RepairError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((broken_code.to_owned(), error_message.to_owned()));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.outcome
            .clone()
            .map_err(|_| RepairError::EmptyResponse)
    }
}
