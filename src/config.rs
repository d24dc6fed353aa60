use std::env;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow, ensure};

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5-coder:7b";
pub const DEFAULT_REPAIR_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MMDC_PATH: &str = "mmdc";
pub const DEFAULT_KROKI_BASE_URL: &str = "https://kroki.io";
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_RENDER_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairProvider {
    Gemini,
    OpenAi,
    Ollama,
}

impl RepairProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Ollama => DEFAULT_OLLAMA_MODEL,
        }
    }

    /// Environment variable holding the provider credential, if it needs one.
    pub fn credential_env(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl Display for RepairProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepairProvider {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!(
                "invalid REPAIR_PROVIDER `{other}`; expected `gemini`, `openai` or `ollama`"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererBackend {
    Merman,
    MermaidCli,
    Kroki,
}

impl RendererBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merman => "merman",
            Self::MermaidCli => "mmdc",
            Self::Kroki => "kroki",
        }
    }
}

impl Display for RendererBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RendererBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "merman" => Ok(Self::Merman),
            "mmdc" | "mermaid-cli" => Ok(Self::MermaidCli),
            "kroki" => Ok(Self::Kroki),
            other => Err(anyhow!(
                "invalid DIAGRAM_RENDERER `{other}`; expected `merman`, `mmdc` or `kroki`"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioSettings {
    pub repair_provider: RepairProvider,
    pub repair_model: String,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_base_url: String,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    pub repair_timeout_ms: u64,
    pub renderer: RendererBackend,
    pub mmdc_path: String,
    pub kroki_base_url: String,
    pub render_timeout_ms: u64,
    pub render_debounce_ms: u64,
    pub export_dir: PathBuf,
}

impl StudioSettings {
    pub fn from_env() -> Result<Self> {
        // Load .env if present, but do not fail if file does not exist.
        let _ = dotenvy::dotenv();

        let repair_provider = env::var("REPAIR_PROVIDER")
            .unwrap_or_else(|_| RepairProvider::Gemini.as_str().to_owned())
            .parse::<RepairProvider>()
            .context("failed to parse REPAIR_PROVIDER")?;

        let repair_model = env::var("REPAIR_MODEL")
            .unwrap_or_else(|_| repair_provider.default_model().to_owned());
        ensure!(
            !repair_model.trim().is_empty(),
            "REPAIR_MODEL cannot be empty"
        );

        // Credentials stay optional here; a missing key is reported when a
        // repair is requested so the editor stays usable without one.
        let gemini_api_key =
            read_optional_env("GEMINI_API_KEY").or_else(|| read_optional_env("API_KEY"));
        let openai_api_key = read_optional_env("OPENAI_API_KEY");

        let gemini_base_url = read_url_env("GEMINI_BASE_URL", DEFAULT_GEMINI_BASE_URL)?;
        let openai_base_url = read_url_env("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL)?;
        let ollama_base_url = read_url_env("OLLAMA_BASE_URL", DEFAULT_OLLAMA_BASE_URL)?;

        let repair_timeout_ms = parse_u64_env("REPAIR_TIMEOUT_MS", DEFAULT_REPAIR_TIMEOUT_MS)?;
        ensure!(
            repair_timeout_ms > 0,
            "REPAIR_TIMEOUT_MS must be greater than 0"
        );

        let renderer = env::var("DIAGRAM_RENDERER")
            .unwrap_or_else(|_| RendererBackend::Merman.as_str().to_owned())
            .parse::<RendererBackend>()
            .context("failed to parse DIAGRAM_RENDERER")?;

        let mmdc_path = env::var("MMDC_PATH").unwrap_or_else(|_| DEFAULT_MMDC_PATH.to_owned());
        ensure!(!mmdc_path.trim().is_empty(), "MMDC_PATH cannot be empty");

        let kroki_base_url = read_url_env("KROKI_BASE_URL", DEFAULT_KROKI_BASE_URL)?;

        let render_timeout_ms = parse_u64_env("RENDER_TIMEOUT_MS", DEFAULT_RENDER_TIMEOUT_MS)?;
        ensure!(
            render_timeout_ms > 0,
            "RENDER_TIMEOUT_MS must be greater than 0"
        );

        let render_debounce_ms =
            parse_u64_env("RENDER_DEBOUNCE_MS", DEFAULT_RENDER_DEBOUNCE_MS)?;

        let export_dir = read_optional_env("STUDIO_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            repair_provider,
            repair_model,
            gemini_api_key,
            openai_api_key,
            gemini_base_url,
            openai_base_url,
            ollama_base_url,
            repair_timeout_ms,
            renderer,
            mmdc_path,
            kroki_base_url,
            render_timeout_ms,
            render_debounce_ms,
            export_dir,
        })
    }

    /// Credential for the configured repair provider, if one is set.
    pub fn repair_credential(&self) -> Option<&str> {
        match self.repair_provider {
            RepairProvider::Gemini => self.gemini_api_key.as_deref(),
            RepairProvider::OpenAi => self.openai_api_key.as_deref(),
            RepairProvider::Ollama => None,
        }
    }
}

fn read_optional_env(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    })
}

fn read_url_env(name: &str, default: &str) -> Result<String> {
    let value = env::var(name).unwrap_or_else(|_| default.to_owned());
    ensure!(!value.trim().is_empty(), "{name} cannot be empty");
    Ok(value.trim().trim_end_matches('/').to_owned())
}

fn parse_u64_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("failed to parse {name} as u64")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{RendererBackend, RepairProvider};

    #[test]
    fn repair_provider_parses_case_insensitively() {
        assert_eq!(
            " Gemini ".parse::<RepairProvider>().ok(),
            Some(RepairProvider::Gemini)
        );
        assert_eq!(
            "OPENAI".parse::<RepairProvider>().ok(),
            Some(RepairProvider::OpenAi)
        );
        assert_eq!(
            "ollama".parse::<RepairProvider>().ok(),
            Some(RepairProvider::Ollama)
        );

        let error = "claude"
            .parse::<RepairProvider>()
            .expect_err("unknown provider should fail");
        assert!(error.to_string().contains("REPAIR_PROVIDER"));
    }

    #[test]
    fn only_hosted_providers_need_credentials() {
        assert_eq!(
            RepairProvider::Gemini.credential_env(),
            Some("GEMINI_API_KEY")
        );
        assert_eq!(
            RepairProvider::OpenAi.credential_env(),
            Some("OPENAI_API_KEY")
        );
        assert_eq!(RepairProvider::Ollama.credential_env(), None);
    }

    #[test]
    fn renderer_backend_accepts_cli_alias() {
        assert_eq!(
            "mermaid-cli".parse::<RendererBackend>().ok(),
            Some(RendererBackend::MermaidCli)
        );
        assert_eq!(
            "Kroki".parse::<RendererBackend>().ok(),
            Some(RendererBackend::Kroki)
        );
        assert_eq!(
            " merman ".parse::<RendererBackend>().ok(),
            Some(RendererBackend::Merman)
        );
        assert!("graphviz".parse::<RendererBackend>().is_err());
    }
}
