use std::future::Future;

use tracing::{info, warn};

use crate::config::{RepairProvider, StudioSettings};
use crate::model::client::{ModelClient, ModelClientError};

const SYSTEM_PROMPT: &str = "You are an expert Mermaid.js diagram developer. You repair Mermaid code that fails to render.";

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error("missing API key for {provider}; set {env_var} to enable auto-fix")]
    MissingCredential {
        provider: RepairProvider,
        env_var: &'static str,
    },

    #[error("repair request failed: {0}")]
    Transport(#[from] ModelClientError),

    #[error("repair service returned an empty response")]
    EmptyResponse,
}

/// Rewrites invalid diagram text given the renderer's error message.
pub trait CodeRepairer: Send + Sync + 'static {
    fn repair(
        &self,
        broken_code: &str,
        error_message: &str,
    ) -> impl Future<Output = Result<String, RepairError>> + Send;
}

#[derive(Debug, Clone)]
pub struct RepairService {
    client: ModelClient,
}

impl RepairService {
    pub fn new(settings: StudioSettings) -> Self {
        Self {
            client: ModelClient::new(settings),
        }
    }

    fn ensure_credential(&self) -> Result<(), RepairError> {
        let settings = self.client.settings();
        let Some(env_var) = settings.repair_provider.credential_env() else {
            return Ok(());
        };
        if settings.repair_credential().is_some() {
            return Ok(());
        }

        Err(RepairError::MissingCredential {
            provider: settings.repair_provider,
            env_var,
        })
    }
}

impl CodeRepairer for RepairService {
    async fn repair(&self, broken_code: &str, error_message: &str) -> Result<String, RepairError> {
        self.ensure_credential()?;

        let settings = self.client.settings();
        info!(
            provider = %settings.repair_provider,
            model = %settings.repair_model,
            input_chars = broken_code.chars().count(),
            "requesting diagram repair"
        );

        let prompt = build_repair_prompt(broken_code, error_message);
        let response = match self.client.chat(SYSTEM_PROMPT, &prompt).await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "diagram repair request failed");
                return Err(error.into());
            }
        };

        let fixed = strip_code_fences(&response.text);
        if fixed.trim().is_empty() {
            return Err(RepairError::EmptyResponse);
        }

        Ok(fixed.to_owned())
    }
}

pub fn build_repair_prompt(broken_code: &str, error_message: &str) -> String {
    format!(
        "The user has provided Mermaid code that is failing to render.\n\
         \n\
         Error Message: \"{error_message}\"\n\
         \n\
         Broken Code:\n\
         ```mermaid\n\
         {broken_code}\n\
         ```\n\
         \n\
         Task:\n\
         1. Analyze the syntax error.\n\
         2. Fix the code so it renders correctly while preserving the original intent.\n\
         3. Return ONLY the corrected Mermaid code. Do not wrap it in markdown code blocks. \
         Do not add explanations. Just the raw code string.\n"
    )
}

/// Removes an enclosing markdown fence (```` ```mermaid ```` or bare ```` ``` ````)
/// that models add despite being told not to.
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => "",
        };
    }

    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }

    body.trim_matches('\n').trim_end()
}
