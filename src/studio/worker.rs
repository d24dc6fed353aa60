use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::render::{DiagramRenderer, RenderAdapter};
use crate::repair::CodeRepairer;

use super::events::{StudioCommand, StudioEvent};

/// Runs render and repair commands on the tokio runtime. Each command gets its
/// own task, so render completions may arrive out of order; the session sorts
/// that out with attempt tokens.
pub fn spawn_runtime_worker<R, F>(
    handle: &Handle,
    adapter: Arc<RenderAdapter<R>>,
    repairer: Arc<F>,
    mut command_rx: UnboundedReceiver<StudioCommand>,
    event_tx: UnboundedSender<StudioEvent>,
) -> JoinHandle<()>
where
    R: DiagramRenderer,
    F: CodeRepairer,
{
    handle.spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                StudioCommand::Render { attempt, text } => {
                    let adapter = Arc::clone(&adapter);
                    let event_tx = event_tx.clone();
                    tokio::spawn(async move {
                        debug!(attempt, chars = text.chars().count(), "render started");
                        let event = match adapter.render(&text).await {
                            Ok(diagram) => StudioEvent::RenderSucceeded {
                                attempt,
                                diagram: Box::new(diagram),
                            },
                            Err(error) => {
                                debug!(attempt, error = %error, "render failed");
                                StudioEvent::RenderFailed { attempt, error }
                            }
                        };
                        let _ = event_tx.send(event);
                    });
                }
                StudioCommand::Repair { text, error } => {
                    let repairer = Arc::clone(&repairer);
                    let event_tx = event_tx.clone();
                    tokio::spawn(async move {
                        let event = match repairer.repair(&text, &error).await {
                            Ok(text) => StudioEvent::FixSucceeded { text },
                            Err(error) => {
                                warn!(error = %error, "auto-fix failed");
                                StudioEvent::FixFailed {
                                    error: error.to_string(),
                                }
                            }
                        };
                        let _ = event_tx.send(event);
                    });
                }
                StudioCommand::Shutdown => break,
            }
        }
    })
}
