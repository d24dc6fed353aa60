use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use eframe::egui;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use crate::catalog::{DiagramExample, EXAMPLES};
use crate::config::StudioSettings;
use crate::export::{export_png, unix_millis};
use crate::render::{ConfiguredRenderer, RenderAdapter};
use crate::repair::RepairService;

pub mod canvas;
pub mod events;
pub mod session;
pub mod worker;

use self::canvas::CanvasState;
use self::events::{StudioCommand, StudioEvent};
use self::session::{EditSession, SessionEffect};
use self::worker::spawn_runtime_worker;

const APP_TITLE: &str = "Mermaid Studio";
const IDLE_REPAINT: Duration = Duration::from_millis(120);
const ERROR_BANNER_FILL: egui::Color32 = egui::Color32::from_rgb(254, 242, 242);
const ERROR_TEXT: egui::Color32 = egui::Color32::from_rgb(185, 28, 28);
const ACCENT: egui::Color32 = egui::Color32::from_rgb(79, 70, 229);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewMode {
    Editor,
    Split,
    Preview,
}

impl ViewMode {
    const ALL: [Self; 3] = [Self::Editor, Self::Split, Self::Preview];

    fn label(self) -> &'static str {
        match self {
            Self::Editor => "Editor",
            Self::Split => "Split",
            Self::Preview => "Preview",
        }
    }

    fn shows_editor(self) -> bool {
        matches!(self, Self::Editor | Self::Split)
    }

    fn shows_preview(self) -> bool {
        matches!(self, Self::Split | Self::Preview)
    }
}

pub fn run_studio(settings: &StudioSettings, initial_text: String) -> Result<()> {
    let runtime_handle = Handle::try_current().context("studio requires a tokio runtime")?;

    let (command_tx, command_rx) = unbounded_channel::<StudioCommand>();
    let (event_tx, event_rx) = unbounded_channel::<StudioEvent>();
    let adapter = RenderAdapter::new(
        ConfiguredRenderer::from_settings(settings),
        Duration::from_millis(settings.render_timeout_ms),
    );
    let _worker = spawn_runtime_worker(
        &runtime_handle,
        Arc::new(adapter),
        Arc::new(RepairService::new(settings.clone())),
        command_rx,
        event_tx,
    );
    info!(
        renderer = %settings.renderer,
        repair_provider = %settings.repair_provider,
        repair_model = %settings.repair_model,
        export_dir = %settings.export_dir.display(),
        "starting native studio shell"
    );

    let app_settings = settings.clone();
    eframe::run_native(
        APP_TITLE,
        eframe::NativeOptions::default(),
        Box::new(move |_cc| {
            Ok(Box::new(StudioApp::new(
                app_settings,
                initial_text,
                command_tx,
                event_rx,
            )))
        }),
    )
    .map_err(|error| anyhow::anyhow!("studio UI exited with error: {error}"))
}

struct StudioApp {
    settings: StudioSettings,
    command_tx: UnboundedSender<StudioCommand>,
    event_rx: UnboundedReceiver<StudioEvent>,
    session: EditSession,
    editor_text: String,
    canvas: CanvasState,
    view_mode: ViewMode,
    pending_example: Option<&'static DiagramExample>,
    notice: Option<String>,
    status: String,
    runtime_disconnected: bool,
}

impl StudioApp {
    fn new(
        settings: StudioSettings,
        initial_text: String,
        command_tx: UnboundedSender<StudioCommand>,
        event_rx: UnboundedReceiver<StudioEvent>,
    ) -> Self {
        let session = EditSession::new(
            initial_text.clone(),
            Duration::from_millis(settings.render_debounce_ms),
        );
        let mut app = Self {
            settings,
            command_tx,
            event_rx,
            session,
            editor_text: initial_text,
            canvas: CanvasState::default(),
            view_mode: ViewMode::Split,
            pending_example: None,
            notice: None,
            status: "Rendering...".to_owned(),
            runtime_disconnected: false,
        };
        let effects = app.session.start();
        app.apply_effects(effects);
        app
    }

    fn drain_events(&mut self) {
        loop {
            match self.event_rx.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.runtime_disconnected {
                        warn!("studio runtime worker disconnected");
                        self.status =
                            "Runtime worker disconnected. Restart studio to continue.".to_owned();
                    }
                    self.runtime_disconnected = true;
                    break;
                }
            }
        }
    }

    fn handle_event(&mut self, event: StudioEvent) {
        let effects = self.session.handle(event, Instant::now());
        self.apply_effects(effects);
    }

    fn apply_effects(&mut self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::Dispatch(command) => {
                    if let Err(error) = self.command_tx.send(command) {
                        self.runtime_disconnected = true;
                        self.status = format!("Failed to reach runtime worker: {error}");
                    }
                }
                SessionEffect::ShowDiagram(diagram) => {
                    self.status = format!(
                        "Rendered {} nodes, {} edges",
                        diagram.graph.nodes.len(),
                        diagram.graph.edges.len()
                    );
                    self.canvas.set_diagram(*diagram);
                }
                SessionEffect::ClearDiagram => {
                    self.status = "Render failed".to_owned();
                    self.canvas.clear();
                }
                SessionEffect::ReplaceText(text) => self.editor_text = text,
                SessionEffect::ShowNotice(message) => self.notice = Some(message),
            }
        }
    }

    fn export(&mut self) {
        match export_png(
            self.canvas.diagram(),
            &self.settings.export_dir,
            unix_millis(),
        ) {
            Ok(path) => self.status = format!("Exported {}", path.display()),
            Err(error) => {
                warn!(error = %error, "png export failed");
                self.status = format!("Export failed: {error}");
            }
        }
    }

    fn render_toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading(egui::RichText::new(APP_TITLE).color(ACCENT).strong());
            ui.add_space(12.0);
            for mode in ViewMode::ALL {
                ui.selectable_value(&mut self.view_mode, mode, mode.label());
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("Export PNG").clicked() {
                    self.export();
                }
                ui.separator();

                let now = Instant::now();
                if ui.button("+").on_hover_text("Zoom In").clicked() {
                    self.canvas.viewport_mut().zoom_in(now);
                }
                let percent = (self.canvas.viewport().scale() * 100.0).round();
                if ui
                    .button(format!("{percent}%"))
                    .on_hover_text("Reset View")
                    .clicked()
                {
                    self.canvas.viewport_mut().reset_view(now);
                }
                if ui.button("-").on_hover_text("Zoom Out").clicked() {
                    self.canvas.viewport_mut().zoom_out(now);
                }
            });
        });
    }

    fn render_editor_pane(&mut self, ui: &mut egui::Ui) {
        ui.horizontal_wrapped(|ui| {
            ui.label(egui::RichText::new("EXAMPLES:").small().strong());
            for example in &EXAMPLES {
                if ui.small_button(example.name).clicked() {
                    self.pending_example = Some(example);
                }
            }
        });
        ui.separator();

        let banner_height = if self.session.error().is_some() { 72.0 } else { 0.0 };
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new("Code").strong());
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.small_button("Clear").clicked() {
                    self.editor_text.clear();
                    self.handle_event(StudioEvent::TextChanged {
                        text: String::new(),
                    });
                }
            });
        });

        egui::ScrollArea::vertical()
            .max_height((ui.available_height() - banner_height - 24.0).max(120.0))
            .show(ui, |ui| {
                let response = ui.add(
                    egui::TextEdit::multiline(&mut self.editor_text)
                        .code_editor()
                        .hint_text("Enter Mermaid syntax here...")
                        .desired_width(f32::INFINITY)
                        .desired_rows(24),
                );
                if response.changed() {
                    let text = self.editor_text.clone();
                    self.handle_event(StudioEvent::TextChanged { text });
                }
            });

        self.render_error_banner(ui);
        ui.separator();
        ui.small(&self.status);
    }

    fn render_error_banner(&mut self, ui: &mut egui::Ui) {
        let Some(headline) = self.session.error_headline() else {
            return;
        };

        egui::Frame::new()
            .fill(ERROR_BANNER_FILL)
            .inner_margin(egui::Margin::same(8))
            .show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.vertical(|ui| {
                        ui.label(egui::RichText::new("Syntax Error").color(ERROR_TEXT).strong());
                        ui.label(egui::RichText::new(headline).color(ERROR_TEXT).monospace());
                    });
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let label = if self.session.is_fixing() {
                            "Fixing..."
                        } else {
                            "Auto-Fix"
                        };
                        let enabled = self.session.can_fix() && !self.runtime_disconnected;
                        if ui.add_enabled(enabled, egui::Button::new(label)).clicked() {
                            self.handle_event(StudioEvent::FixRequested);
                        }
                    });
                });
            });
    }

    fn render_example_confirm(&mut self, ctx: &egui::Context) {
        let Some(example) = self.pending_example else {
            return;
        };

        let mut decision = None;
        egui::Window::new(format!("Load \"{}\"", example.name))
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("This will replace your current code. Continue?");
                ui.horizontal(|ui| {
                    if ui.button("Replace").clicked() {
                        decision = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        decision = Some(false);
                    }
                });
            });

        match decision {
            Some(true) => {
                self.pending_example = None;
                self.editor_text = example.code.to_owned();
                self.handle_event(StudioEvent::TextChanged {
                    text: example.code.to_owned(),
                });
            }
            Some(false) => self.pending_example = None,
            None => {}
        }
    }

    fn render_notice(&mut self, ctx: &egui::Context) {
        let Some(message) = &self.notice else {
            return;
        };

        let mut dismissed = false;
        egui::Window::new("Auto-fix failed")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });

        if dismissed {
            self.notice = None;
        }
    }

    fn next_repaint(&self, now: Instant) -> Duration {
        self.session
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now).min(IDLE_REPAINT))
            .unwrap_or(IDLE_REPAINT)
    }
}

impl Drop for StudioApp {
    fn drop(&mut self) {
        let _ = self.command_tx.send(StudioCommand::Shutdown);
    }
}

impl eframe::App for StudioApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();
        let effects = self.session.poll(Instant::now());
        self.apply_effects(effects);

        egui::TopBottomPanel::top("studio_toolbar").show(ctx, |ui| self.render_toolbar(ui));

        match (self.view_mode.shows_editor(), self.view_mode.shows_preview()) {
            (true, true) => {
                egui::SidePanel::left("studio_editor_pane")
                    .resizable(true)
                    .default_width(420.0)
                    .min_width(320.0)
                    .show(ctx, |ui| self.render_editor_pane(ui));
                egui::CentralPanel::default().show(ctx, |ui| self.canvas.show(ui));
            }
            (true, false) => {
                egui::CentralPanel::default().show(ctx, |ui| self.render_editor_pane(ui));
            }
            _ => {
                egui::CentralPanel::default().show(ctx, |ui| self.canvas.show(ui));
            }
        }

        self.render_example_confirm(ctx);
        self.render_notice(ctx);

        ctx.request_repaint_after(self.next_repaint(Instant::now()));
    }
}
