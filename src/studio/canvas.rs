use std::time::Instant;

use eframe::egui;
use tracing::warn;

use crate::highlight::{Selection, apply_highlight_plan, highlight_plan};
use crate::raster::{parse_tree, preview_scale, rasterize_tree};
use crate::render::RenderedDiagram;
use crate::viewport::{Extent, Vector, Viewport};

const PREVIEW_SUPERSAMPLE: f32 = 2.0;
/// Scroll distance, in points, that counts as one zoom step.
const WHEEL_STEP_POINTS: f32 = 120.0;
const SELECTION_HINT: &str = "Click a node to highlight its connections";
const CANVAS_BACKGROUND: egui::Color32 = egui::Color32::from_rgb(249, 250, 251);
const OVERLAY_TEXT: egui::Color32 = egui::Color32::from_rgb(75, 85, 99);

struct PreviewTexture {
    handle: egui::TextureHandle,
}

/// Preview pane state: the displayed diagram, its selection and the viewport.
#[derive(Default)]
pub struct CanvasState {
    diagram: Option<RenderedDiagram>,
    selection: Selection,
    viewport: Viewport,
    fit_pending: bool,
    texture: Option<PreviewTexture>,
    texture_stale: bool,
    raster_error: Option<String>,
}

impl CanvasState {
    pub fn diagram(&self) -> Option<&RenderedDiagram> {
        self.diagram.as_ref()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn fit_pending(&self) -> bool {
        self.fit_pending
    }

    /// Mounts a freshly rendered diagram: clears the selection and schedules
    /// an auto-fit for the next frame.
    pub fn set_diagram(&mut self, diagram: RenderedDiagram) {
        self.viewport
            .set_content_size(Extent::new(diagram.width, diagram.height));
        self.diagram = Some(diagram);
        self.selection.clear();
        self.fit_pending = true;
        self.texture_stale = true;
    }

    /// Unmounts the diagram after a failed render. The viewport keeps its
    /// transform until the next successful render fits again.
    pub fn clear(&mut self) {
        self.diagram = None;
        self.selection.clear();
        self.fit_pending = false;
        self.texture = None;
        self.texture_stale = false;
        self.raster_error = None;
    }

    /// Runs the scheduled auto-fit once the preview area has a usable size.
    pub fn fit_if_pending(&mut self, area: Extent, now: Instant) -> Option<f32> {
        if !self.fit_pending || area.width <= 0.0 || area.height <= 0.0 {
            return None;
        }
        self.viewport.set_viewport_size(area);
        self.fit_pending = false;
        Some(self.viewport.auto_fit(now))
    }

    /// Selects the innermost node under a point in diagram coordinates, or
    /// clears the selection when the point hits no node.
    pub fn click_at(&mut self, point: Vector) {
        let hit = self
            .diagram
            .as_ref()
            .and_then(|diagram| diagram.graph.node_at(point.x, point.y))
            .map(|node| node.id.clone());
        let before = self.selection.clone();
        self.selection.click(hit.as_deref());
        if self.selection != before {
            self.texture_stale = true;
        }
    }

    /// Current markup with the highlight stylesheet applied.
    pub fn highlighted_markup(&self) -> Option<String> {
        let diagram = self.diagram.as_ref()?;
        let plan = highlight_plan(&diagram.graph, &self.selection);
        Some(apply_highlight_plan(
            &diagram.markup,
            diagram.graph.root_id.as_deref(),
            &plan,
        ))
    }

    pub fn overlay_text(&self) -> String {
        match self.selection.display_name() {
            Some(name) => format!("Selected: {name}"),
            None => SELECTION_HINT.to_owned(),
        }
    }

    pub fn show(&mut self, ui: &mut egui::Ui) {
        let (rect, response) =
            ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        let now = Instant::now();
        let area = Extent::new(rect.width(), rect.height());
        self.viewport.set_viewport_size(area);
        let _ = self.fit_if_pending(area, now);
        self.viewport.advance(now);

        if response.dragged() {
            let delta = response.drag_delta();
            self.viewport.pan_by(Vector::new(delta.x, delta.y));
        }

        if let Some(pointer) = response.hover_pos() {
            let anchor = Vector::new(pointer.x - rect.min.x, pointer.y - rect.min.y);
            let (scroll, pinch) = ui.input(|input| (input.smooth_scroll_delta.y, input.zoom_delta()));
            if pinch != 1.0 {
                self.viewport.zoom_at(anchor, pinch);
            } else if scroll != 0.0 {
                self.viewport.wheel_zoom(anchor, scroll, WHEEL_STEP_POINTS);
            }
        }

        if response.clicked() {
            if let Some(pointer) = response.interact_pointer_pos() {
                let local = Vector::new(pointer.x - rect.min.x, pointer.y - rect.min.y);
                self.click_at(self.viewport.screen_to_content(local));
            }
        }

        self.refresh_texture(ui.ctx());

        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 0.0, CANVAS_BACKGROUND);

        match (&self.diagram, &self.texture) {
            (Some(diagram), Some(texture)) => {
                let scale = self.viewport.scale();
                let translation = self.viewport.translation();
                let image_rect = egui::Rect::from_min_size(
                    rect.min + egui::vec2(translation.x, translation.y),
                    egui::vec2(diagram.width * scale, diagram.height * scale),
                );
                painter.image(
                    texture.handle.id(),
                    image_rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }
            _ => {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "Nothing rendered yet",
                    egui::FontId::proportional(14.0),
                    OVERLAY_TEXT,
                );
            }
        }

        let overlay = match &self.raster_error {
            Some(error) => format!("Preview unavailable: {error}"),
            None => self.overlay_text(),
        };
        painter.text(
            rect.left_bottom() + egui::vec2(12.0, -12.0),
            egui::Align2::LEFT_BOTTOM,
            overlay,
            egui::FontId::proportional(13.0),
            OVERLAY_TEXT,
        );

        if self.viewport.is_animating() {
            ui.ctx().request_repaint();
        }
    }

    fn refresh_texture(&mut self, ctx: &egui::Context) {
        if !self.texture_stale {
            return;
        }
        self.texture_stale = false;

        let Some(markup) = self.highlighted_markup() else {
            self.texture = None;
            return;
        };

        let rasterized = parse_tree(&markup).and_then(|tree| {
            let size = tree.size();
            let scale = preview_scale(size.width(), size.height(), PREVIEW_SUPERSAMPLE);
            rasterize_tree(&tree, scale)
        });
        match rasterized {
            Ok(pixmap) => {
                let image = egui::ColorImage::from_rgba_premultiplied(
                    [pixmap.width() as usize, pixmap.height() as usize],
                    pixmap.data(),
                );
                match &mut self.texture {
                    Some(texture) => texture.handle.set(image, egui::TextureOptions::LINEAR),
                    None => {
                        self.texture = Some(PreviewTexture {
                            handle: ctx.load_texture(
                                "diagram-preview",
                                image,
                                egui::TextureOptions::LINEAR,
                            ),
                        });
                    }
                }
                self.raster_error = None;
            }
            Err(error) => {
                warn!(error = %error, "failed to rasterize diagram preview");
                self.raster_error = Some(error.to_string());
            }
        }
    }
}
