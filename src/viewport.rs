//! Pan/zoom state over the rendered diagram.
//!
//! Screen position of a diagram point `p` is `translation + p * scale`,
//! relative to the top-left corner of the preview area.

use std::time::{Duration, Instant};

pub const MIN_SCALE: f32 = 0.05;
pub const MAX_SCALE: f32 = 100.0;
/// Auto-fit never zooms a small diagram past 100%.
pub const MAX_FIT_SCALE: f32 = 1.0;
pub const FIT_PADDING: f32 = 40.0;
/// One zoom step, in natural-log units of scale.
pub const ZOOM_STEP: f32 = 0.5;
pub const BUTTON_ZOOM_DURATION: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
}

impl Vector {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extent {
    pub width: f32,
    pub height: f32,
}

impl Extent {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    pub scale: f32,
    pub translation: Vector,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            translation: Vector::default(),
        }
    }
}

impl ViewportState {
    fn lerp(&self, target: &Self, t: f32) -> Self {
        Self {
            scale: self.scale + (target.scale - self.scale) * t,
            translation: Vector::new(
                self.translation.x + (target.translation.x - self.translation.x) * t,
                self.translation.y + (target.translation.y - self.translation.y) * t,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transition {
    from: ViewportState,
    to: ViewportState,
    started_at: Instant,
    duration: Duration,
}

/// Scale that frames content of `content` size inside `viewport`, kept in
/// `[MIN_SCALE, MAX_FIT_SCALE]`.
pub fn fit_scale(content: Extent, viewport: Extent, padding: f32) -> f32 {
    if !content.is_usable() {
        return MAX_FIT_SCALE;
    }

    let width_ratio = (viewport.width - 2.0 * padding) / content.width;
    let height_ratio = (viewport.height - 2.0 * padding) / content.height;
    let scale = width_ratio.min(height_ratio);
    if !scale.is_finite() {
        return MIN_SCALE;
    }

    scale.clamp(MIN_SCALE, MAX_FIT_SCALE)
}

pub fn clamp_scale(scale: f32) -> f32 {
    if scale.is_finite() {
        scale.clamp(MIN_SCALE, MAX_SCALE)
    } else {
        1.0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Viewport {
    state: ViewportState,
    content: Extent,
    viewport: Extent,
    transition: Option<Transition>,
}

impl Viewport {
    pub fn state(&self) -> ViewportState {
        self.state
    }

    pub fn scale(&self) -> f32 {
        self.state.scale
    }

    pub fn translation(&self) -> Vector {
        self.state.translation
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    pub fn set_content_size(&mut self, content: Extent) {
        self.content = content;
    }

    pub fn set_viewport_size(&mut self, viewport: Extent) {
        self.viewport = viewport;
    }

    /// Frames the whole diagram instantly. Returns the applied scale.
    pub fn auto_fit(&mut self, now: Instant) -> f32 {
        let scale = fit_scale(self.content, self.viewport, FIT_PADDING);
        self.center_view(scale, Duration::ZERO, now);
        scale
    }

    /// Centers the content at `scale`, animated over `duration`.
    pub fn center_view(&mut self, scale: f32, duration: Duration, now: Instant) {
        let scale = clamp_scale(scale);
        let target = ViewportState {
            scale,
            translation: Vector::new(
                (self.viewport.width - self.content.width * scale) / 2.0,
                (self.viewport.height - self.content.height * scale) / 2.0,
            ),
        };
        self.transition_to(target, duration, now);
    }

    pub fn reset_view(&mut self, now: Instant) {
        self.center_view(1.0, BUTTON_ZOOM_DURATION, now);
    }

    pub fn zoom_in(&mut self, now: Instant) {
        self.zoom_steps(1.0, now);
    }

    pub fn zoom_out(&mut self, now: Instant) {
        self.zoom_steps(-1.0, now);
    }

    fn zoom_steps(&mut self, steps: f32, now: Instant) {
        let base = self.settled_state();
        let center = Vector::new(self.viewport.width / 2.0, self.viewport.height / 2.0);
        let target = zoomed_about(base, center, base.scale * (steps * ZOOM_STEP).exp());
        self.transition_to(target, BUTTON_ZOOM_DURATION, now);
    }

    /// Zooms by `factor` keeping the diagram point under `anchor` fixed.
    pub fn zoom_at(&mut self, anchor: Vector, factor: f32) {
        self.transition = None;
        self.state = zoomed_about(self.state, anchor, self.state.scale * factor);
    }

    /// Converts a wheel delta (in `wheel_unit`s per zoom step) into a zoom.
    pub fn wheel_zoom(&mut self, anchor: Vector, delta: f32, wheel_unit: f32) {
        if delta == 0.0 || wheel_unit <= 0.0 {
            return;
        }
        self.zoom_at(anchor, (delta / wheel_unit * ZOOM_STEP).exp());
    }

    pub fn pan_by(&mut self, delta: Vector) {
        self.transition = None;
        self.state.translation.x += delta.x;
        self.state.translation.y += delta.y;
    }

    /// Steps any running transition. Call once per frame.
    pub fn advance(&mut self, now: Instant) {
        let Some(transition) = self.transition else {
            return;
        };

        let elapsed = now.saturating_duration_since(transition.started_at);
        if elapsed >= transition.duration {
            self.state = transition.to;
            self.transition = None;
            return;
        }

        let t = elapsed.as_secs_f32() / transition.duration.as_secs_f32();
        let eased = 1.0 - (1.0 - t).powi(3);
        self.state = transition.from.lerp(&transition.to, eased);
    }

    pub fn screen_to_content(&self, screen: Vector) -> Vector {
        Vector::new(
            (screen.x - self.state.translation.x) / self.state.scale,
            (screen.y - self.state.translation.y) / self.state.scale,
        )
    }

    pub fn content_to_screen(&self, content: Vector) -> Vector {
        Vector::new(
            self.state.translation.x + content.x * self.state.scale,
            self.state.translation.y + content.y * self.state.scale,
        )
    }

    fn settled_state(&self) -> ViewportState {
        self.transition
            .map(|transition| transition.to)
            .unwrap_or(self.state)
    }

    fn transition_to(&mut self, target: ViewportState, duration: Duration, now: Instant) {
        if duration.is_zero() {
            self.state = target;
            self.transition = None;
            return;
        }

        self.transition = Some(Transition {
            from: self.state,
            to: target,
            started_at: now,
            duration,
        });
    }
}

fn zoomed_about(state: ViewportState, anchor: Vector, scale: f32) -> ViewportState {
    let scale = clamp_scale(scale);
    let content_x = (anchor.x - state.translation.x) / state.scale;
    let content_y = (anchor.y - state.translation.y) / state.scale;
    ViewportState {
        scale,
        translation: Vector::new(anchor.x - content_x * scale, anchor.y - content_y * scale),
    }
}
