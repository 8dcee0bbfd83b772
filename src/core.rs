use std::time::{Duration, Instant};

use crate::error::{SceniumError, SceniumResult};

pub use kurbo::{Affine, Point, Rect, Size, Vec2};

/// Stable identity of a server object, valid across batches.
///
/// Producers mint ids; the render context owns the objects behind them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct ServerObjectId(pub u64);

/// Closed set of server-object kinds.
///
/// The kind tag travels on the wire before an object exists, so dispatch is
/// a match over this enum rather than open-ended dynamic dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ObjectKind {
    ContainerVisual,
    DrawListVisual,
    SolidColorBrush,
    LinearGradientBrush,
    RadialGradientBrush,
    Pen,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::ContainerVisual => "ContainerVisual",
            Self::DrawListVisual => "DrawListVisual",
            Self::SolidColorBrush => "SolidColorBrush",
            Self::LinearGradientBrush => "LinearGradientBrush",
            Self::RadialGradientBrush => "RadialGradientBrush",
            Self::Pen => "Pen",
        }
    }

    pub fn is_visual(self) -> bool {
        matches!(self, Self::ContainerVisual | Self::DrawListVisual)
    }
}

/// Straight (non-premultiplied) RGBA8 color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Self = Self::rgba(0, 0, 0, 0);
    pub const BLACK: Self = Self::rgba(0, 0, 0, 255);
    pub const WHITE: Self = Self::rgba(255, 255, 255, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    /// Scale alpha by `opacity` in `[0, 1]`.
    pub fn with_opacity(self, opacity: f64) -> Self {
        let a = (f64::from(self.a) * opacity.clamp(0.0, 1.0)).round() as u8;
        Self { a, ..self }
    }
}

/// One stop of a gradient brush, offset in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GradientStop {
    pub offset: f64,
    pub color: Rgba8,
}

impl GradientStop {
    pub fn new(offset: f64, color: Rgba8) -> SceniumResult<Self> {
        if !(0.0..=1.0).contains(&offset) {
            return Err(SceniumError::validation(
                "gradient stop offset must be in [0, 1]",
            ));
        }
        Ok(Self { offset, color })
    }
}

/// Monotonic server-relative time source.
///
/// All timestamps handed to animations and batches are durations since the
/// compositor started, captured once per render cycle.
#[derive(Clone, Debug)]
pub struct ServerClock {
    started_at: Instant,
}

impl ServerClock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn now(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ServerClock {
    fn default() -> Self {
        Self::new()
    }
}
