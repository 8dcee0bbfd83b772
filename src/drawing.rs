use crate::{
    animation::Lerp,
    core::{Affine, GradientStop, Point, Rect, Rgba8, ServerObjectId},
    error::{SceniumError, SceniumResult},
    graph::Graph,
};

/// One entry of a draw-list visual's command list.
///
/// Commands are plain value objects so the wire format stays inspectable;
/// brush and pen fields reference server objects by id and are resolved to
/// immutable values at replay time.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum DrawCommand {
    Clear {
        color: Rgba8,
    },
    DrawRectangle {
        brush: Option<ServerObjectId>,
        pen: Option<ServerObjectId>,
        rect: Rect,
    },
    DrawEllipse {
        brush: Option<ServerObjectId>,
        pen: Option<ServerObjectId>,
        rect: Rect,
    },
    DrawLine {
        pen: ServerObjectId,
        p1: Point,
        p2: Point,
    },
    PushClip {
        rect: Rect,
    },
    PopClip,
    PushOpacity {
        opacity: f64,
    },
    PopOpacity,
}

/// A brush captured as a deeply immutable value, independent of later
/// mutation of the live server object it came from.
///
/// Gradient geometry is expressed in the unit space of the rect being
/// filled: `(0, 0)` is the rect's top-left corner, `(1, 1)` its bottom-right.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ImmutableBrush {
    Solid {
        color: Rgba8,
        opacity: f64,
    },
    LinearGradient {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
        opacity: f64,
    },
    RadialGradient {
        center: Point,
        radius: f64,
        stops: Vec<GradientStop>,
        opacity: f64,
    },
}

impl ImmutableBrush {
    pub fn solid(color: Rgba8) -> Self {
        Self::Solid {
            color,
            opacity: 1.0,
        }
    }

    /// Sample the brush at unit-space coordinates of the filled rect.
    pub fn sample_unit(&self, u: f64, v: f64) -> Rgba8 {
        match self {
            Self::Solid { color, opacity } => color.with_opacity(*opacity),
            Self::LinearGradient {
                start,
                end,
                stops,
                opacity,
            } => {
                let dx = end.x - start.x;
                let dy = end.y - start.y;
                let len2 = dx * dx + dy * dy;
                let t = if len2 <= f64::EPSILON {
                    0.0
                } else {
                    ((u - start.x) * dx + (v - start.y) * dy) / len2
                };
                sample_stops(stops, t).with_opacity(*opacity)
            }
            Self::RadialGradient {
                center,
                radius,
                stops,
                opacity,
            } => {
                let dist = ((u - center.x).powi(2) + (v - center.y).powi(2)).sqrt();
                let t = if *radius <= f64::EPSILON {
                    1.0
                } else {
                    dist / radius
                };
                sample_stops(stops, t).with_opacity(*opacity)
            }
        }
    }
}

fn sample_stops(stops: &[GradientStop], t: f64) -> Rgba8 {
    let Some(first) = stops.first() else {
        return Rgba8::TRANSPARENT;
    };
    let t = t.clamp(0.0, 1.0);
    if t <= first.offset {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = b.offset - a.offset;
            if span <= f64::EPSILON {
                return b.color;
            }
            return Rgba8::lerp(&a.color, &b.color, (t - a.offset) / span);
        }
    }
    stops[stops.len() - 1].color
}

/// A pen captured as an immutable value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImmutablePen {
    pub brush: Option<ImmutableBrush>,
    pub thickness: f64,
}

/// Backend-agnostic drawing sink a visual's commands replay into.
///
/// Brushes and pens arrive already resolved to immutable values, so
/// implementations never reach into the live graph.
pub trait DrawingContext {
    fn clear(&mut self, color: Rgba8);
    fn draw_rectangle(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    );
    fn draw_ellipse(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    );
    fn draw_line(&mut self, pen: &ImmutablePen, p1: Point, p2: Point);
    fn push_clip(&mut self, rect: Rect);
    fn pop_clip(&mut self);
    fn push_opacity(&mut self, opacity: f64);
    fn pop_opacity(&mut self);
    fn set_transform(&mut self, transform: Affine);
    fn transform(&self) -> Affine;
}

/// Replay a command list into `ctx`, resolving object references through
/// the graph. A dangling brush or pen reference is a protocol error.
pub fn replay(
    commands: &[DrawCommand],
    graph: &Graph,
    ctx: &mut dyn DrawingContext,
) -> SceniumResult<()> {
    let resolve_brush = |id: Option<ServerObjectId>| -> SceniumResult<Option<ImmutableBrush>> {
        id.map(|id| graph.resolve_brush(id)).transpose()
    };
    let resolve_pen = |id: Option<ServerObjectId>| -> SceniumResult<Option<ImmutablePen>> {
        id.map(|id| graph.resolve_pen(id)).transpose()
    };

    let mut open_scopes = 0usize;
    for command in commands {
        match *command {
            DrawCommand::Clear { color } => ctx.clear(color),
            DrawCommand::DrawRectangle { brush, pen, rect } => {
                let brush = resolve_brush(brush)?;
                let pen = resolve_pen(pen)?;
                ctx.draw_rectangle(brush.as_ref(), pen.as_ref(), rect);
            }
            DrawCommand::DrawEllipse { brush, pen, rect } => {
                let brush = resolve_brush(brush)?;
                let pen = resolve_pen(pen)?;
                ctx.draw_ellipse(brush.as_ref(), pen.as_ref(), rect);
            }
            DrawCommand::DrawLine { pen, p1, p2 } => {
                let pen = graph.resolve_pen(pen)?;
                ctx.draw_line(&pen, p1, p2);
            }
            DrawCommand::PushClip { rect } => {
                open_scopes += 1;
                ctx.push_clip(rect);
            }
            DrawCommand::PopClip => {
                open_scopes = open_scopes.checked_sub(1).ok_or_else(|| {
                    SceniumError::protocol("PopClip without a matching PushClip")
                })?;
                ctx.pop_clip();
            }
            DrawCommand::PushOpacity { opacity } => {
                open_scopes += 1;
                ctx.push_opacity(opacity);
            }
            DrawCommand::PopOpacity => {
                open_scopes = open_scopes.checked_sub(1).ok_or_else(|| {
                    SceniumError::protocol("PopOpacity without a matching PushOpacity")
                })?;
                ctx.pop_opacity();
            }
        }
    }
    if open_scopes != 0 {
        return Err(SceniumError::protocol(
            "draw list left push/pop scopes unbalanced",
        ));
    }
    Ok(())
}
