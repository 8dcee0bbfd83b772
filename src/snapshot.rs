use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::{
    backend::{RenderBackend, Surface},
    core::{Affine, Point, Rect, Rgba8, ServerObjectId, Size},
    drawing::{self, DrawingContext, ImmutableBrush, ImmutablePen},
    error::{SceniumError, SceniumResult},
    graph::{Graph, ServerObject},
};

/// A printable diagnostic value.
///
/// Deliberately a small closed set: the property bag exists for human-facing
/// inspection, not round-tripping.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub enum DiagnosticValue {
    Number(f64),
    Integer(i64),
    Bool(bool),
    Text(String),
    Color(Rgba8),
    Point(Point),
    Rect(Rect),
    Transform(Affine),
    Brush(ImmutableBrush),
    Pen(ImmutablePen),
    List(Vec<DiagnosticValue>),
}

/// One logged draw operation: its name plus the effective parameters,
/// normalized to immutable forms at capture time.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DrawOperation {
    pub operation: String,
    pub params: BTreeMap<String, DiagnosticValue>,
}

/// A point-in-time, deeply immutable copy of one visual.
///
/// Holds no references into the live graph: every captured value is a
/// primitive, an immutable value type, or a deep copy.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SnapshotItem {
    pub name: String,
    pub transform: Affine,
    pub size: Size,
    pub opacity: f64,
    pub visible: bool,
    pub clip_to_bounds: bool,
    pub clip: Option<Rect>,
    pub properties: BTreeMap<String, DiagnosticValue>,
    /// Flattened, ordered operation log; draw-list visuals only.
    pub draw_operations: Option<Vec<DrawOperation>>,
    pub children: Vec<SnapshotItem>,
    #[serde(skip)]
    capture: Option<Surface>,
}

impl SnapshotItem {
    /// The eagerly rasterized content of a draw-list visual, if any.
    pub fn capture(&self) -> Option<&Surface> {
        self.capture.as_ref()
    }

    /// Encode the capture as PNG. None when this item has no capture.
    pub fn to_png(&self) -> Option<SceniumResult<Vec<u8>>> {
        self.capture.as_ref().map(Surface::to_png)
    }

    fn release_captures(&mut self) {
        self.capture = None;
        for child in &mut self.children {
            child.release_captures();
        }
    }
}

/// An immutable tree snapshot of the live server visual graph, captured
/// atomically on the render context and safe to read from any thread.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SnapshotTree {
    pub root: SnapshotItem,
    /// Server time at capture.
    pub taken_at: Duration,
    #[serde(skip)]
    disposed: bool,
}

impl SnapshotTree {
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Release the backing pixel buffers. Never touches the live graph.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.root.release_captures();
    }
}

/// Awaits a snapshot scheduled on the render context.
#[derive(Debug)]
pub struct SnapshotHandle {
    pub(crate) reply: Receiver<Option<SnapshotTree>>,
}

impl SnapshotHandle {
    /// Block until the cycle that ran the snapshot job completes.
    ///
    /// Yields `None` when the root visual did not exist (or the capture
    /// failed; job failures are isolated, not propagated).
    pub fn wait(self) -> SceniumResult<Option<SnapshotTree>> {
        self.reply
            .recv()
            .map_err(|_| SceniumError::snapshot("compositor went away before the snapshot ran"))
    }
}

/// Walk the live graph under the render lock and build an immutable tree.
pub(crate) fn take(
    graph: &Graph,
    backend: &mut dyn RenderBackend,
    root: ServerObjectId,
    taken_at: Duration,
) -> SceniumResult<Option<SnapshotTree>> {
    let Some(object) = graph.get(root) else {
        return Ok(None);
    };
    if object.visual_state().is_none() {
        return Ok(None);
    }
    Ok(Some(SnapshotTree {
        root: build_item(graph, backend, root, &mut Vec::new())?,
        taken_at,
        disposed: false,
    }))
}

/// `trail` tracks the ids on the path from the root; revisiting one means
/// the child lists form a cycle and the walk fails.
fn build_item(
    graph: &Graph,
    backend: &mut dyn RenderBackend,
    id: ServerObjectId,
    trail: &mut Vec<ServerObjectId>,
) -> SceniumResult<SnapshotItem> {
    if trail.contains(&id) {
        return Err(SceniumError::protocol(format!(
            "visual {} is its own ancestor",
            id.0
        )));
    }
    let object = graph
        .get(id)
        .ok_or_else(|| SceniumError::snapshot(format!("visual {} vanished mid-walk", id.0)))?;
    let state = object
        .visual_state()
        .ok_or_else(|| SceniumError::snapshot(format!("object {} is not a visual", id.0)))?
        .clone();

    let mut properties = BTreeMap::new();
    object.populate_diagnostic_properties(&mut properties);

    let mut draw_operations = None;
    let mut capture = None;
    let mut children = Vec::new();

    match object {
        ServerObject::DrawListVisual(visual) => {
            // Replay through a recording wrapper around the real backend:
            // every call is both forwarded (rasterized) and logged.
            let mut surface = Surface::from_size(state.size);
            let ops = {
                let inner = backend.begin_draw(&mut surface)?;
                let mut recorder = RecordingContext::new(inner);
                drawing::replay(&visual.commands, graph, &mut recorder)?;
                recorder.into_log()
            };
            draw_operations = Some(ops);
            capture = Some(surface);
        }
        ServerObject::ContainerVisual(visual) => {
            trail.push(id);
            for &child in &visual.children {
                children.push(build_item(graph, backend, child, trail)?);
            }
            trail.pop();
        }
        _ => {}
    }

    Ok(SnapshotItem {
        name: object.kind().name().to_string(),
        transform: state.transform,
        size: state.size,
        opacity: state.opacity,
        visible: state.visible,
        clip_to_bounds: state.clip_to_bounds,
        clip: state.clip,
        properties,
        draw_operations,
        children,
        capture,
    })
}

/// Forwards every drawing call to the wrapped context and logs it as an
/// operation-name plus parameter map.
pub struct RecordingContext<'a> {
    inner: Box<dyn DrawingContext + 'a>,
    log: Vec<DrawOperation>,
}

impl<'a> RecordingContext<'a> {
    pub fn new(inner: Box<dyn DrawingContext + 'a>) -> Self {
        Self {
            inner,
            log: Vec::new(),
        }
    }

    pub fn into_log(self) -> Vec<DrawOperation> {
        self.log
    }

    fn add(&mut self, operation: &str, params: impl IntoIterator<Item = (&'static str, DiagnosticValue)>) {
        self.log.push(DrawOperation {
            operation: operation.to_string(),
            params: params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        });
    }
}

impl DrawingContext for RecordingContext<'_> {
    fn clear(&mut self, color: Rgba8) {
        self.add("Clear", [("Color", DiagnosticValue::Color(color))]);
        self.inner.clear(color);
    }

    fn draw_rectangle(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    ) {
        let mut params = vec![("Rect", DiagnosticValue::Rect(rect))];
        if let Some(brush) = brush {
            params.push(("Brush", DiagnosticValue::Brush(brush.clone())));
        }
        if let Some(pen) = pen {
            params.push(("Pen", DiagnosticValue::Pen(pen.clone())));
        }
        self.add("DrawRectangle", params);
        self.inner.draw_rectangle(brush, pen, rect);
    }

    fn draw_ellipse(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    ) {
        let mut params = vec![("Rect", DiagnosticValue::Rect(rect))];
        if let Some(brush) = brush {
            params.push(("Brush", DiagnosticValue::Brush(brush.clone())));
        }
        if let Some(pen) = pen {
            params.push(("Pen", DiagnosticValue::Pen(pen.clone())));
        }
        self.add("DrawEllipse", params);
        self.inner.draw_ellipse(brush, pen, rect);
    }

    fn draw_line(&mut self, pen: &ImmutablePen, p1: Point, p2: Point) {
        self.add(
            "DrawLine",
            [
                ("Pen", DiagnosticValue::Pen(pen.clone())),
                ("Point1", DiagnosticValue::Point(p1)),
                ("Point2", DiagnosticValue::Point(p2)),
            ],
        );
        self.inner.draw_line(pen, p1, p2);
    }

    fn push_clip(&mut self, rect: Rect) {
        self.add("PushClip", [("Clip", DiagnosticValue::Rect(rect))]);
        self.inner.push_clip(rect);
    }

    fn pop_clip(&mut self) {
        self.add("PopClip", []);
        self.inner.pop_clip();
    }

    fn push_opacity(&mut self, opacity: f64) {
        self.add("PushOpacity", [("Opacity", DiagnosticValue::Number(opacity))]);
        self.inner.push_opacity(opacity);
    }

    fn pop_opacity(&mut self) {
        self.add("PopOpacity", []);
        self.inner.pop_opacity();
    }

    fn set_transform(&mut self, transform: Affine) {
        self.inner.set_transform(transform);
    }

    fn transform(&self) -> Affine {
        self.inner.transform()
    }
}
