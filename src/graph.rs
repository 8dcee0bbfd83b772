use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::{
    animation::AnimationSpec,
    core::{Affine, ObjectKind, Point, Rect, Rgba8, ServerObjectId, Size},
    drawing::{DrawCommand, ImmutableBrush, ImmutablePen},
    error::{SceniumError, SceniumResult},
    snapshot::DiagnosticValue,
    transport::BatchStreamReader,
};

/// State shared by both visual kinds.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VisualState {
    /// Position relative to the parent visual.
    pub offset: Point,
    pub size: Size,
    /// Local transform, applied after the offset translation.
    pub transform: Affine,
    pub opacity: f64,
    pub visible: bool,
    pub clip_to_bounds: bool,
    /// Extra rectangular clip in local coordinates.
    pub clip: Option<Rect>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            offset: Point::ZERO,
            size: Size::ZERO,
            transform: Affine::IDENTITY,
            opacity: 1.0,
            visible: true,
            clip_to_bounds: false,
            clip: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ContainerVisual {
    pub state: VisualState,
    /// Child ids in paint order (first is painted first).
    pub children: Vec<ServerObjectId>,
}

#[derive(Clone, Debug, Default)]
pub struct DrawListVisual {
    pub state: VisualState,
    pub commands: Vec<DrawCommand>,
}

#[derive(Clone, Debug)]
pub struct SolidColorBrush {
    pub color: Rgba8,
    pub opacity: f64,
}

#[derive(Clone, Debug)]
pub struct LinearGradientBrush {
    pub start: Point,
    pub end: Point,
    pub stops: Vec<crate::core::GradientStop>,
    pub opacity: f64,
}

#[derive(Clone, Debug)]
pub struct RadialGradientBrush {
    pub center: Point,
    pub radius: f64,
    pub stops: Vec<crate::core::GradientStop>,
    pub opacity: f64,
}

#[derive(Clone, Debug)]
pub struct Pen {
    pub brush: Option<ServerObjectId>,
    pub thickness: f64,
}

/// A render-context-owned mirror of a producer-authored scene entity.
///
/// Dispatch over the closed kind set; each variant consumes its own fixed
/// payload layout from the batch stream.
#[derive(Clone, Debug)]
pub enum ServerObject {
    ContainerVisual(ContainerVisual),
    DrawListVisual(DrawListVisual),
    SolidColorBrush(SolidColorBrush),
    LinearGradientBrush(LinearGradientBrush),
    RadialGradientBrush(RadialGradientBrush),
    Pen(Pen),
}

impl ServerObject {
    fn new(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::ContainerVisual => Self::ContainerVisual(ContainerVisual::default()),
            ObjectKind::DrawListVisual => Self::DrawListVisual(DrawListVisual::default()),
            ObjectKind::SolidColorBrush => Self::SolidColorBrush(SolidColorBrush {
                color: Rgba8::TRANSPARENT,
                opacity: 1.0,
            }),
            ObjectKind::LinearGradientBrush => Self::LinearGradientBrush(LinearGradientBrush {
                start: Point::ZERO,
                end: Point::new(1.0, 0.0),
                stops: Vec::new(),
                opacity: 1.0,
            }),
            ObjectKind::RadialGradientBrush => Self::RadialGradientBrush(RadialGradientBrush {
                center: Point::new(0.5, 0.5),
                radius: 0.5,
                stops: Vec::new(),
                opacity: 1.0,
            }),
            ObjectKind::Pen => Self::Pen(Pen {
                brush: None,
                thickness: 1.0,
            }),
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::ContainerVisual(_) => ObjectKind::ContainerVisual,
            Self::DrawListVisual(_) => ObjectKind::DrawListVisual,
            Self::SolidColorBrush(_) => ObjectKind::SolidColorBrush,
            Self::LinearGradientBrush(_) => ObjectKind::LinearGradientBrush,
            Self::RadialGradientBrush(_) => ObjectKind::RadialGradientBrush,
            Self::Pen(_) => ObjectKind::Pen,
        }
    }

    pub fn visual_state(&self) -> Option<&VisualState> {
        match self {
            Self::ContainerVisual(v) => Some(&v.state),
            Self::DrawListVisual(v) => Some(&v.state),
            _ => None,
        }
    }

    /// Consume this object's payload from the stream.
    ///
    /// Every kind must read exactly the records its producer wrote; the
    /// compositor verifies the boundary in debug builds. Returns the
    /// animation attachments carried at the tail of visual payloads, which
    /// start at `committed_at`.
    pub fn deserialize_changes(
        &mut self,
        reader: &mut BatchStreamReader,
        _committed_at: Duration,
    ) -> SceniumResult<Vec<AnimationSpec>> {
        match self {
            Self::ContainerVisual(v) => {
                v.state = read_visual_state(reader)?;
                let count = reader.read_u64()?;
                v.children.clear();
                for _ in 0..count {
                    v.children.push(reader.read_object_id()?);
                }
                read_animations(reader)
            }
            Self::DrawListVisual(v) => {
                v.state = read_visual_state(reader)?;
                let count = reader.read_u64()?;
                v.commands.clear();
                for _ in 0..count {
                    v.commands.push(reader.read_draw()?);
                }
                read_animations(reader)
            }
            Self::SolidColorBrush(b) => {
                b.color = reader.read_color()?;
                b.opacity = reader.read_f64()?;
                Ok(Vec::new())
            }
            Self::LinearGradientBrush(b) => {
                b.start = reader.read_point()?;
                b.end = reader.read_point()?;
                b.opacity = reader.read_f64()?;
                b.stops = read_stops(reader)?;
                Ok(Vec::new())
            }
            Self::RadialGradientBrush(b) => {
                b.center = reader.read_point()?;
                b.radius = reader.read_f64()?;
                b.opacity = reader.read_f64()?;
                b.stops = read_stops(reader)?;
                Ok(Vec::new())
            }
            Self::Pen(p) => {
                p.brush = if reader.read_bool()? {
                    Some(reader.read_object_id()?)
                } else {
                    None
                };
                p.thickness = reader.read_f64()?;
                Ok(Vec::new())
            }
        }
    }

    /// Collect named values for diagnostic tooling.
    ///
    /// This is the single integration point the snapshot walker calls.
    pub fn populate_diagnostic_properties(&self, map: &mut BTreeMap<String, DiagnosticValue>) {
        if let Some(state) = self.visual_state() {
            map.insert("Offset".into(), DiagnosticValue::Point(state.offset));
            map.insert("Opacity".into(), DiagnosticValue::Number(state.opacity));
            map.insert("Visible".into(), DiagnosticValue::Bool(state.visible));
            map.insert(
                "ClipToBounds".into(),
                DiagnosticValue::Bool(state.clip_to_bounds),
            );
        }
        match self {
            Self::ContainerVisual(v) => {
                map.insert(
                    "Children.Count".into(),
                    DiagnosticValue::Integer(v.children.len() as i64),
                );
            }
            Self::DrawListVisual(v) => {
                map.insert(
                    "DrawOperations.Count".into(),
                    DiagnosticValue::Integer(v.commands.len() as i64),
                );
            }
            Self::SolidColorBrush(b) => {
                map.insert("Color".into(), DiagnosticValue::Color(b.color));
                map.insert("Opacity".into(), DiagnosticValue::Number(b.opacity));
            }
            Self::LinearGradientBrush(b) => {
                map.insert("StartPoint".into(), DiagnosticValue::Point(b.start));
                map.insert("EndPoint".into(), DiagnosticValue::Point(b.end));
                map.insert("Opacity".into(), DiagnosticValue::Number(b.opacity));
                map.insert("GradientStops".into(), stops_value(&b.stops));
            }
            Self::RadialGradientBrush(b) => {
                map.insert("Center".into(), DiagnosticValue::Point(b.center));
                map.insert("Radius".into(), DiagnosticValue::Number(b.radius));
                map.insert("Opacity".into(), DiagnosticValue::Number(b.opacity));
                map.insert("GradientStops".into(), stops_value(&b.stops));
            }
            Self::Pen(p) => {
                map.insert("Thickness".into(), DiagnosticValue::Number(p.thickness));
            }
        }
    }
}

fn stops_value(stops: &[crate::core::GradientStop]) -> DiagnosticValue {
    DiagnosticValue::List(
        stops
            .iter()
            .map(|s| {
                DiagnosticValue::List(vec![
                    DiagnosticValue::Number(s.offset),
                    DiagnosticValue::Color(s.color),
                ])
            })
            .collect(),
    )
}

fn read_visual_state(reader: &mut BatchStreamReader) -> SceniumResult<VisualState> {
    let offset = reader.read_point()?;
    let size = reader.read_size()?;
    let transform = reader.read_transform()?;
    let opacity = reader.read_f64()?;
    let visible = reader.read_bool()?;
    let clip_to_bounds = reader.read_bool()?;
    let clip = if reader.read_bool()? {
        Some(reader.read_rect()?)
    } else {
        None
    };
    Ok(VisualState {
        offset,
        size,
        transform,
        opacity,
        visible,
        clip_to_bounds,
        clip,
    })
}

fn read_stops(reader: &mut BatchStreamReader) -> SceniumResult<Vec<crate::core::GradientStop>> {
    let count = reader.read_u64()?;
    let mut stops = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        stops.push(reader.read_stop()?);
    }
    Ok(stops)
}

fn read_animations(reader: &mut BatchStreamReader) -> SceniumResult<Vec<AnimationSpec>> {
    let count = reader.read_u64()?;
    let mut specs = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let spec = reader.read_animation()?;
        spec.validate()?;
        specs.push(spec);
    }
    Ok(specs)
}

/// The set of server-side mirrors, exclusively owned by the compositor.
#[derive(Default)]
pub struct Graph {
    objects: HashMap<ServerObjectId, ServerObject>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: ServerObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn get(&self, id: ServerObjectId) -> Option<&ServerObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ServerObjectId) -> Option<&mut ServerObject> {
        self.objects.get_mut(&id)
    }

    pub fn create(&mut self, id: ServerObjectId, kind: ObjectKind) -> SceniumResult<()> {
        if self.objects.contains_key(&id) {
            return Err(SceniumError::protocol(format!(
                "object {} already exists",
                id.0
            )));
        }
        self.objects.insert(id, ServerObject::new(kind));
        Ok(())
    }

    /// Apply the next payload in the stream to the object `id`.
    pub fn apply_object(
        &mut self,
        id: ServerObjectId,
        reader: &mut BatchStreamReader,
        committed_at: Duration,
    ) -> SceniumResult<Vec<AnimationSpec>> {
        let object = self.objects.get_mut(&id).ok_or_else(|| {
            SceniumError::protocol(format!("mutation references unknown object {}", id.0))
        })?;
        object.deserialize_changes(reader, committed_at)
    }

    /// Remove `id`; returns whether it existed. Requested through the
    /// stream's disposal list, so it always runs after any earlier
    /// mutations referencing the object.
    pub fn dispose(&mut self, id: ServerObjectId) -> bool {
        self.objects.remove(&id).is_some()
    }

    /// Capture a brush as an immutable value, detached from the live graph.
    pub fn resolve_brush(&self, id: ServerObjectId) -> SceniumResult<ImmutableBrush> {
        match self.objects.get(&id) {
            Some(ServerObject::SolidColorBrush(b)) => Ok(ImmutableBrush::Solid {
                color: b.color,
                opacity: b.opacity,
            }),
            Some(ServerObject::LinearGradientBrush(b)) => Ok(ImmutableBrush::LinearGradient {
                start: b.start,
                end: b.end,
                stops: b.stops.clone(),
                opacity: b.opacity,
            }),
            Some(ServerObject::RadialGradientBrush(b)) => Ok(ImmutableBrush::RadialGradient {
                center: b.center,
                radius: b.radius,
                stops: b.stops.clone(),
                opacity: b.opacity,
            }),
            Some(other) => Err(SceniumError::protocol(format!(
                "object {} is a {}, not a brush",
                id.0,
                other.kind().name()
            ))),
            None => Err(SceniumError::protocol(format!(
                "draw command references unknown brush {}",
                id.0
            ))),
        }
    }

    pub fn resolve_pen(&self, id: ServerObjectId) -> SceniumResult<ImmutablePen> {
        match self.objects.get(&id) {
            Some(ServerObject::Pen(p)) => Ok(ImmutablePen {
                brush: p.brush.map(|b| self.resolve_brush(b)).transpose()?,
                thickness: p.thickness,
            }),
            Some(other) => Err(SceniumError::protocol(format!(
                "object {} is a {}, not a pen",
                id.0,
                other.kind().name()
            ))),
            None => Err(SceniumError::protocol(format!(
                "draw command references unknown pen {}",
                id.0
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BatchBufferPool, BatchStreamWriter};

    fn reader_for(build: impl FnOnce(&mut BatchStreamWriter)) -> BatchStreamReader {
        let pool = BatchBufferPool::new();
        let mut writer = BatchStreamWriter::new(&pool);
        build(&mut writer);
        BatchStreamReader::new(writer.finish())
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let mut graph = Graph::new();
        let id = ServerObjectId(1);
        graph.create(id, ObjectKind::Pen).unwrap();
        assert!(graph.create(id, ObjectKind::Pen).is_err());
    }

    #[test]
    fn solid_brush_roundtrip_through_stream() {
        let mut graph = Graph::new();
        let id = ServerObjectId(1);
        graph.create(id, ObjectKind::SolidColorBrush).unwrap();

        let mut reader = reader_for(|w| {
            w.write_color(Rgba8::rgb(9, 8, 7));
            w.write_f64(0.25);
        });
        graph
            .apply_object(id, &mut reader, Duration::ZERO)
            .unwrap();

        let resolved = graph.resolve_brush(id).unwrap();
        assert_eq!(
            resolved,
            ImmutableBrush::Solid {
                color: Rgba8::rgb(9, 8, 7),
                opacity: 0.25
            }
        );
    }

    #[test]
    fn pen_resolves_brush_deeply() {
        let mut graph = Graph::new();
        let brush = ServerObjectId(1);
        let pen = ServerObjectId(2);
        graph.create(brush, ObjectKind::SolidColorBrush).unwrap();
        graph.create(pen, ObjectKind::Pen).unwrap();

        let mut reader = reader_for(|w| {
            w.write_bool(true);
            w.write_object_ref(brush);
            w.write_f64(3.0);
        });
        graph.apply_object(pen, &mut reader, Duration::ZERO).unwrap();

        let resolved = graph.resolve_pen(pen).unwrap();
        assert_eq!(resolved.thickness, 3.0);
        assert!(resolved.brush.is_some());
    }

    #[test]
    fn resolve_brush_rejects_wrong_kind_and_unknown_id() {
        let mut graph = Graph::new();
        let pen = ServerObjectId(5);
        graph.create(pen, ObjectKind::Pen).unwrap();
        assert!(graph.resolve_brush(pen).is_err());
        assert!(graph.resolve_brush(ServerObjectId(99)).is_err());
    }

    #[test]
    fn mutation_of_unknown_object_is_protocol_error() {
        let mut graph = Graph::new();
        let mut reader = reader_for(|w| w.write_f64(1.0));
        let err = graph
            .apply_object(ServerObjectId(4), &mut reader, Duration::ZERO)
            .unwrap_err();
        assert!(err.to_string().contains("unknown object"));
    }

    #[test]
    fn dispose_removes_object() {
        let mut graph = Graph::new();
        let id = ServerObjectId(1);
        graph.create(id, ObjectKind::ContainerVisual).unwrap();
        assert!(graph.dispose(id));
        assert!(!graph.dispose(id));
        assert!(!graph.contains(id));
    }
}
