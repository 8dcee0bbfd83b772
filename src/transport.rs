use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{
    animation::AnimationSpec,
    compositor::RenderJob,
    core::{Affine, GradientStop, ObjectKind, Point, Rect, Rgba8, ServerObjectId, Size},
    drawing::DrawCommand,
    error::{SceniumError, SceniumResult},
    graph::VisualState,
};

/// One slot of the batch stream.
///
/// Marker variants delimit the job and disposal sections; `Object` heads a
/// server-object mutation slot (and doubles as an object reference inside
/// payloads); the remaining variants are typed data consumed by
/// `deserialize_changes` implementations in the order they were written.
#[derive(Debug)]
pub enum Record {
    JobsStart,
    JobsEnd,
    PostTargetJobsStart,
    PostTargetJobsEnd,
    DisposeStart,
    /// Debug-build object boundary marker; see [`BatchStreamWriter::end_object`].
    ObjectEnd,
    Create {
        id: ServerObjectId,
        kind: ObjectKind,
    },
    Object(ServerObjectId),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Color(Rgba8),
    Point(Point),
    Rect(Rect),
    Size(Size),
    Transform(Affine),
    Stop(GradientStop),
    Draw(DrawCommand),
    Animation(AnimationSpec),
    Job(RenderJob),
}

impl Record {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Self::JobsStart => "JobsStart",
            Self::JobsEnd => "JobsEnd",
            Self::PostTargetJobsStart => "PostTargetJobsStart",
            Self::PostTargetJobsEnd => "PostTargetJobsEnd",
            Self::DisposeStart => "DisposeStart",
            Self::ObjectEnd => "ObjectEnd",
            Self::Create { .. } => "Create",
            Self::Object(_) => "Object",
            Self::Uint(_) => "Uint",
            Self::Float(_) => "Float",
            Self::Bool(_) => "Bool",
            Self::Color(_) => "Color",
            Self::Point(_) => "Point",
            Self::Rect(_) => "Rect",
            Self::Size(_) => "Size",
            Self::Transform(_) => "Transform",
            Self::Stop(_) => "Stop",
            Self::Draw(_) => "Draw",
            Self::Animation(_) => "Animation",
            Self::Job(_) => "Job",
        }
    }
}

const POOL_CAPACITY: usize = 32;

/// Shared pool of record buffers.
///
/// Writers take a buffer when a batch starts; the compositor returns it
/// after both completion notifications for the batch have fired.
#[derive(Clone, Default)]
pub struct BatchBufferPool {
    free: Arc<Mutex<Vec<VecDeque<Record>>>>,
}

impl BatchBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> VecDeque<Record> {
        let mut free = lock_recovering(&self.free);
        free.pop().unwrap_or_default()
    }

    pub fn put(&self, mut buffer: VecDeque<Record>) {
        buffer.clear();
        let mut free = lock_recovering(&self.free);
        if free.len() < POOL_CAPACITY {
            free.push(buffer);
        }
    }

    #[cfg(test)]
    pub(crate) fn free_count(&self) -> usize {
        lock_recovering(&self.free).len()
    }
}

pub(crate) fn lock_recovering<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An opaque serialized payload, ready to enqueue.
#[derive(Debug)]
pub struct BatchPayload {
    pub(crate) records: VecDeque<Record>,
}

/// Appends typed values to a pooled record buffer.
pub struct BatchStreamWriter {
    pool: BatchBufferPool,
    records: VecDeque<Record>,
}

impl BatchStreamWriter {
    pub fn new(pool: &BatchBufferPool) -> Self {
        Self {
            pool: pool.clone(),
            records: pool.take(),
        }
    }

    pub fn write(&mut self, record: Record) {
        self.records.push_back(record);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write(Record::Uint(value));
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write(Record::Float(value));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write(Record::Bool(value));
    }

    pub fn write_color(&mut self, value: Rgba8) {
        self.write(Record::Color(value));
    }

    pub fn write_point(&mut self, value: Point) {
        self.write(Record::Point(value));
    }

    pub fn write_rect(&mut self, value: Rect) {
        self.write(Record::Rect(value));
    }

    pub fn write_size(&mut self, value: Size) {
        self.write(Record::Size(value));
    }

    pub fn write_transform(&mut self, value: Affine) {
        self.write(Record::Transform(value));
    }

    pub fn write_stop(&mut self, value: GradientStop) {
        self.write(Record::Stop(value));
    }

    pub fn write_draw(&mut self, value: DrawCommand) {
        self.write(Record::Draw(value));
    }

    pub fn write_animation(&mut self, value: AnimationSpec) {
        self.write(Record::Animation(value));
    }

    pub fn write_object_ref(&mut self, id: ServerObjectId) {
        self.write(Record::Object(id));
    }

    /// Announce a new server object. Producers never hold graph references,
    /// so creation travels as an explicit record.
    pub fn create_object(&mut self, id: ServerObjectId, kind: ObjectKind) {
        self.write(Record::Create { id, kind });
    }

    /// Open a mutation slot for `id`. Must be balanced by [`Self::end_object`].
    pub fn begin_object(&mut self, id: ServerObjectId) {
        self.write(Record::Object(id));
    }

    /// Close the current mutation slot.
    ///
    /// In debug builds this emits a boundary marker the compositor verifies
    /// after the object's deserialize routine ran; an object that consumes
    /// too few or too many records fails the batch with a protocol error.
    /// Release builds skip the marker entirely.
    pub fn end_object(&mut self) {
        if cfg!(debug_assertions) {
            self.write(Record::ObjectEnd);
        }
    }

    /// Append a marker-delimited run of pre-render jobs.
    pub fn write_jobs(&mut self, jobs: impl IntoIterator<Item = RenderJob>) {
        self.write(Record::JobsStart);
        for job in jobs {
            self.write(Record::Job(job));
        }
        self.write(Record::JobsEnd);
    }

    /// Append a marker-delimited run of post-target jobs.
    pub fn write_post_target_jobs(&mut self, jobs: impl IntoIterator<Item = RenderJob>) {
        self.write(Record::PostTargetJobsStart);
        for job in jobs {
            self.write(Record::Job(job));
        }
        self.write(Record::PostTargetJobsEnd);
    }

    /// Append a count-prefixed disposal list.
    pub fn write_dispose_list(&mut self, ids: &[ServerObjectId]) {
        self.write(Record::DisposeStart);
        self.write_u64(ids.len() as u64);
        for &id in ids {
            self.write_object_ref(id);
        }
    }

    pub fn visual_state(&mut self, state: &VisualState) {
        self.write_point(state.offset);
        self.write_size(state.size);
        self.write_transform(state.transform);
        self.write_f64(state.opacity);
        self.write_bool(state.visible);
        self.write_bool(state.clip_to_bounds);
        self.write_bool(state.clip.is_some());
        if let Some(clip) = state.clip {
            self.write_rect(clip);
        }
    }

    fn animations(&mut self, animations: &[AnimationSpec]) {
        self.write_u64(animations.len() as u64);
        for spec in animations {
            self.write_animation(spec.clone());
        }
    }

    /// Full-state update of a container visual.
    pub fn container_visual(
        &mut self,
        id: ServerObjectId,
        state: &VisualState,
        children: &[ServerObjectId],
        animations: &[AnimationSpec],
    ) {
        self.begin_object(id);
        self.visual_state(state);
        self.write_u64(children.len() as u64);
        for &child in children {
            self.write_object_ref(child);
        }
        self.animations(animations);
        self.end_object();
    }

    /// Full-state update of a draw-list visual.
    pub fn draw_list_visual(
        &mut self,
        id: ServerObjectId,
        state: &VisualState,
        commands: &[DrawCommand],
        animations: &[AnimationSpec],
    ) {
        self.begin_object(id);
        self.visual_state(state);
        self.write_u64(commands.len() as u64);
        for &command in commands {
            self.write_draw(command);
        }
        self.animations(animations);
        self.end_object();
    }

    pub fn solid_color_brush(&mut self, id: ServerObjectId, color: Rgba8, opacity: f64) {
        self.begin_object(id);
        self.write_color(color);
        self.write_f64(opacity);
        self.end_object();
    }

    pub fn linear_gradient_brush(
        &mut self,
        id: ServerObjectId,
        start: Point,
        end: Point,
        opacity: f64,
        stops: &[GradientStop],
    ) {
        self.begin_object(id);
        self.write_point(start);
        self.write_point(end);
        self.write_f64(opacity);
        self.write_u64(stops.len() as u64);
        for &stop in stops {
            self.write_stop(stop);
        }
        self.end_object();
    }

    pub fn radial_gradient_brush(
        &mut self,
        id: ServerObjectId,
        center: Point,
        radius: f64,
        opacity: f64,
        stops: &[GradientStop],
    ) {
        self.begin_object(id);
        self.write_point(center);
        self.write_f64(radius);
        self.write_f64(opacity);
        self.write_u64(stops.len() as u64);
        for &stop in stops {
            self.write_stop(stop);
        }
        self.end_object();
    }

    pub fn pen(&mut self, id: ServerObjectId, brush: Option<ServerObjectId>, thickness: f64) {
        self.begin_object(id);
        self.write_bool(brush.is_some());
        if let Some(brush) = brush {
            self.write_object_ref(brush);
        }
        self.write_f64(thickness);
        self.end_object();
    }

    pub fn finish(self) -> BatchPayload {
        BatchPayload {
            records: self.records,
        }
    }

    /// Abandon the batch and return the buffer to the pool.
    pub fn cancel(self) {
        self.pool.put(self.records);
    }
}

/// Consumes a batch payload in the order it was written.
pub struct BatchStreamReader {
    records: VecDeque<Record>,
}

macro_rules! typed_read {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&mut self) -> SceniumResult<$ty> {
            match self.read()? {
                Record::$variant(value) => Ok(value),
                other => Err(SceniumError::protocol(format!(
                    concat!("expected ", stringify!($variant), " record, found {}"),
                    other.kind_name()
                ))),
            }
        }
    };
}

impl BatchStreamReader {
    pub fn new(payload: BatchPayload) -> Self {
        Self {
            records: payload.records,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.records.is_empty()
    }

    pub fn read(&mut self) -> SceniumResult<Record> {
        self.records
            .pop_front()
            .ok_or_else(|| SceniumError::protocol("unexpected end of batch stream"))
    }

    typed_read!(read_u64, Uint, u64);
    typed_read!(read_f64, Float, f64);
    typed_read!(read_bool, Bool, bool);
    typed_read!(read_color, Color, Rgba8);
    typed_read!(read_point, Point, Point);
    typed_read!(read_rect, Rect, Rect);
    typed_read!(read_size, Size, Size);
    typed_read!(read_transform, Transform, Affine);
    typed_read!(read_stop, Stop, GradientStop);
    typed_read!(read_draw, Draw, DrawCommand);
    typed_read!(read_animation, Animation, AnimationSpec);
    typed_read!(read_job, Job, RenderJob);
    typed_read!(read_object_id, Object, ServerObjectId);

    /// Recover the spent buffer so it can go back to the pool.
    pub fn into_buffer(self) -> VecDeque<Record> {
        self.records
    }
}
