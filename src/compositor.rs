use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::{
    animation::AnimationEngine,
    backend::RenderBackend,
    batch::{BatchNotifier, BatchReceipt, CompositionBatch},
    core::{ServerClock, ServerObjectId, Size},
    error::{SceniumError, SceniumResult},
    graph::Graph,
    snapshot::{self, SnapshotHandle, SnapshotTree},
    target::{ServerCompositionTarget, TargetId},
    transport::{
        lock_recovering, BatchBufferPool, BatchPayload, BatchStreamReader, BatchStreamWriter,
        Record,
    },
};

/// A deferred action executed once on the render context.
///
/// Jobs are explicit command values rather than opaque closures, keeping the
/// wire format inspectable. Each executes at most once; a failing job is
/// dropped in isolation and can never abort the cycle.
#[derive(Debug)]
pub enum RenderJob {
    /// Notify the sender when the job runs. A completion fence.
    Signal(Sender<()>),
    /// Hold the cycle open for an external pacing collaborator: signal
    /// `ready`, then block until `release` fires (or is dropped).
    Fence {
        ready: Sender<()>,
        release: Receiver<()>,
    },
    /// Capture an immutable tree snapshot of the subtree rooted at `root`.
    TakeSnapshot {
        root: ServerObjectId,
        reply: Sender<Option<SnapshotTree>>,
    },
}

/// A queued low-level render-resource change, applied each cycle before the
/// backend readiness check.
#[derive(Debug)]
pub enum ResourceChange {
    ResizeTarget { target: TargetId, size: Size },
    InvalidateContext,
}

struct BatchQueue {
    queue: VecDeque<CompositionBatch>,
    next_sequence: u64,
}

struct RenderState {
    graph: Graph,
    animations: AnimationEngine,
    targets: Vec<(TargetId, ServerCompositionTarget)>,
    next_target_id: u64,
    backend: Box<dyn RenderBackend>,
    job_queue: VecDeque<RenderJob>,
    post_target_job_queue: VecDeque<RenderJob>,
    server_now: Duration,
    to_notify_processed: Vec<CompositionBatch>,
    to_notify_rendered: Vec<CompositionBatch>,
}

/// The server-side compositor: applies serialized mutation batches in
/// submission order, ticks animations, and drives per-target rendering,
/// one cycle per `render()` call.
///
/// Producers only ever enqueue batches and schedule jobs; all server-object
/// mutation happens inside a cycle, under the render lock.
pub struct ServerCompositor {
    clock: ServerClock,
    pool: BatchBufferPool,
    last_batch_id: AtomicU64,
    batches: Mutex<BatchQueue>,
    pending_jobs: Mutex<VecDeque<RenderJob>>,
    pending_post_target_jobs: Mutex<VecDeque<RenderJob>>,
    pending_resources: Mutex<Vec<ResourceChange>>,
    /// Thread currently inside a render cycle, for reentrancy and access
    /// checks. The render context is whichever thread holds `state`.
    cycle_thread: Mutex<Option<ThreadId>>,
    state: Mutex<RenderState>,
}

impl ServerCompositor {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            clock: ServerClock::new(),
            pool: BatchBufferPool::new(),
            last_batch_id: AtomicU64::new(0),
            batches: Mutex::new(BatchQueue {
                queue: VecDeque::new(),
                next_sequence: 0,
            }),
            pending_jobs: Mutex::new(VecDeque::new()),
            pending_post_target_jobs: Mutex::new(VecDeque::new()),
            pending_resources: Mutex::new(Vec::new()),
            cycle_thread: Mutex::new(None),
            state: Mutex::new(RenderState {
                graph: Graph::new(),
                animations: AnimationEngine::new(),
                targets: Vec::new(),
                next_target_id: 1,
                backend,
                job_queue: VecDeque::new(),
                post_target_job_queue: VecDeque::new(),
                server_now: Duration::ZERO,
                to_notify_processed: Vec::new(),
                to_notify_rendered: Vec::new(),
            }),
        }
    }

    /// Start a batch payload over this compositor's buffer pool.
    pub fn batch_writer(&self) -> BatchStreamWriter {
        BatchStreamWriter::new(&self.pool)
    }

    /// Thread-safe append to the batch queue; never blocks the render
    /// context. The sequence id is assigned here, monotonically.
    pub fn enqueue_batch(&self, payload: BatchPayload) -> BatchReceipt {
        let (processed_tx, processed_rx) = mpsc::channel();
        let (rendered_tx, rendered_rx) = mpsc::channel();
        let mut batches = lock_recovering(&self.batches);
        batches.next_sequence += 1;
        let sequence_id = batches.next_sequence;
        batches.queue.push_back(CompositionBatch::new(
            sequence_id,
            payload,
            BatchNotifier {
                processed: Some(processed_tx),
                rendered: Some(rendered_tx),
            },
        ));
        BatchReceipt {
            sequence_id,
            processed: processed_rx,
            rendered: rendered_rx,
        }
    }

    /// Schedule a job to run before target rendering in the next cycle.
    pub fn schedule_job(&self, job: RenderJob) {
        lock_recovering(&self.pending_jobs).push_back(job);
    }

    /// Schedule a job to run after target rendering in the next cycle.
    pub fn schedule_post_target_job(&self, job: RenderJob) {
        lock_recovering(&self.pending_post_target_jobs).push_back(job);
    }

    /// Queue a render-resource change for the next cycle's reconciliation
    /// step. Called by the windowing collaborator, not by producers.
    pub fn enqueue_resource_change(&self, change: ResourceChange) {
        lock_recovering(&self.pending_resources).push(change);
    }

    /// Register a composition target; it renders every cycle until removed.
    /// Blocks while a cycle is in progress.
    pub fn add_target(&self, target: ServerCompositionTarget) -> TargetId {
        let mut state = lock_recovering(&self.state);
        let id = TargetId(state.next_target_id);
        state.next_target_id += 1;
        state.targets.push((id, target));
        id
    }

    pub fn remove_target(&self, id: TargetId) -> Option<ServerCompositionTarget> {
        let mut state = lock_recovering(&self.state);
        let index = state.targets.iter().position(|(tid, _)| *tid == id)?;
        Some(state.targets.remove(index).1)
    }

    /// Inspect a registered target, e.g. to read back its surface. Blocks
    /// while a cycle is in progress.
    pub fn with_target<R>(
        &self,
        id: TargetId,
        f: impl FnOnce(&ServerCompositionTarget) -> R,
    ) -> Option<R> {
        let state = lock_recovering(&self.state);
        state
            .targets
            .iter()
            .find(|(tid, _)| *tid == id)
            .map(|(_, target)| f(target))
    }

    /// Sequence id of the most recently applied batch; non-decreasing.
    pub fn last_batch_id(&self) -> u64 {
        self.last_batch_id.load(Ordering::Acquire)
    }

    /// Schedule a snapshot of the subtree rooted at `root` on the render
    /// context. The handle resolves after the next cycle runs the job.
    pub fn take_snapshot_async(&self, root: ServerObjectId) -> SnapshotHandle {
        let (reply, rx) = mpsc::channel();
        self.schedule_job(RenderJob::TakeSnapshot { root, reply });
        SnapshotHandle { reply: rx }
    }

    /// Whether the calling thread is the render context of an active cycle.
    pub fn check_access(&self) -> bool {
        *lock_recovering(&self.cycle_thread) == Some(thread::current().id())
    }

    pub fn verify_access(&self) -> SceniumResult<()> {
        if !self.check_access() {
            return Err(SceniumError::validation(
                "server objects can only be accessed from inside a render cycle",
            ));
        }
        Ok(())
    }

    /// Execute exactly one render cycle.
    ///
    /// A re-entrant call from the thread already inside a cycle fails with
    /// a reentrancy error; any other thread blocks until the render lock is
    /// free, then proceeds. With `catch_exceptions`, a context-loss error in
    /// the render phase is logged and the cycle ends cleanly; batches
    /// applied this cycle get both notifications either way.
    pub fn render(&self, catch_exceptions: bool) -> SceniumResult<()> {
        let current = thread::current().id();
        if *lock_recovering(&self.cycle_thread) == Some(current) {
            return Err(SceniumError::reentrancy(
                "render() called from inside an active render cycle",
            ));
        }

        let mut state = lock_recovering(&self.state);
        *lock_recovering(&self.cycle_thread) = Some(current);
        let result = self.render_core(&mut state, catch_exceptions);
        // Finally-equivalent cleanup: every batch applied this cycle gets
        // both notifications, oldest first, whether or not the render phase
        // ran. On a failed cycle this flushes the batches applied before
        // the failure.
        Self::notify_processed(&mut state);
        Self::notify_rendered(&mut state, &self.pool);
        *lock_recovering(&self.cycle_thread) = None;
        result
    }

    fn render_core(&self, state: &mut RenderState, catch_exceptions: bool) -> SceniumResult<()> {
        // 1. Time update.
        state.server_now = self.clock.now();

        // Producer-scheduled jobs join the same FIFO queues stream jobs use.
        state
            .job_queue
            .extend(lock_recovering(&self.pending_jobs).drain(..));
        state
            .post_target_job_queue
            .extend(lock_recovering(&self.pending_post_target_jobs).drain(..));

        // 2. Batch application, in strict enqueue order.
        self.apply_pending_batches(state)?;

        // 3. Processed notifications, in application order.
        Self::notify_processed(state);

        // 4. Animation tick: all animations see the same timestamp.
        let now = state.server_now;
        let RenderState {
            animations, graph, ..
        } = state;
        animations.process(now, graph);

        // 5. Resource reconciliation, before touching the backend.
        self.apply_resource_changes(state);

        // 6. Readiness check: skip the render phase entirely this cycle.
        if !state.backend.is_ready() {
            tracing::trace!("backend not ready, skipping render phase");
            return Ok(());
        }

        // 7-9. Pre-render jobs, target rendering, post-render jobs.
        match Self::render_phase(state) {
            Err(e) if e.is_context_loss() && catch_exceptions => {
                tracing::error!(error = %e, "render context lost, truncating cycle");
                state.backend.invalidate_context();
                Ok(())
            }
            other => other,
        }
    }

    fn render_phase(state: &mut RenderState) -> SceniumResult<()> {
        state.backend.ensure_context()?;

        let now = state.server_now;
        let jobs: Vec<RenderJob> = state.job_queue.drain(..).collect();
        Self::run_jobs(state, jobs, now);

        {
            let RenderState {
                graph,
                targets,
                backend,
                ..
            } = state;
            for (_, target) in targets.iter_mut() {
                target.render(graph, backend.as_mut())?;
            }
        }

        let jobs: Vec<RenderJob> = state.post_target_job_queue.drain(..).collect();
        Self::run_jobs(state, jobs, now);
        Ok(())
    }

    fn run_jobs(state: &mut RenderState, jobs: Vec<RenderJob>, now: Duration) {
        for job in jobs {
            if let Err(e) = Self::run_job(state, job, now) {
                // Jobs are best-effort, fire-and-forget work.
                tracing::trace!(error = %e, "render job dropped");
            }
        }
    }

    fn run_job(state: &mut RenderState, job: RenderJob, now: Duration) -> SceniumResult<()> {
        match job {
            RenderJob::Signal(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            RenderJob::Fence { ready, release } => {
                let _ = ready.send(());
                let _ = release.recv();
                Ok(())
            }
            RenderJob::TakeSnapshot { root, reply } => {
                let RenderState { graph, backend, .. } = state;
                match snapshot::take(graph, backend.as_mut(), root, now) {
                    Ok(tree) => {
                        let _ = reply.send(tree);
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(None);
                        Err(e)
                    }
                }
            }
        }
    }

    fn apply_pending_batches(&self, state: &mut RenderState) -> SceniumResult<()> {
        loop {
            let mut batch = {
                let mut batches = lock_recovering(&self.batches);
                match batches.queue.pop_front() {
                    Some(batch) => batch,
                    None => break,
                }
            };
            let Some(payload) = batch.payload.take() else {
                continue;
            };

            let mut reader = BatchStreamReader::new(payload);
            self.apply_batch_stream(state, &mut reader)?;
            tracing::trace!(sequence_id = batch.sequence_id, "batch applied");

            // The buffer goes back to the pool only after both
            // notifications for this batch fired.
            batch.payload = Some(BatchPayload {
                records: reader.into_buffer(),
            });
            self.last_batch_id
                .store(batch.sequence_id, Ordering::Release);
            state.to_notify_processed.push(batch);
        }
        Ok(())
    }

    fn apply_batch_stream(
        &self,
        state: &mut RenderState,
        reader: &mut BatchStreamReader,
    ) -> SceniumResult<()> {
        while !reader.is_eof() {
            match reader.read()? {
                Record::JobsStart => {
                    Self::read_job_section(reader, &mut state.job_queue, false)?;
                }
                Record::PostTargetJobsStart => {
                    Self::read_job_section(reader, &mut state.post_target_job_queue, true)?;
                }
                Record::DisposeStart => {
                    let count = reader.read_u64()?;
                    for _ in 0..count {
                        let id = reader.read_object_id()?;
                        if state.graph.dispose(id) {
                            state.animations.remove_for(id);
                        }
                    }
                }
                Record::Create { id, kind } => state.graph.create(id, kind)?,
                Record::Object(id) => {
                    let specs = state.graph.apply_object(id, reader, state.server_now)?;
                    if cfg!(debug_assertions)
                        && !matches!(reader.read()?, Record::ObjectEnd)
                    {
                        return Err(SceniumError::protocol(format!(
                            "object {} did not deserialize to its stream boundary",
                            id.0
                        )));
                    }
                    for spec in specs {
                        state.animations.register(spec, state.server_now);
                    }
                }
                other => {
                    return Err(SceniumError::protocol(format!(
                        "unexpected top-level record {}",
                        other.kind_name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn read_job_section(
        reader: &mut BatchStreamReader,
        queue: &mut VecDeque<RenderJob>,
        post_target: bool,
    ) -> SceniumResult<()> {
        loop {
            match reader.read()? {
                Record::Job(job) => queue.push_back(job),
                Record::JobsEnd if !post_target => break,
                Record::PostTargetJobsEnd if post_target => break,
                other => {
                    return Err(SceniumError::protocol(format!(
                        "unexpected record {} inside job section",
                        other.kind_name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn notify_processed(state: &mut RenderState) {
        for batch in &mut state.to_notify_processed {
            batch.notify_processed();
        }
        let processed: Vec<CompositionBatch> = state.to_notify_processed.drain(..).collect();
        state.to_notify_rendered.extend(processed);
    }

    fn notify_rendered(state: &mut RenderState, pool: &BatchBufferPool) {
        for mut batch in state.to_notify_rendered.drain(..) {
            batch.notify_rendered();
            if let Some(payload) = batch.payload.take() {
                pool.put(payload.records);
            }
        }
    }

    fn apply_resource_changes(&self, state: &mut RenderState) {
        let changes: Vec<ResourceChange> =
            lock_recovering(&self.pending_resources).drain(..).collect();
        for change in changes {
            match change {
                ResourceChange::ResizeTarget { target, size } => {
                    if let Some((_, t)) = state.targets.iter_mut().find(|(id, _)| *id == target) {
                        t.resize(size);
                    }
                }
                ResourceChange::InvalidateContext => state.backend.invalidate_context(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::core::ObjectKind;

    fn compositor() -> ServerCompositor {
        ServerCompositor::new(Box::new(CpuBackend::new()))
    }

    #[test]
    fn empty_cycle_succeeds() {
        let comp = compositor();
        comp.render(true).unwrap();
        assert_eq!(comp.last_batch_id(), 0);
    }

    #[test]
    fn sequence_ids_are_monotonic() {
        let comp = compositor();
        let a = comp.enqueue_batch(comp.batch_writer().finish());
        let b = comp.enqueue_batch(comp.batch_writer().finish());
        assert!(b.sequence_id > a.sequence_id);
    }

    #[test]
    fn reentrant_render_on_cycle_thread_fails() {
        let comp = compositor();
        *lock_recovering(&comp.cycle_thread) = Some(thread::current().id());
        let err = comp.render(true).unwrap_err();
        assert!(matches!(err, SceniumError::Reentrancy(_)));
        *lock_recovering(&comp.cycle_thread) = None;
        comp.render(true).unwrap();
    }

    #[test]
    fn access_check_is_false_outside_cycles() {
        let comp = compositor();
        assert!(!comp.check_access());
        assert!(comp.verify_access().is_err());
    }

    #[test]
    fn create_and_dispose_through_stream() {
        let comp = compositor();
        let id = ServerObjectId(1);

        let mut writer = comp.batch_writer();
        writer.create_object(id, ObjectKind::ContainerVisual);
        comp.enqueue_batch(writer.finish());
        comp.render(true).unwrap();

        let mut writer = comp.batch_writer();
        writer.write_dispose_list(&[id]);
        let receipt = comp.enqueue_batch(writer.finish());
        comp.render(true).unwrap();
        assert!(receipt.wait_processed());
        assert_eq!(comp.last_batch_id(), 2);
    }

    #[test]
    fn unexpected_top_level_record_is_protocol_error() {
        let comp = compositor();
        let mut writer = comp.batch_writer();
        writer.write_f64(1.0);
        comp.enqueue_batch(writer.finish());
        let err = comp.render(true).unwrap_err();
        assert!(matches!(err, SceniumError::Protocol(_)));
    }

    #[test]
    fn object_slot_leaving_unread_records_is_protocol_error() {
        let comp = compositor();
        let id = ServerObjectId(1);
        let mut writer = comp.batch_writer();
        writer.create_object(id, ObjectKind::Pen);
        // Hand-rolled pen slot with one record too many: the deserializer
        // stops after the thickness and leaves the trailing value unread.
        writer.begin_object(id);
        writer.write_bool(false);
        writer.write_f64(2.0);
        writer.write_u64(99);
        writer.end_object();
        comp.enqueue_batch(writer.finish());

        let err = comp.render(true).unwrap_err();
        assert!(matches!(err, SceniumError::Protocol(_)));
        if cfg!(debug_assertions) {
            assert!(err.to_string().contains("stream boundary"));
        }
    }

    #[test]
    fn resize_target_resource_change_applies_before_render() {
        let comp = compositor();
        let target = comp.add_target(ServerCompositionTarget::new(
            ServerObjectId(1),
            Size::new(4.0, 4.0),
        ));
        comp.enqueue_resource_change(ResourceChange::ResizeTarget {
            target,
            size: Size::new(9.0, 3.0),
        });
        comp.render(true).unwrap();
        let (w, h) = comp
            .with_target(target, |t| (t.surface.width, t.surface.height))
            .unwrap();
        assert_eq!((w, h), (9, 3));
    }

    #[test]
    fn removed_target_is_returned() {
        let comp = compositor();
        let id = comp.add_target(ServerCompositionTarget::new(
            ServerObjectId(7),
            Size::new(2.0, 2.0),
        ));
        let target = comp.remove_target(id).unwrap();
        assert_eq!(target.root_visual, ServerObjectId(7));
        assert!(comp.remove_target(id).is_none());
    }
}
