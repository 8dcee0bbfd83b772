#![forbid(unsafe_code)]

pub mod animation;
pub mod backend;
pub mod batch;
pub mod compositor;
pub mod core;
pub mod drawing;
pub mod error;
pub mod graph;
pub mod snapshot;
pub mod target;
pub mod transport;

pub use batch::BatchReceipt;
pub use compositor::{RenderJob, ResourceChange, ServerCompositor};
pub use core::{Affine, ObjectKind, Point, Rect, Rgba8, ServerObjectId, Size};
pub use error::{SceniumError, SceniumResult};
pub use snapshot::{SnapshotHandle, SnapshotTree};
pub use target::{ServerCompositionTarget, TargetId};
