use crate::{
    backend::{RenderBackend, Surface},
    core::{Affine, Rect, ServerObjectId, Size},
    drawing::{self, DrawingContext},
    error::{SceniumError, SceniumResult},
    graph::{Graph, ServerObject},
};

/// Identity of a registered composition target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// A per-surface render sink.
///
/// Owns the surface it renders into and a reference to the root visual to
/// draw. Registered and removed by the windowing collaborator; rendered
/// once per cycle while active, in registration order.
#[derive(Debug)]
pub struct ServerCompositionTarget {
    pub root_visual: ServerObjectId,
    pub surface: Surface,
}

impl ServerCompositionTarget {
    pub fn new(root_visual: ServerObjectId, size: Size) -> Self {
        Self {
            root_visual,
            surface: Surface::from_size(size),
        }
    }

    pub(crate) fn resize(&mut self, size: Size) {
        self.surface = Surface::from_size(size);
    }

    /// Draw the root subtree. Called only from within a render cycle, after
    /// resource reconciliation, with the backend context current.
    pub(crate) fn render(
        &mut self,
        graph: &Graph,
        backend: &mut dyn RenderBackend,
    ) -> SceniumResult<()> {
        let mut ctx = backend.begin_draw(&mut self.surface)?;
        render_visual(
            graph,
            self.root_visual,
            Affine::IDENTITY,
            ctx.as_mut(),
            &mut Vec::new(),
        )
    }
}

/// Recursive paint walk over the server visual graph.
///
/// A missing visual id is skipped rather than failed: the referenced
/// subtree may have been disposed by an earlier batch in the same cycle.
/// `trail` holds the container ids on the current path; a child that
/// reappears on its own ancestor chain is a protocol violation.
pub(crate) fn render_visual(
    graph: &Graph,
    id: ServerObjectId,
    parent: Affine,
    ctx: &mut dyn DrawingContext,
    trail: &mut Vec<ServerObjectId>,
) -> SceniumResult<()> {
    if trail.contains(&id) {
        return Err(SceniumError::protocol(format!(
            "visual {} is its own ancestor",
            id.0
        )));
    }
    let Some(object) = graph.get(id) else {
        tracing::trace!(id = id.0, "skipping vanished visual");
        return Ok(());
    };
    let Some(state) = object.visual_state() else {
        return Ok(());
    };
    if !state.visible || state.opacity <= 0.0 {
        return Ok(());
    }

    let transform = parent * Affine::translate(state.offset.to_vec2()) * state.transform;
    ctx.set_transform(transform);

    let mut pushed = 0usize;
    if state.clip_to_bounds {
        ctx.push_clip(Rect::from_origin_size((0.0, 0.0), state.size));
        pushed += 1;
    }
    if let Some(clip) = state.clip {
        ctx.push_clip(clip);
        pushed += 1;
    }
    let has_opacity = state.opacity < 1.0;
    if has_opacity {
        ctx.push_opacity(state.opacity);
    }

    let result = match object {
        ServerObject::DrawListVisual(visual) => drawing::replay(&visual.commands, graph, ctx),
        ServerObject::ContainerVisual(visual) => {
            trail.push(id);
            let mut result = Ok(());
            for &child in &visual.children {
                result = render_visual(graph, child, transform, ctx, trail);
                if result.is_err() {
                    break;
                }
                ctx.set_transform(transform);
            }
            trail.pop();
            result
        }
        _ => Ok(()),
    };

    if has_opacity {
        ctx.pop_opacity();
    }
    for _ in 0..pushed {
        ctx.pop_clip();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::core::{ObjectKind, Point, Rgba8};
    use crate::drawing::DrawCommand;
    use crate::graph::{ServerObject, VisualState};

    fn build_graph() -> (Graph, ServerObjectId) {
        let mut graph = Graph::new();
        let root = ServerObjectId(1);
        let leaf = ServerObjectId(2);
        let brush = ServerObjectId(3);
        graph.create(root, ObjectKind::ContainerVisual).unwrap();
        graph.create(leaf, ObjectKind::DrawListVisual).unwrap();
        graph.create(brush, ObjectKind::SolidColorBrush).unwrap();

        if let Some(ServerObject::SolidColorBrush(b)) = graph.get_mut(brush) {
            b.color = Rgba8::rgb(255, 0, 0);
        }
        if let Some(ServerObject::ContainerVisual(c)) = graph.get_mut(root) {
            c.state.size = Size::new(8.0, 8.0);
            c.children.push(leaf);
        }
        if let Some(ServerObject::DrawListVisual(d)) = graph.get_mut(leaf) {
            d.state.offset = Point::new(2.0, 2.0);
            d.state.size = Size::new(4.0, 4.0);
            d.commands.push(DrawCommand::DrawRectangle {
                brush: Some(brush),
                pen: None,
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
            });
        }
        (graph, root)
    }

    #[test]
    fn renders_child_at_offset() {
        let (graph, root) = build_graph();
        let mut backend = CpuBackend::new();
        let mut target = ServerCompositionTarget::new(root, Size::new(8.0, 8.0));
        target.render(&graph, &mut backend).unwrap();
        assert_eq!(target.surface.pixel(3, 3), Rgba8::rgb(255, 0, 0));
        assert_eq!(target.surface.pixel(0, 0), Rgba8::TRANSPARENT);
    }

    #[test]
    fn invisible_visual_draws_nothing() {
        let (mut graph, root) = build_graph();
        if let Some(ServerObject::ContainerVisual(c)) = graph.get_mut(root) {
            c.state.visible = false;
        }
        let mut backend = CpuBackend::new();
        let mut target = ServerCompositionTarget::new(root, Size::new(8.0, 8.0));
        target.render(&graph, &mut backend).unwrap();
        assert_eq!(target.surface.pixel(3, 3), Rgba8::TRANSPARENT);
    }

    #[test]
    fn vanished_root_is_skipped() {
        let (mut graph, root) = build_graph();
        graph.dispose(root);
        let mut backend = CpuBackend::new();
        let mut target = ServerCompositionTarget::new(root, Size::new(8.0, 8.0));
        target.render(&graph, &mut backend).unwrap();
    }

    #[test]
    fn self_referential_child_list_is_rejected() {
        let (mut graph, root) = build_graph();
        if let Some(ServerObject::ContainerVisual(c)) = graph.get_mut(root) {
            c.children.push(root);
        }
        let mut backend = CpuBackend::new();
        let mut target = ServerCompositionTarget::new(root, Size::new(8.0, 8.0));
        let err = target.render(&graph, &mut backend).unwrap_err();
        assert!(matches!(err, SceniumError::Protocol(_)));
    }

    #[test]
    fn resize_replaces_surface() {
        let (_, root) = build_graph();
        let mut target = ServerCompositionTarget::new(root, Size::new(8.0, 8.0));
        target.resize(Size::new(16.0, 4.0));
        assert_eq!(target.surface.width, 16);
        assert_eq!(target.surface.height, 4);
    }
}
