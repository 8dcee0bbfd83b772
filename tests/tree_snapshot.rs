use std::time::Duration;

use scenium::{
    animation::{AnimatedProperty, AnimationSpec, Ease, KeyValue, Keyframe},
    backend::CpuBackend,
    drawing::DrawCommand,
    graph::VisualState,
    snapshot::DiagnosticValue,
    ObjectKind, Point, Rect, Rgba8, ServerCompositor, ServerObjectId, Size,
};

const ROOT: ServerObjectId = ServerObjectId(1);
const CARD: ServerObjectId = ServerObjectId(2);
const BRUSH: ServerObjectId = ServerObjectId(3);

fn compositor_with_scene() -> ServerCompositor {
    let comp = ServerCompositor::new(Box::new(CpuBackend::new()));

    let mut w = comp.batch_writer();
    w.create_object(ROOT, ObjectKind::ContainerVisual);
    w.create_object(CARD, ObjectKind::DrawListVisual);
    w.create_object(BRUSH, ObjectKind::SolidColorBrush);
    w.solid_color_brush(BRUSH, Rgba8::rgb(0, 128, 255), 1.0);

    let root_state = VisualState {
        size: Size::new(16.0, 16.0),
        ..VisualState::default()
    };
    w.container_visual(ROOT, &root_state, &[CARD], &[]);

    let card_state = VisualState {
        offset: Point::new(4.0, 4.0),
        size: Size::new(8.0, 8.0),
        ..VisualState::default()
    };
    w.draw_list_visual(
        CARD,
        &card_state,
        &[
            DrawCommand::Clear {
                color: Rgba8::BLACK,
            },
            DrawCommand::DrawRectangle {
                brush: Some(BRUSH),
                pen: None,
                rect: Rect::new(0.0, 0.0, 4.0, 4.0),
            },
        ],
        &[],
    );
    comp.enqueue_batch(w.finish());
    comp
}

fn recolor_brush(comp: &ServerCompositor, color: Rgba8) {
    let mut w = comp.batch_writer();
    w.solid_color_brush(BRUSH, color, 1.0);
    comp.enqueue_batch(w.finish());
}

fn brush_color(op: &scenium::snapshot::DrawOperation) -> Rgba8 {
    match op.params.get("Brush") {
        Some(DiagnosticValue::Brush(scenium::drawing::ImmutableBrush::Solid {
            color, ..
        })) => *color,
        other => panic!("expected a solid brush param, got {other:?}"),
    }
}

#[test]
fn snapshot_mirrors_tree_structure() {
    let comp = compositor_with_scene();
    let handle = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();

    let tree = handle.wait().unwrap().unwrap();
    assert_eq!(tree.root.name, "ContainerVisual");
    assert!(tree.root.draw_operations.is_none());
    assert_eq!(tree.root.children.len(), 1);

    let card = &tree.root.children[0];
    assert_eq!(card.name, "DrawListVisual");
    assert_eq!(card.size, Size::new(8.0, 8.0));
    assert!(card.children.is_empty());
}

#[test]
fn draw_operations_are_logged_in_replay_order() {
    let comp = compositor_with_scene();
    let handle = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();

    let tree = handle.wait().unwrap().unwrap();
    let ops = tree.root.children[0].draw_operations.as_ref().unwrap();
    let names: Vec<&str> = ops.iter().map(|op| op.operation.as_str()).collect();
    assert_eq!(names, ["Clear", "DrawRectangle"]);
}

#[test]
fn captured_brush_values_survive_later_mutation() {
    let comp = compositor_with_scene();
    let handle = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();
    let before = handle.wait().unwrap().unwrap();

    recolor_brush(&comp, Rgba8::rgb(255, 0, 0));
    let handle = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();
    let after = handle.wait().unwrap().unwrap();

    let old_ops = before.root.children[0].draw_operations.as_ref().unwrap();
    let new_ops = after.root.children[0].draw_operations.as_ref().unwrap();
    assert_eq!(brush_color(&old_ops[1]), Rgba8::rgb(0, 128, 255));
    assert_eq!(brush_color(&new_ops[1]), Rgba8::rgb(255, 0, 0));
}

#[test]
fn concurrent_snapshots_of_one_cycle_are_equal() {
    let comp = compositor_with_scene();
    let a = comp.take_snapshot_async(ROOT);
    let b = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();

    let a = a.wait().unwrap().unwrap();
    let b = b.wait().unwrap().unwrap();
    assert_eq!(a.root, b.root);
}

#[test]
fn snapshot_of_unknown_root_resolves_to_none() {
    let comp = compositor_with_scene();
    let handle = comp.take_snapshot_async(ServerObjectId(99));
    comp.render(true).unwrap();
    assert!(handle.wait().unwrap().is_none());
}

#[test]
fn snapshot_capture_shows_rasterized_content() {
    let comp = compositor_with_scene();
    let handle = comp.take_snapshot_async(CARD);
    comp.render(true).unwrap();

    let tree = handle.wait().unwrap().unwrap();
    let capture = tree.root.capture().unwrap();
    assert_eq!(capture.pixel(1, 1), Rgba8::rgb(0, 128, 255));
    assert_eq!(capture.pixel(6, 6), Rgba8::BLACK);
}

#[test]
fn animation_shipped_with_a_visual_applies_before_snapshots() {
    let comp = compositor_with_scene();
    comp.render(true).unwrap();

    let fade = AnimationSpec {
        target: CARD,
        property: AnimatedProperty::Opacity,
        keys: vec![Keyframe {
            at: Duration::ZERO,
            value: KeyValue::Scalar(0.5),
            ease: Ease::Linear,
        }],
        repeat: false,
    };
    let card_state = VisualState {
        offset: Point::new(4.0, 4.0),
        size: Size::new(8.0, 8.0),
        ..VisualState::default()
    };
    let mut w = comp.batch_writer();
    w.draw_list_visual(CARD, &card_state, &[], &[fade]);
    comp.enqueue_batch(w.finish());

    let handle = comp.take_snapshot_async(CARD);
    comp.render(true).unwrap();
    let tree = handle.wait().unwrap().unwrap();
    assert_eq!(tree.root.opacity, 0.5);
}

#[test]
fn taken_at_does_not_go_backwards() {
    let comp = compositor_with_scene();
    let a = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();
    let b = comp.take_snapshot_async(ROOT);
    comp.render(true).unwrap();

    let a = a.wait().unwrap().unwrap();
    let b = b.wait().unwrap().unwrap();
    assert!(b.taken_at >= a.taken_at);
}
