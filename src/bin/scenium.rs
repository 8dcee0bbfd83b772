use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use scenium::{
    animation::{AnimatedProperty, AnimationSpec, Ease, KeyValue, Keyframe},
    backend::CpuBackend,
    core::GradientStop,
    drawing::DrawCommand,
    graph::VisualState,
    snapshot::SnapshotItem,
    ObjectKind, Point, Rect, Rgba8, ServerCompositionTarget, ServerCompositor, ServerObjectId,
    Size, TargetId,
};

#[derive(Parser, Debug)]
#[command(name = "scenium", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the built-in demo scene for a number of cycles and write a PNG.
    Demo(DemoArgs),
    /// Dump a diagnostic tree snapshot of the demo scene as JSON.
    Snapshot(SnapshotArgs),
}

#[derive(Parser, Debug)]
struct DemoArgs {
    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Surface width in pixels.
    #[arg(long, default_value_t = 256)]
    width: u32,

    /// Surface height in pixels.
    #[arg(long, default_value_t = 256)]
    height: u32,

    /// Number of render cycles to run.
    #[arg(long, default_value_t = 30)]
    cycles: u32,

    /// Delay between cycles in milliseconds.
    #[arg(long, default_value_t = 16)]
    frame_delay_ms: u64,
}

#[derive(Parser, Debug)]
struct SnapshotArgs {
    /// Output JSON path (stdout when omitted).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Directory to write per-visual render captures into.
    #[arg(long)]
    captures: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Demo(args) => cmd_demo(args),
        Command::Snapshot(args) => cmd_snapshot(args),
    }
}

const ROOT: ServerObjectId = ServerObjectId(1);
const CARD: ServerObjectId = ServerObjectId(2);
const FILL: ServerObjectId = ServerObjectId(3);
const GRADIENT: ServerObjectId = ServerObjectId(4);
const STROKE: ServerObjectId = ServerObjectId(5);

/// Submit the demo scene as a single mutation batch and wait for it to apply.
fn build_demo_scene(comp: &ServerCompositor, size: Size) -> anyhow::Result<TargetId> {
    let target = comp.add_target(ServerCompositionTarget::new(ROOT, size));

    let stops = vec![
        GradientStop::new(0.0, Rgba8::rgb(30, 60, 200))?,
        GradientStop::new(1.0, Rgba8::rgb(200, 40, 120))?,
    ];

    let mut w = comp.batch_writer();
    w.create_object(ROOT, ObjectKind::ContainerVisual);
    w.create_object(CARD, ObjectKind::DrawListVisual);
    w.create_object(FILL, ObjectKind::SolidColorBrush);
    w.create_object(GRADIENT, ObjectKind::LinearGradientBrush);
    w.create_object(STROKE, ObjectKind::Pen);

    w.solid_color_brush(FILL, Rgba8::rgb(240, 200, 60), 1.0);
    w.linear_gradient_brush(
        GRADIENT,
        Point::new(0.0, 0.0),
        Point::new(1.0, 1.0),
        1.0,
        &stops,
    );
    w.pen(STROKE, Some(FILL), 2.0);

    let root_state = VisualState {
        size,
        ..VisualState::default()
    };
    w.container_visual(ROOT, &root_state, &[CARD], &[]);

    let card_size = Size::new(size.width * 0.5, size.height * 0.5);
    let card_state = VisualState {
        offset: Point::new(size.width * 0.1, size.height * 0.1),
        size: card_size,
        clip_to_bounds: true,
        ..VisualState::default()
    };
    let commands = [
        DrawCommand::DrawRectangle {
            brush: Some(GRADIENT),
            pen: Some(STROKE),
            rect: Rect::new(0.0, 0.0, card_size.width, card_size.height),
        },
        DrawCommand::DrawEllipse {
            brush: Some(FILL),
            pen: None,
            rect: Rect::new(
                card_size.width * 0.25,
                card_size.height * 0.25,
                card_size.width * 0.75,
                card_size.height * 0.75,
            ),
        },
    ];
    let drift = AnimationSpec {
        target: CARD,
        property: AnimatedProperty::Offset,
        keys: vec![
            Keyframe {
                at: Duration::ZERO,
                value: KeyValue::Point(Point::new(size.width * 0.1, size.height * 0.1)),
                ease: Ease::QuadInOut,
            },
            Keyframe {
                at: Duration::from_secs(2),
                value: KeyValue::Point(Point::new(size.width * 0.4, size.height * 0.3)),
                ease: Ease::Linear,
            },
        ],
        repeat: true,
    };
    w.draw_list_visual(CARD, &card_state, &commands, &[drift]);

    let receipt = comp.enqueue_batch(w.finish());
    comp.render(true)?;
    anyhow::ensure!(receipt.wait_processed(), "scene batch was not applied");
    Ok(target)
}

fn cmd_demo(args: DemoArgs) -> anyhow::Result<()> {
    let comp = ServerCompositor::new(Box::new(CpuBackend::new()));
    let size = Size::new(args.width as f64, args.height as f64);
    let target = build_demo_scene(&comp, size)?;

    for _ in 0..args.cycles {
        comp.render(true)?;
        std::thread::sleep(Duration::from_millis(args.frame_delay_ms));
    }

    let png = comp
        .with_target(target, |t| t.surface.to_png())
        .context("demo target vanished")??;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&args.out, png)
        .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_snapshot(args: SnapshotArgs) -> anyhow::Result<()> {
    let comp = ServerCompositor::new(Box::new(CpuBackend::new()));
    let size = Size::new(256.0, 256.0);
    build_demo_scene(&comp, size)?;

    let handle = comp.take_snapshot_async(ROOT);
    comp.render(true)?;
    let tree = handle
        .wait()?
        .context("snapshot root is not a visual in the demo scene")?;

    if let Some(dir) = &args.captures {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create captures dir '{}'", dir.display()))?;
        write_captures(&tree.root, dir, &mut 0)?;
    }

    let json = serde_json::to_string_pretty(&tree).context("serialize snapshot tree")?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("write json '{}'", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn write_captures(item: &SnapshotItem, dir: &std::path::Path, index: &mut u32) -> anyhow::Result<()> {
    if let Some(png) = item.to_png() {
        let path = dir.join(format!("{:03}-{}.png", index, item.name));
        std::fs::write(&path, png?)
            .with_context(|| format!("write capture '{}'", path.display()))?;
        eprintln!("wrote {}", path.display());
        *index += 1;
    }
    for child in &item.children {
        write_captures(child, dir, index)?;
    }
    Ok(())
}
