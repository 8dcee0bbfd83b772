use std::io::Cursor;

use crate::{
    core::{Affine, Point, Rect, Rgba8, Size},
    drawing::{DrawingContext, ImmutableBrush, ImmutablePen},
    error::{SceniumError, SceniumResult},
};

/// An RGBA8 pixel buffer bound to one output surface or capture.
#[derive(Clone, Debug, PartialEq)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    /// Straight-alpha RGBA8, row-major.
    pub data: Vec<u8>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self::new(
            size.width.max(1.0).ceil() as u32,
            size.height.max(1.0).ceil() as u32,
        )
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba8 {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Rgba8::rgba(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3])
    }

    /// Encode the buffer as a PNG image.
    pub fn to_png(&self) -> SceniumResult<Vec<u8>> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| SceniumError::snapshot("surface buffer does not match dimensions"))?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| SceniumError::snapshot(format!("png encode failed: {e}")))?;
        Ok(out.into_inner())
    }
}

/// The graphics backend the compositor renders through.
///
/// `ensure_context` and `begin_draw` report backend invalidation as
/// `SceniumError::ContextLost`, the one error class a cycle may swallow.
/// `is_ready` gates the whole render phase: a not-ready backend skips
/// jobs and target rendering for the cycle without failing it.
pub trait RenderBackend: Send {
    fn is_ready(&self) -> bool;
    fn ensure_context(&mut self) -> SceniumResult<()>;
    /// Drop any context-scoped state; the next cycle starts fresh.
    fn invalidate_context(&mut self) {}
    fn begin_draw<'a>(
        &mut self,
        surface: &'a mut Surface,
    ) -> SceniumResult<Box<dyn DrawingContext + 'a>>;
}

/// Software rasterizer. Always ready; never loses its context.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl RenderBackend for CpuBackend {
    fn is_ready(&self) -> bool {
        true
    }

    fn ensure_context(&mut self) -> SceniumResult<()> {
        Ok(())
    }

    fn begin_draw<'a>(
        &mut self,
        surface: &'a mut Surface,
    ) -> SceniumResult<Box<dyn DrawingContext + 'a>> {
        Ok(Box::new(CpuContext::new(surface)))
    }
}

/// CPU drawing context: affine transforms, rectangular clips, an opacity
/// stack, and per-pixel brush sampling with straight-alpha src-over.
pub struct CpuContext<'a> {
    surface: &'a mut Surface,
    transform: Affine,
    clip_stack: Vec<Rect>,
    opacity_stack: Vec<f64>,
}

impl<'a> CpuContext<'a> {
    pub fn new(surface: &'a mut Surface) -> Self {
        Self {
            surface,
            transform: Affine::IDENTITY,
            clip_stack: Vec::new(),
            opacity_stack: Vec::new(),
        }
    }

    fn surface_rect(&self) -> Rect {
        Rect::new(
            0.0,
            0.0,
            f64::from(self.surface.width),
            f64::from(self.surface.height),
        )
    }

    fn device_clip(&self) -> Rect {
        let mut clip = self.surface_rect();
        for r in &self.clip_stack {
            clip = clip.intersect(*r);
        }
        clip
    }

    fn opacity(&self) -> f64 {
        self.opacity_stack.iter().product()
    }

    fn blend_pixel(&mut self, x: u32, y: u32, src: Rgba8) {
        if src.a == 0 {
            return;
        }
        let i = (y as usize * self.surface.width as usize + x as usize) * 4;
        let d = &mut self.surface.data[i..i + 4];
        let sa = f64::from(src.a) / 255.0;
        let da = f64::from(d[3]) / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            d.copy_from_slice(&[0, 0, 0, 0]);
            return;
        }
        let blend = |sc: u8, dc: u8| -> u8 {
            let sc = f64::from(sc);
            let dc = f64::from(dc);
            ((sc * sa + dc * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8
        };
        d[0] = blend(src.r, d[0]);
        d[1] = blend(src.g, d[1]);
        d[2] = blend(src.b, d[2]);
        d[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    /// Rasterize a shape defined in local coordinates.
    ///
    /// `local_bounds` bounds the shape, `unit_rect` maps local points to
    /// brush unit space, and `test` decides shape membership per local
    /// point. Device pixels are mapped back through the inverse transform,
    /// so arbitrary affine transforms stay exact.
    fn fill_local(
        &mut self,
        local_bounds: Rect,
        unit_rect: Rect,
        brush: &ImmutableBrush,
        test: impl Fn(Point) -> bool,
    ) {
        if self.transform.determinant().abs() <= f64::EPSILON {
            return;
        }
        let inverse = self.transform.inverse();
        let device = self
            .transform
            .transform_rect_bbox(local_bounds)
            .intersect(self.device_clip());
        if device.width() <= 0.0 || device.height() <= 0.0 {
            return;
        }
        let opacity = self.opacity();

        let x0 = device.x0.floor().max(0.0) as u32;
        let y0 = device.y0.floor().max(0.0) as u32;
        let x1 = (device.x1.ceil() as u32).min(self.surface.width);
        let y1 = (device.y1.ceil() as u32).min(self.surface.height);
        for y in y0..y1 {
            for x in x0..x1 {
                let local = inverse * Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                if !test(local) {
                    continue;
                }
                let u = if unit_rect.width() <= f64::EPSILON {
                    0.0
                } else {
                    (local.x - unit_rect.x0) / unit_rect.width()
                };
                let v = if unit_rect.height() <= f64::EPSILON {
                    0.0
                } else {
                    (local.y - unit_rect.y0) / unit_rect.height()
                };
                let color = brush.sample_unit(u, v).with_opacity(opacity);
                self.blend_pixel(x, y, color);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let ab = b - a;
    let len2 = ab.hypot2();
    if len2 <= f64::EPSILON {
        return (p - a).hypot();
    }
    let t = ((p - a).dot(ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).hypot()
}

impl DrawingContext for CpuContext<'_> {
    fn clear(&mut self, color: Rgba8) {
        for px in self.surface.data.chunks_exact_mut(4) {
            px.copy_from_slice(&[color.r, color.g, color.b, color.a]);
        }
    }

    fn draw_rectangle(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    ) {
        if let Some(brush) = brush {
            self.fill_local(rect, rect, brush, |p| rect.contains(p));
        }
        if let Some(pen) = pen
            && let Some(stroke_brush) = pen.brush.clone()
        {
            let half = pen.thickness.max(0.0) / 2.0;
            let outer = rect.inflate(half, half);
            let inner = rect.inflate(-half, -half);
            self.fill_local(outer, rect, &stroke_brush, |p| {
                outer.contains(p) && !(inner.width() > 0.0 && inner.height() > 0.0 && inner.contains(p))
            });
        }
    }

    fn draw_ellipse(
        &mut self,
        brush: Option<&ImmutableBrush>,
        pen: Option<&ImmutablePen>,
        rect: Rect,
    ) {
        let cx = rect.center().x;
        let cy = rect.center().y;
        let rx = rect.width() / 2.0;
        let ry = rect.height() / 2.0;
        if rx <= 0.0 || ry <= 0.0 {
            return;
        }
        let norm = move |p: Point| -> f64 {
            let dx = (p.x - cx) / rx;
            let dy = (p.y - cy) / ry;
            (dx * dx + dy * dy).sqrt()
        };
        if let Some(brush) = brush {
            self.fill_local(rect, rect, brush, |p| norm(p) <= 1.0);
        }
        if let Some(pen) = pen
            && let Some(stroke_brush) = pen.brush.clone()
        {
            // Stroke band tolerance expressed in normalized radius units.
            let tol = (pen.thickness.max(0.0) / 2.0) / rx.min(ry);
            let half = pen.thickness.max(0.0) / 2.0;
            self.fill_local(rect.inflate(half, half), rect, &stroke_brush, |p| {
                (norm(p) - 1.0).abs() <= tol
            });
        }
    }

    fn draw_line(&mut self, pen: &ImmutablePen, p1: Point, p2: Point) {
        let Some(brush) = pen.brush.clone() else {
            return;
        };
        let half = (pen.thickness.max(0.0) / 2.0).max(0.5);
        let bounds = Rect::from_points(p1, p2).inflate(half, half);
        self.fill_local(bounds, bounds, &brush, |p| {
            distance_to_segment(p, p1, p2) <= half
        });
    }

    fn push_clip(&mut self, rect: Rect) {
        let device = self.transform.transform_rect_bbox(rect);
        let top = self.device_clip().intersect(device);
        self.clip_stack.push(top);
    }

    fn pop_clip(&mut self) {
        self.clip_stack.pop();
    }

    fn push_opacity(&mut self, opacity: f64) {
        self.opacity_stack.push(opacity.clamp(0.0, 1.0));
    }

    fn pop_opacity(&mut self) {
        self.opacity_stack.pop();
    }

    fn set_transform(&mut self, transform: Affine) {
        self.transform = transform;
    }

    fn transform(&self) -> Affine {
        self.transform
    }
}
