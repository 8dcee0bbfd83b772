use std::time::Duration;

use crate::{
    core::{Point, Rgba8, ServerObjectId},
    error::{SceniumError, SceniumResult},
    graph::{Graph, ServerObject},
};

/// Easing applied between consecutive keyframes. A deliberately small set;
/// scene producers wanting fancier curves can densify their keyframes.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub enum Ease {
    Linear,
    QuadIn,
    QuadOut,
    QuadInOut,
    CubicInOut,
}

impl Ease {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadIn => t * t,
            Self::QuadOut => t * (2.0 - t),
            Self::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - 2.0 * (1.0 - t) * (1.0 - t)
                }
            }
            Self::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - 4.0 * (1.0 - t).powi(3)
                }
            }
        }
    }
}

pub trait Lerp: Sized {
    fn lerp(a: &Self, b: &Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        a + (b - a) * t
    }
}

impl Lerp for Point {
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        Point::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
    }
}

impl Lerp for Rgba8 {
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        fn lerp_u8(a: u8, b: u8, t: f64) -> u8 {
            let a = f64::from(a);
            let b = f64::from(b);
            (a + (b - a) * t).round().clamp(0.0, 255.0) as u8
        }

        Self {
            r: lerp_u8(a.r, b.r, t),
            g: lerp_u8(a.g, b.g, t),
            b: lerp_u8(a.b, b.b, t),
            a: lerp_u8(a.a, b.a, t),
        }
    }
}

/// Which server-object property an animation drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AnimatedProperty {
    /// Visual opacity, clamped to `[0, 1]` on apply.
    Opacity,
    /// Visual offset relative to its parent.
    Offset,
    /// Solid-color brush color.
    BrushColor,
}

/// A keyframe value; its kind must match the animated property.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KeyValue {
    Scalar(f64),
    Point(Point),
    Color(Rgba8),
}

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Keyframe {
    /// Offset from the animation start.
    pub at: Duration,
    pub value: KeyValue,
    /// Ease applied toward the next key.
    pub ease: Ease,
}

/// A time-driven value producer shipped through the batch stream.
///
/// Animations attach to the tail of their owning visual's payload and start
/// at the batch's commit timestamp. Registering a second animation for the
/// same `(target, property)` replaces the first.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct AnimationSpec {
    pub target: ServerObjectId,
    pub property: AnimatedProperty,
    /// Sorted by `at`; must be non-empty.
    pub keys: Vec<Keyframe>,
    /// Repeat with period equal to the last key's offset.
    pub repeat: bool,
}

impl AnimationSpec {
    pub fn validate(&self) -> SceniumResult<()> {
        if self.keys.is_empty() {
            return Err(SceniumError::validation(
                "animation must have at least one keyframe",
            ));
        }
        if !self.keys.windows(2).all(|w| w[0].at <= w[1].at) {
            return Err(SceniumError::validation(
                "animation keyframes must be sorted by offset",
            ));
        }
        let consistent = match self.property {
            AnimatedProperty::Opacity => {
                self.keys.iter().all(|k| matches!(k.value, KeyValue::Scalar(_)))
            }
            AnimatedProperty::Offset => {
                self.keys.iter().all(|k| matches!(k.value, KeyValue::Point(_)))
            }
            AnimatedProperty::BrushColor => {
                self.keys.iter().all(|k| matches!(k.value, KeyValue::Color(_)))
            }
        };
        if !consistent {
            return Err(SceniumError::validation(
                "animation keyframe value kind does not match the animated property",
            ));
        }
        if self.repeat && self.duration().is_zero() {
            return Err(SceniumError::validation(
                "repeating animation must span a non-zero duration",
            ));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        self.keys.last().map(|k| k.at).unwrap_or(Duration::ZERO)
    }

    /// Sample at `elapsed` since the animation start.
    ///
    /// Assumes `validate()` passed; out-of-range times clamp to the end
    /// keys, repeat wraps by the total duration.
    pub fn sample(&self, elapsed: Duration) -> KeyValue {
        let total = self.duration();
        let t = if self.repeat && !total.is_zero() {
            Duration::from_nanos((elapsed.as_nanos() % total.as_nanos()) as u64)
        } else {
            elapsed.min(total)
        };

        let idx = self.keys.partition_point(|k| k.at <= t);
        if idx == 0 {
            return self.keys[0].value;
        }
        if idx >= self.keys.len() {
            return self.keys[self.keys.len() - 1].value;
        }

        let a = &self.keys[idx - 1];
        let b = &self.keys[idx];
        let span = b.at.saturating_sub(a.at);
        if span.is_zero() {
            return a.value;
        }
        let frac = (t - a.at).as_secs_f64() / span.as_secs_f64();
        let eased = a.ease.apply(frac);
        match (a.value, b.value) {
            (KeyValue::Scalar(x), KeyValue::Scalar(y)) => KeyValue::Scalar(f64::lerp(&x, &y, eased)),
            (KeyValue::Point(x), KeyValue::Point(y)) => {
                KeyValue::Point(<Point as Lerp>::lerp(&x, &y, eased))
            }
            (KeyValue::Color(x), KeyValue::Color(y)) => KeyValue::Color(Rgba8::lerp(&x, &y, eased)),
            (a, _) => a,
        }
    }
}

struct ActiveAnimation {
    spec: AnimationSpec,
    started_at: Duration,
}

/// Advances every registered animation to the same server time once per
/// render cycle, before rendering.
#[derive(Default)]
pub struct AnimationEngine {
    active: Vec<ActiveAnimation>,
}

impl AnimationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Register `spec` starting at `now`, replacing any prior animation on
    /// the same `(target, property)`.
    pub fn register(&mut self, spec: AnimationSpec, now: Duration) {
        self.active
            .retain(|a| !(a.spec.target == spec.target && a.spec.property == spec.property));
        self.active.push(ActiveAnimation {
            spec,
            started_at: now,
        });
    }

    /// Drop all animations owned by `target`, e.g. when it is disposed.
    pub fn remove_for(&mut self, target: ServerObjectId) {
        self.active.retain(|a| a.spec.target != target);
    }

    /// Advance all animations to `now` and apply their values to the graph.
    ///
    /// Completed animations are deregistered after applying their final
    /// value; animations whose target vanished are dropped.
    pub fn process(&mut self, now: Duration, graph: &mut Graph) {
        self.active.retain_mut(|anim| {
            let elapsed = now.saturating_sub(anim.started_at);
            let value = anim.spec.sample(elapsed);
            let applied = apply_value(graph, anim.spec.target, anim.spec.property, value);
            applied && (anim.spec.repeat || elapsed < anim.spec.duration())
        });
    }
}

fn apply_value(
    graph: &mut Graph,
    target: ServerObjectId,
    property: AnimatedProperty,
    value: KeyValue,
) -> bool {
    let Some(object) = graph.get_mut(target) else {
        return false;
    };
    match (property, value, object) {
        (AnimatedProperty::Opacity, KeyValue::Scalar(v), ServerObject::ContainerVisual(visual)) => {
            visual.state.opacity = v.clamp(0.0, 1.0);
            true
        }
        (AnimatedProperty::Opacity, KeyValue::Scalar(v), ServerObject::DrawListVisual(visual)) => {
            visual.state.opacity = v.clamp(0.0, 1.0);
            true
        }
        (AnimatedProperty::Offset, KeyValue::Point(p), ServerObject::ContainerVisual(visual)) => {
            visual.state.offset = p;
            true
        }
        (AnimatedProperty::Offset, KeyValue::Point(p), ServerObject::DrawListVisual(visual)) => {
            visual.state.offset = p;
            true
        }
        (AnimatedProperty::BrushColor, KeyValue::Color(c), ServerObject::SolidColorBrush(brush)) => {
            brush.color = c;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ObjectKind;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn opacity_anim(target: ServerObjectId, repeat: bool) -> AnimationSpec {
        AnimationSpec {
            target,
            property: AnimatedProperty::Opacity,
            keys: vec![
                Keyframe {
                    at: Duration::ZERO,
                    value: KeyValue::Scalar(0.0),
                    ease: Ease::Linear,
                },
                Keyframe {
                    at: secs(10),
                    value: KeyValue::Scalar(1.0),
                    ease: Ease::Linear,
                },
            ],
            repeat,
        }
    }

    #[test]
    fn easing_curves_are_anchored_and_ordered() {
        for ease in [
            Ease::Linear,
            Ease::QuadIn,
            Ease::QuadOut,
            Ease::QuadInOut,
            Ease::CubicInOut,
        ] {
            assert_eq!(ease.apply(0.0), 0.0);
            assert_eq!(ease.apply(1.0), 1.0);
            assert_eq!(ease.apply(-3.0), 0.0);
            assert_eq!(ease.apply(7.0), 1.0);
        }
        // In-curves lag the identity early on, out-curves lead it, and the
        // symmetric curves cross it at the halfway point.
        assert!(Ease::QuadIn.apply(0.25) < 0.25);
        assert!(Ease::QuadOut.apply(0.25) > 0.25);
        assert_eq!(Ease::QuadInOut.apply(0.5), 0.5);
        assert_eq!(Ease::CubicInOut.apply(0.5), 0.5);
    }

    #[test]
    fn sample_interpolates_between_keys() {
        let anim = opacity_anim(ServerObjectId(1), false);
        assert_eq!(anim.sample(secs(5)), KeyValue::Scalar(0.5));
        assert_eq!(anim.sample(secs(99)), KeyValue::Scalar(1.0));
    }

    #[test]
    fn sample_interpolates_point_keys() {
        let anim = AnimationSpec {
            target: ServerObjectId(1),
            property: AnimatedProperty::Offset,
            keys: vec![
                Keyframe {
                    at: Duration::ZERO,
                    value: KeyValue::Point(Point::new(0.0, 0.0)),
                    ease: Ease::Linear,
                },
                Keyframe {
                    at: secs(4),
                    value: KeyValue::Point(Point::new(8.0, 4.0)),
                    ease: Ease::Linear,
                },
            ],
            repeat: false,
        };
        assert_eq!(anim.sample(secs(2)), KeyValue::Point(Point::new(4.0, 2.0)));
    }

    #[test]
    fn sample_repeat_wraps() {
        let anim = opacity_anim(ServerObjectId(1), true);
        assert_eq!(anim.sample(secs(15)), KeyValue::Scalar(0.5));
    }

    #[test]
    fn validate_rejects_kind_mismatch() {
        let mut anim = opacity_anim(ServerObjectId(1), false);
        anim.keys[1].value = KeyValue::Color(Rgba8::BLACK);
        assert!(anim.validate().is_err());
    }

    #[test]
    fn validate_rejects_unsorted_keys() {
        let mut anim = opacity_anim(ServerObjectId(1), false);
        anim.keys.swap(0, 1);
        assert!(anim.validate().is_err());
    }

    #[test]
    fn process_applies_and_deregisters_on_completion() {
        let mut graph = Graph::new();
        let id = ServerObjectId(7);
        graph.create(id, ObjectKind::DrawListVisual).unwrap();

        let mut engine = AnimationEngine::new();
        engine.register(opacity_anim(id, false), Duration::ZERO);

        engine.process(secs(5), &mut graph);
        assert_eq!(engine.len(), 1);
        let ServerObject::DrawListVisual(v) = graph.get(id).unwrap() else {
            panic!("expected draw-list visual");
        };
        assert!((v.state.opacity - 0.5).abs() < 1e-9);

        engine.process(secs(10), &mut graph);
        assert!(engine.is_empty());
        let ServerObject::DrawListVisual(v) = graph.get(id).unwrap() else {
            panic!("expected draw-list visual");
        };
        assert_eq!(v.state.opacity, 1.0);
    }

    #[test]
    fn register_replaces_same_target_property() {
        let mut engine = AnimationEngine::new();
        let id = ServerObjectId(3);
        engine.register(opacity_anim(id, false), Duration::ZERO);
        engine.register(opacity_anim(id, true), secs(1));
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn process_drops_animation_with_missing_target() {
        let mut graph = Graph::new();
        let mut engine = AnimationEngine::new();
        engine.register(opacity_anim(ServerObjectId(42), true), Duration::ZERO);
        engine.process(secs(1), &mut graph);
        assert!(engine.is_empty());
    }
}
