use crate::shapes::{LandmarkSet, Rect};

/// What a track-loss predicate gets to look at after a warm start.
#[derive(Debug, Clone, Copy)]
pub struct TrackContext<'a> {
    /// Landmarks the warm start was seeded from
    pub previous: &'a LandmarkSet,
    /// Regression result for the current frame, never empty
    pub current: &'a LandmarkSet,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Warm-start frames since the last detection, this one included
    pub frames_tracked: u32,
}

/// Decides when a track can no longer be trusted and the next frame has to
/// fall back to full face detection.
pub trait TrackLossPolicy: Send {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool;
}

impl<F> TrackLossPolicy for F
where
    F: Fn(&TrackContext<'_>) -> bool + Send,
{
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        self(ctx)
    }
}

/// Pins a closure to the predicate signature so it coerces into a policy.
pub fn from_fn<F>(f: F) -> F
where
    F: Fn(&TrackContext<'_>) -> bool + Send,
{
    f
}

/// Lost once the landmark box is narrower or shorter than the given pixels.
#[derive(Debug, Clone, Copy)]
pub struct MinFaceSize(pub f32);

impl TrackLossPolicy for MinFaceSize {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        match ctx.current.enclosing_bbox() {
            Ok(bbox) => bbox.w < self.0 || bbox.h < self.0,
            Err(_) => true,
        }
    }
}

/// Lost once less than the given fraction of the landmark box is on screen.
#[derive(Debug, Clone, Copy)]
pub struct OutOfFrame(pub f32);

impl TrackLossPolicy for OutOfFrame {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        let Ok(bbox) = ctx.current.enclosing_bbox() else {
            return true;
        };

        if bbox.area() <= 0. {
            let frame = Rect::new(0., 0., ctx.frame_width as f32, ctx.frame_height as f32);
            return !frame.contains(&bbox.origin());
        }

        let visible = bbox
            .clamp_to(ctx.frame_width, ctx.frame_height)
            .map(|r| r.area())
            .unwrap_or(0.);

        visible / bbox.area() < self.0
    }
}

/// Lost when the landmark box area grows or shrinks by more than the given
/// ratio between two frames. Regression drifting off a face tends to blow up
/// or collapse the shape.
#[derive(Debug, Clone, Copy)]
pub struct ScaleJump(pub f32);

impl TrackLossPolicy for ScaleJump {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        let (Ok(previous), Ok(current)) = (
            ctx.previous.enclosing_bbox(),
            ctx.current.enclosing_bbox(),
        ) else {
            return true;
        };

        let (a0, a1) = (previous.area(), current.area());
        if a0 <= 0. || a1 <= 0. {
            return true;
        }

        (a1 / a0).max(a0 / a1) > self.0
    }
}

/// Periodic re-anchor: drop the track after N warm-start frames.
#[derive(Debug, Clone, Copy)]
pub struct ReanchorEvery(pub u32);

impl TrackLossPolicy for ReanchorEvery {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        ctx.frames_tracked >= self.0
    }
}

/// Fires when any of its members does.
pub struct AnyOf(pub Vec<Box<dyn TrackLossPolicy>>);

impl TrackLossPolicy for AnyOf {
    fn is_lost(&self, ctx: &TrackContext<'_>) -> bool {
        self.0.iter().any(|p| p.is_lost(ctx))
    }
}
