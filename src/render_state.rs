//! Per-label fade state machine.
//!
//! Every placed label owns one [`RenderState`] for its text (and one per
//! icon). The state cycles `FadedOut -> FadingIn -> FadedIn -> FadingOut ->
//! FadedOut`; opacity is derived from the elapsed time since the last
//! transition with a smoother-step ease. Interrupting a fade mid-flight
//! keeps opacity continuous by back-dating the start time.

/// Default fade duration in milliseconds.
pub const DEFAULT_FADE_TIME: f64 = 800.0;

/// Fading phase of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadingState {
    /// Fully transparent, not animating.
    #[default]
    FadedOut,
    /// Opacity increasing toward 1.
    FadingIn,
    /// Fully opaque, not animating.
    FadedIn,
    /// Opacity decreasing toward 0.
    FadingOut,
}

/// Fade state machine for one label instance.
///
/// Time values are milliseconds on the caller's frame clock. Time going
/// backward is not guarded; callers feed a monotonic frame time.
#[derive(Debug, Clone)]
pub struct RenderState {
    state: FadingState,
    /// Fade duration in milliseconds.
    fade_time: f64,
    /// Anchor time of the current fade, possibly back-dated for continuity.
    start_time: f64,
    /// Linear fade progress in [0, 1] (1 = fully faded in).
    value: f32,
    /// Eased opacity in [0, 1].
    opacity: f32,
}

impl RenderState {
    /// Create a state at `FadedOut` with the given fade duration (ms).
    pub fn new(fade_time: f64) -> Self {
        Self {
            state: FadingState::FadedOut,
            fade_time,
            start_time: 0.0,
            value: 0.0,
            opacity: 0.0,
        }
    }

    /// Current fading phase.
    pub fn state(&self) -> FadingState {
        self.state
    }

    /// Current eased opacity in [0, 1].
    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// A label is visible while any opacity remains.
    pub fn is_visible(&self) -> bool {
        self.opacity > 0.0
    }

    pub fn is_fading(&self) -> bool {
        matches!(self.state, FadingState::FadingIn | FadingState::FadingOut)
    }

    pub fn is_fading_in(&self) -> bool {
        self.state == FadingState::FadingIn
    }

    pub fn is_fading_out(&self) -> bool {
        self.state == FadingState::FadingOut
    }

    pub fn is_faded_in(&self) -> bool {
        self.state == FadingState::FadedIn
    }

    pub fn is_faded_out(&self) -> bool {
        self.state == FadingState::FadedOut
    }

    /// Begin fading in at `time`. No-op if already fading in or faded in.
    ///
    /// When interrupting a fade-out, the start time is back-dated so the
    /// fade-in resumes from the current opacity instead of snapping to 0.
    pub fn start_fade_in(&mut self, time: f64, disable_fading: bool) {
        match self.state {
            FadingState::FadingIn | FadingState::FadedIn => return,
            FadingState::FadedOut => {
                self.start_time = time;
                self.value = 0.0;
            }
            FadingState::FadingOut => {
                self.start_time = time - self.fade_time * f64::from(self.value);
            }
        }
        if disable_fading {
            self.state = FadingState::FadedIn;
            self.value = 1.0;
            self.opacity = 1.0;
        } else {
            self.state = FadingState::FadingIn;
        }
    }

    /// Begin fading out at `time`. No-op if already fading out or faded out.
    pub fn start_fade_out(&mut self, time: f64) {
        match self.state {
            FadingState::FadingOut | FadingState::FadedOut => return,
            FadingState::FadedIn => {
                self.start_time = time;
                self.value = 1.0;
            }
            FadingState::FadingIn => {
                self.start_time = time - self.fade_time * f64::from(1.0 - self.value);
            }
        }
        self.state = FadingState::FadingOut;
    }

    /// Advance the fade to `time`, recomputing opacity. On completion the
    /// state settles at `FadedIn` or `FadedOut`.
    pub fn update_fading(&mut self, time: f64, disable_fading: bool) {
        match self.state {
            FadingState::FadedIn | FadingState::FadedOut => {}
            FadingState::FadingIn => {
                if disable_fading {
                    self.finish_faded_in();
                    return;
                }
                let t = self.elapsed_fraction(time);
                self.value = t;
                self.opacity = smoother_step(t);
                if t >= 1.0 {
                    self.finish_faded_in();
                }
            }
            FadingState::FadingOut => {
                if disable_fading {
                    self.finish_faded_out();
                    return;
                }
                let t = self.elapsed_fraction(time);
                self.value = 1.0 - t;
                self.opacity = smoother_step(self.value);
                if t >= 1.0 {
                    self.finish_faded_out();
                }
            }
        }
    }

    /// Force the state back to `FadedOut`, clearing timestamps. Used when a
    /// label is evicted or becomes structurally invalid (e.g. its projected
    /// path no longer fits the text).
    pub fn reset(&mut self) {
        self.state = FadingState::FadedOut;
        self.start_time = 0.0;
        self.value = 0.0;
        self.opacity = 0.0;
    }

    fn elapsed_fraction(&self, time: f64) -> f32 {
        if self.fade_time <= 0.0 {
            return 1.0;
        }
        (((time - self.start_time) / self.fade_time).clamp(0.0, 1.0)) as f32
    }

    fn finish_faded_in(&mut self) {
        self.state = FadingState::FadedIn;
        self.value = 1.0;
        self.opacity = 1.0;
    }

    fn finish_faded_out(&mut self) {
        self.state = FadingState::FadedOut;
        self.value = 0.0;
        self.opacity = 0.0;
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new(DEFAULT_FADE_TIME)
    }
}

/// Quintic smoother-step ease over [0, 1].
#[inline]
fn smoother_step(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let rs = RenderState::new(DEFAULT_FADE_TIME);
        assert_eq!(rs.state(), FadingState::FadedOut);
        assert!(!rs.is_visible());
        assert!(!rs.is_fading());
    }

    #[test]
    fn test_fade_in_progression() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, false);
        assert_eq!(rs.state(), FadingState::FadingIn);

        rs.update_fading(400.0, false);
        assert!(rs.opacity() > 0.0 && rs.opacity() < 1.0);
        assert_eq!(rs.state(), FadingState::FadingIn);

        rs.update_fading(1600.0, false);
        assert_eq!(rs.state(), FadingState::FadedIn);
        assert!((rs.opacity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fade_monotonic() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, false);
        let mut last = 0.0;
        for i in 1..=20 {
            rs.update_fading(f64::from(i) * 50.0, false);
            assert!(rs.opacity() >= last);
            last = rs.opacity();
        }
        assert_eq!(rs.state(), FadingState::FadedIn);
        assert!((rs.opacity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_start_fade_in_is_noop_when_fading_in() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, false);
        rs.update_fading(400.0, false);
        let opacity = rs.opacity();
        rs.start_fade_in(400.0, false);
        rs.update_fading(400.0, false);
        assert!((rs.opacity() - opacity).abs() < 1e-6);
    }

    #[test]
    fn test_interrupted_fade_out_keeps_continuity() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, false);
        rs.update_fading(1600.0, false);
        rs.start_fade_out(2000.0);
        rs.update_fading(2400.0, false);
        let mid = rs.opacity();
        assert!(mid > 0.0 && mid < 1.0);

        // Reversing direction must not snap opacity.
        rs.start_fade_in(2400.0, false);
        rs.update_fading(2400.0, false);
        assert!((rs.opacity() - mid).abs() < 0.05);
    }

    #[test]
    fn test_disable_fading_is_instant() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, true);
        assert_eq!(rs.state(), FadingState::FadedIn);
        assert!((rs.opacity() - 1.0).abs() < 1e-6);

        rs.start_fade_out(100.0);
        rs.update_fading(100.0, true);
        assert_eq!(rs.state(), FadingState::FadedOut);
        assert!(rs.opacity() < 1e-6);
    }

    #[test]
    fn test_reset() {
        let mut rs = RenderState::new(800.0);
        rs.start_fade_in(0.0, false);
        rs.update_fading(400.0, false);
        rs.reset();
        assert_eq!(rs.state(), FadingState::FadedOut);
        assert!(!rs.is_visible());
    }
}
