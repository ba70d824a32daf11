use crate::matcher::FrameLabel;

/// Consecutive identical frames needed before a label is trusted.
pub const DEFAULT_FRAMES_REQUIRED: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityState {
    /// Label of the current run.
    pub tracked: FrameLabel,
    /// Length of the current run.
    pub run: u32,
    /// `NoFace` until `tracked` has been seen `frames_required` times in a row.
    pub confirmed: FrameLabel,
}

impl Default for StabilityState {
    fn default() -> Self {
        Self {
            tracked: FrameLabel::NoFace,
            run: 0,
            confirmed: FrameLabel::NoFace,
        }
    }
}

/// Debounces noisy per-frame labels into a stable verdict.
#[derive(Debug, Clone)]
pub struct StabilityAggregator {
    frames_required: u32,
    state: StabilityState,
}

impl StabilityAggregator {
    pub fn new(frames_required: u32) -> Self {
        Self {
            frames_required: frames_required.max(1),
            state: StabilityState::default(),
        }
    }

    pub fn observe(&mut self, label: FrameLabel) -> &StabilityState {
        let state = &mut self.state;
        if label == state.tracked {
            state.run = state.run.saturating_add(1);
        } else {
            state.tracked = label;
            state.run = 1;
            state.confirmed = FrameLabel::NoFace;
        }

        if state.run >= self.frames_required {
            state.confirmed = state.tracked.clone();
        }
        if state.run == 0 || state.tracked == FrameLabel::NoFace {
            state.confirmed = FrameLabel::NoFace;
        }
        &self.state
    }

    /// The run reached the required length.
    pub fn is_settled(&self) -> bool {
        self.state.run >= self.frames_required
    }

    /// Frames still needed before the current run settles.
    pub fn remaining(&self) -> u32 {
        self.frames_required.saturating_sub(self.state.run)
    }

    pub fn state(&self) -> &StabilityState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = StabilityState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> FrameLabel {
        FrameLabel::Identified("Alice".into())
    }

    #[test]
    fn test_confirms_exactly_on_twentieth_frame() {
        let mut agg = StabilityAggregator::new(DEFAULT_FRAMES_REQUIRED);
        for i in 1..=30 {
            let state = agg.observe(alice()).clone();
            assert_eq!(state.run, i);
            if i < 20 {
                assert_eq!(state.confirmed, FrameLabel::NoFace, "confirmed early at {}", i);
            } else {
                assert_eq!(state.confirmed, alice());
            }
        }
    }

    #[test]
    fn test_label_change_restarts_run() {
        let mut agg = StabilityAggregator::new(DEFAULT_FRAMES_REQUIRED);
        for _ in 0..25 {
            agg.observe(alice());
        }
        let state = agg.observe(FrameLabel::Identified("Bob".into())).clone();
        assert_eq!(state.run, 1);
        assert_eq!(state.confirmed, FrameLabel::NoFace);

        let state = agg.observe(alice()).clone();
        assert_eq!(state.run, 1);
        assert_eq!(state.tracked, alice());
        assert_eq!(state.confirmed, FrameLabel::NoFace);
        assert_eq!(agg.remaining(), 19);
    }

    #[test]
    fn test_no_face_never_confirms() {
        let mut agg = StabilityAggregator::new(3);
        for _ in 0..5 {
            agg.observe(FrameLabel::NoFace);
        }
        assert!(agg.is_settled());
        assert_eq!(agg.state().confirmed, FrameLabel::NoFace);
    }

    #[test]
    fn test_unknown_can_settle() {
        let mut agg = StabilityAggregator::new(2);
        agg.observe(FrameLabel::Unknown);
        let state = agg.observe(FrameLabel::Unknown);
        assert_eq!(state.confirmed, FrameLabel::Unknown);
    }

    #[test]
    fn test_reset_clears_run() {
        let mut agg = StabilityAggregator::new(2);
        agg.observe(alice());
        agg.observe(alice());
        agg.reset();
        assert_eq!(agg.state(), &StabilityState::default());
        assert_eq!(agg.remaining(), 2);
    }
}
