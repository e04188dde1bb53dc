//! Debounce and hold detection over sampled line levels.

use std::time::{Duration, Instant};

use super::{Edge, InputSpec};

/// Turns a stream of `(active, instant)` samples into edges.
///
/// A level change becomes a press or release once it has been stable for the
/// debounce interval. While pressed, a hold fires after `hold`, then again
/// every `hold` when repeating.
#[derive(Debug, Clone)]
pub struct EdgeTracker {
    debounce: Option<Duration>,
    hold: Duration,
    hold_repeat: bool,
    stable: bool,
    candidate: Option<(bool, Instant)>,
    pressed_at: Option<Instant>,
    last_hold: Option<Instant>,
}

impl EdgeTracker {
    /// Starts from the level read at bind time; no edge is reported for it.
    pub fn new(spec: &InputSpec, initial: bool, now: Instant) -> Self {
        Self {
            debounce: spec.debounce,
            hold: spec.hold,
            hold_repeat: spec.hold_repeat,
            stable: initial,
            candidate: None,
            pressed_at: initial.then_some(now),
            last_hold: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    /// Feeds one sample and returns the edge it completes, if any.
    pub fn sample(&mut self, active: bool, now: Instant) -> Option<Edge> {
        if active != self.stable {
            let since = match self.candidate {
                Some((level, since)) if level == active => since,
                _ => {
                    self.candidate = Some((active, now));
                    now
                }
            };

            let settled = self
                .debounce
                .is_none_or(|debounce| now.saturating_duration_since(since) >= debounce);
            if !settled {
                return None;
            }

            self.candidate = None;
            self.stable = active;
            return Some(if active {
                self.pressed_at = Some(now);
                self.last_hold = None;
                Edge::Press
            } else {
                self.pressed_at = None;
                self.last_hold = None;
                Edge::Release
            });
        }

        self.candidate = None;
        self.check_hold(now)
    }

    fn check_hold(&mut self, now: Instant) -> Option<Edge> {
        let pressed_at = self.pressed_at?;

        match self.last_hold {
            None if now.saturating_duration_since(pressed_at) >= self.hold => {
                self.last_hold = Some(now);
                Some(Edge::Hold)
            }
            Some(last) if self.hold_repeat && now.saturating_duration_since(last) >= self.hold => {
                self.last_hold = Some(now);
                Some(Edge::Hold)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn spec(debounce_ms: Option<u64>, hold_ms: u64, hold_repeat: bool) -> InputSpec {
        InputSpec {
            pin: 17,
            pull_up: true,
            debounce: debounce_ms.map(Duration::from_millis),
            hold: Duration::from_millis(hold_ms),
            hold_repeat,
        }
    }

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn press_and_release_without_debounce() {
        let t0 = Instant::now();
        let mut tracker = EdgeTracker::new(&spec(None, 1000, false), false, t0);

        assert_eq!(tracker.sample(false, ms(t0, 5)), None);
        assert_eq!(tracker.sample(true, ms(t0, 10)), Some(Edge::Press));
        assert!(tracker.is_pressed());
        assert_eq!(tracker.sample(false, ms(t0, 20)), Some(Edge::Release));
    }

    #[test]
    fn bounce_shorter_than_debounce_is_ignored() {
        let t0 = Instant::now();
        let mut tracker = EdgeTracker::new(&spec(Some(50), 1000, false), false, t0);

        assert_eq!(tracker.sample(true, ms(t0, 10)), None);
        assert_eq!(tracker.sample(false, ms(t0, 20)), None);
        assert_eq!(tracker.sample(true, ms(t0, 30)), None);
        assert_eq!(tracker.sample(true, ms(t0, 60)), None);
        assert_eq!(tracker.sample(true, ms(t0, 80)), Some(Edge::Press));
    }

    #[test]
    fn hold_fires_once_without_repeat() {
        let t0 = Instant::now();
        let mut tracker = EdgeTracker::new(&spec(None, 100, false), false, t0);

        assert_eq!(tracker.sample(true, t0), Some(Edge::Press));
        assert_eq!(tracker.sample(true, ms(t0, 50)), None);
        assert_eq!(tracker.sample(true, ms(t0, 100)), Some(Edge::Hold));
        assert_eq!(tracker.sample(true, ms(t0, 250)), None);
        assert_eq!(tracker.sample(false, ms(t0, 260)), Some(Edge::Release));
    }

    #[test]
    fn hold_repeats_every_interval() {
        let t0 = Instant::now();
        let mut tracker = EdgeTracker::new(&spec(None, 100, true), false, t0);

        tracker.sample(true, t0);
        let holds = (1..=35)
            .filter_map(|i| tracker.sample(true, ms(t0, i * 10)))
            .count();
        assert_eq!(holds, 3);
    }

    #[test]
    fn initially_pressed_line_reports_no_press() {
        let t0 = Instant::now();
        let mut tracker = EdgeTracker::new(&spec(None, 100, false), true, t0);

        assert_eq!(tracker.sample(true, ms(t0, 10)), None);
        assert_eq!(tracker.sample(false, ms(t0, 20)), Some(Edge::Release));
    }

    proptest! {
        #[test]
        fn edges_alternate_between_press_and_release(
            levels in proptest::collection::vec(any::<bool>(), 1..200),
            debounce in proptest::option::of(0u64..40),
        ) {
            let t0 = Instant::now();
            let mut tracker = EdgeTracker::new(&spec(debounce, 10_000, false), false, t0);
            let mut pressed = false;

            for (i, level) in levels.into_iter().enumerate() {
                match tracker.sample(level, ms(t0, i as u64 * 7)) {
                    Some(Edge::Press) => {
                        prop_assert!(!pressed);
                        pressed = true;
                    }
                    Some(Edge::Release) => {
                        prop_assert!(pressed);
                        pressed = false;
                    }
                    Some(Edge::Hold) => prop_assert!(pressed),
                    None => {}
                }
                prop_assert_eq!(tracker.is_pressed(), pressed);
            }
        }
    }
}
