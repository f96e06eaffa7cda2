use std::time::Duration;

use crate::error::ViewerError;

/// Default auto-play interval between slices.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// What the controller drives: a viewport that can select and redraw a slice.
pub trait SliceTarget {
    fn set_index(&mut self, index: usize) -> Result<(), ViewerError>;
    fn redraw(&mut self) -> Result<(), ViewerError>;
}

/// Snapshot of the playback state exposed to the shell's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub current_index: usize,
    pub total_slices: usize,
    pub is_playing: bool,
}

/// Recurring timer fed from the event loop's frame delta.
#[derive(Debug)]
struct TickTimer {
    elapsed: Duration,
}

/// Slice playback: Stopped, or Playing while a tick timer exists.
///
/// Manual navigation clamps; auto-play wraps from the last slice to the first.
#[derive(Debug)]
pub struct PlaybackController {
    current_index: usize,
    total_slices: usize,
    interval: Duration,
    timer: Option<TickTimer>,
    cancelled: bool,
}

impl PlaybackController {
    pub fn new(interval: Duration) -> Self {
        Self {
            current_index: 0,
            total_slices: 1,
            interval: interval.max(Duration::from_millis(1)),
            timer: None,
            cancelled: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            current_index: self.current_index,
            total_slices: self.total_slices,
            is_playing: self.is_playing(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.timer.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// A new stack was attached: stop and rewind.
    pub fn attach(&mut self, total_slices: usize) {
        self.timer = None;
        self.current_index = 0;
        self.total_slices = total_slices.max(1);
    }

    /// Start auto-play. Does nothing for single-slice stacks or after `cancel`.
    pub fn play(&mut self) {
        if self.cancelled || self.total_slices <= 1 || self.timer.is_some() {
            return;
        }
        log::debug!(
            "Playback started at slice {} every {} ms",
            self.current_index,
            self.interval.as_millis()
        );
        self.timer = Some(TickTimer {
            elapsed: Duration::ZERO,
        });
    }

    pub fn pause(&mut self) {
        if self.timer.take().is_some() {
            log::debug!("Playback paused at slice {}", self.current_index);
        }
    }

    pub fn toggle(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to `index` (clamped). Any manual seek stops auto-play.
    pub fn seek(&mut self, index: usize, target: &mut dyn SliceTarget) -> Result<(), ViewerError> {
        self.pause();
        let index = index.min(self.total_slices - 1);
        target.set_index(index)?;
        self.current_index = index;
        target.redraw()
    }

    /// Move one slice back or forward without wrapping.
    pub fn step(&mut self, delta: isize, target: &mut dyn SliceTarget) -> Result<(), ViewerError> {
        let index = self.current_index.saturating_add_signed(delta);
        self.seek(index, target)
    }

    pub fn first(&mut self, target: &mut dyn SliceTarget) -> Result<(), ViewerError> {
        self.seek(0, target)
    }

    pub fn last(&mut self, target: &mut dyn SliceTarget) -> Result<(), ViewerError> {
        self.seek(self.total_slices - 1, target)
    }

    /// Feed elapsed time to the timer, firing every tick that came due.
    /// Returns the number of ticks fired.
    pub fn advance(&mut self, dt: Duration, target: &mut dyn SliceTarget) -> Result<usize, ViewerError> {
        let Some(timer) = self.timer.as_mut() else {
            return Ok(0);
        };
        timer.elapsed += dt;

        let mut due = 0;
        while timer.elapsed >= self.interval {
            timer.elapsed -= self.interval;
            due += 1;
        }
        // More than one full cycle behind: skip ahead instead of spinning through it.
        if due > self.total_slices {
            due = self.total_slices;
            timer.elapsed = Duration::ZERO;
        }

        for fired in 0..due {
            if let Err(e) = self.tick(target) {
                log::warn!("Playback stopped after {fired} of {due} ticks: {e}");
                self.pause();
                return Err(e);
            }
        }
        Ok(due)
    }

    fn tick(&mut self, target: &mut dyn SliceTarget) -> Result<(), ViewerError> {
        let next = (self.current_index + 1) % self.total_slices;
        target.set_index(next)?;
        self.current_index = next;
        target.redraw()
    }

    /// Stop for good. No tick fires after this, and `play` becomes a no-op.
    pub fn cancel(&mut self) {
        self.timer = None;
        self.cancelled = true;
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Call {
        SetIndex(usize),
        Redraw,
    }

    #[derive(Default)]
    pub struct SpyTarget {
        pub calls: Vec<Call>,
        pub fail: bool,
    }

    impl SliceTarget for SpyTarget {
        fn set_index(&mut self, index: usize) -> Result<(), ViewerError> {
            if self.fail {
                return Err(ViewerError::UseAfterTeardown);
            }
            self.calls.push(Call::SetIndex(index));
            Ok(())
        }

        fn redraw(&mut self) -> Result<(), ViewerError> {
            self.calls.push(Call::Redraw);
            Ok(())
        }
    }

    const TICK: Duration = Duration::from_millis(500);

    fn controller(total: usize) -> PlaybackController {
        let mut c = PlaybackController::new(TICK);
        c.attach(total);
        c
    }

    #[test]
    fn initial_state_is_stopped_on_first_slice() {
        let c = PlaybackController::default();
        assert_eq!(
            c.state(),
            PlaybackState { current_index: 0, total_slices: 1, is_playing: false }
        );
        assert_eq!(c.interval(), DEFAULT_TICK_INTERVAL);
    }

    #[test]
    fn play_is_a_noop_for_single_slice() {
        for total in [0, 1] {
            let mut c = controller(total);
            c.play();
            assert!(!c.is_playing());
            assert_eq!(c.state().total_slices, 1);
        }
    }

    #[test]
    fn ticks_advance_and_redraw() {
        let mut c = controller(24);
        let mut spy = SpyTarget::default();
        c.play();
        for _ in 0..3 {
            assert_eq!(c.advance(TICK, &mut spy).unwrap(), 1);
        }
        assert_eq!(c.state().current_index, 3);
        assert_eq!(
            spy.calls,
            vec![
                Call::SetIndex(1),
                Call::Redraw,
                Call::SetIndex(2),
                Call::Redraw,
                Call::SetIndex(3),
                Call::Redraw
            ]
        );
    }

    #[test]
    fn partial_intervals_accumulate() {
        let mut c = controller(5);
        let mut spy = SpyTarget::default();
        c.play();
        assert_eq!(c.advance(Duration::from_millis(300), &mut spy).unwrap(), 0);
        assert_eq!(c.advance(Duration::from_millis(300), &mut spy).unwrap(), 1);
        assert_eq!(c.advance(Duration::from_millis(1000), &mut spy).unwrap(), 2);
        assert_eq!(c.state().current_index, 3);
    }

    #[test]
    fn long_stalls_fire_at_most_one_cycle() {
        let mut c = controller(4);
        let mut spy = SpyTarget::default();
        c.play();
        assert_eq!(c.advance(Duration::from_secs(60), &mut spy).unwrap(), 4);
        assert_eq!(c.state().current_index, 0);
    }

    #[test]
    fn autoplay_wraps_from_last_to_first() {
        let mut c = controller(6);
        let mut spy = SpyTarget::default();
        c.last(&mut spy).unwrap();
        c.play();
        c.advance(TICK, &mut spy).unwrap();
        assert_eq!(c.state().current_index, 0);
    }

    #[test]
    fn seek_while_playing_pauses() {
        let mut c = controller(10);
        let mut spy = SpyTarget::default();
        c.play();
        c.seek(4, &mut spy).unwrap();
        assert!(!c.is_playing());
        assert_eq!(c.state().current_index, 4);
        assert_eq!(spy.calls, vec![Call::SetIndex(4), Call::Redraw]);
    }

    #[test]
    fn seek_and_step_stay_in_range() {
        let mut c = controller(7);
        let mut spy = SpyTarget::default();
        let moves: [(bool, isize); 9] = [
            (true, 100),
            (false, 1),
            (false, 1),
            (true, 3),
            (false, -5),
            (false, -1),
            (true, 6),
            (false, 1),
            (true, 0),
        ];
        for (is_seek, v) in moves {
            if is_seek {
                c.seek(v as usize, &mut spy).unwrap();
            } else {
                c.step(v, &mut spy).unwrap();
            }
            assert!(c.state().current_index < 7);
        }
    }

    #[test]
    fn step_clamps_without_wrapping() {
        let mut c = controller(3);
        let mut spy = SpyTarget::default();
        c.step(-1, &mut spy).unwrap();
        assert_eq!(c.state().current_index, 0);
        c.last(&mut spy).unwrap();
        c.step(1, &mut spy).unwrap();
        assert_eq!(c.state().current_index, 2);
        c.first(&mut spy).unwrap();
        assert_eq!(c.state().current_index, 0);
    }

    #[test]
    fn attach_resets_regardless_of_state() {
        let mut c = controller(10);
        let mut spy = SpyTarget::default();
        c.seek(7, &mut spy).unwrap();
        c.play();
        c.attach(3);
        assert_eq!(
            c.state(),
            PlaybackState { current_index: 0, total_slices: 3, is_playing: false }
        );
    }

    #[test]
    fn toggle_flips_between_states() {
        let mut c = controller(2);
        c.toggle();
        assert!(c.is_playing());
        c.toggle();
        assert!(!c.is_playing());
    }

    #[test]
    fn paused_controller_never_ticks() {
        let mut c = controller(5);
        let mut spy = SpyTarget::default();
        c.play();
        c.pause();
        assert_eq!(c.advance(Duration::from_secs(5), &mut spy).unwrap(), 0);
        assert!(spy.calls.is_empty());
    }

    #[test]
    fn cancel_stops_ticks_and_blocks_play() {
        let mut c = controller(5);
        let mut spy = SpyTarget::default();
        c.play();
        c.cancel();
        c.play();
        assert!(!c.is_playing());
        assert_eq!(c.advance(Duration::from_secs(5), &mut spy).unwrap(), 0);
        assert!(spy.calls.is_empty());
    }

    #[test]
    fn target_failure_stops_playback() {
        let mut c = controller(5);
        let mut spy = SpyTarget { fail: true, ..Default::default() };
        c.play();
        assert!(c.advance(TICK, &mut spy).is_err());
        assert!(!c.is_playing());
        assert_eq!(c.state().current_index, 0);
    }
}
