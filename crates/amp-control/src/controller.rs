//! Amplifier power state machine.
//!
//! Polls the host audio source, keeps a trailing activity window and switches
//! the amplifier on or off through the command transport. Turning on mutes the
//! system first and ramps the volume back up afterwards so the amplifier's
//! power-on transient is not audible.
//!
//! The loop is single-threaded: settle, ramp and cooldown delays block the
//! loop itself, so a transition can never re-enter while one is in flight.

use std::time::{Duration, Instant};

use amp_bus::ShutdownSignal;

use crate::audio::AudioSource;
use crate::clock::Clock;
use crate::transport::{AmplifierCommand, AmplifierTransport};

/// Timing and volume parameters for the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Delay between activity polls.
    pub poll_interval: Duration,
    /// Trailing inactivity after which the amplifier is switched off.
    pub timeout: Duration,
    /// Wait before the first volume/activity check after startup.
    pub warmup: Duration,
    /// System volume applied before the startup power-on.
    pub startup_volume: i32,
    /// Delay between single-unit volume increments while ramping.
    pub ramp_step: Duration,
    /// Pause after power-on before the ramp starts.
    pub settle: Duration,
    /// Hold after power-off.
    pub cooldown: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(60 * 60),
            warmup: Duration::from_secs(30),
            startup_volume: 10,
            ramp_step: Duration::from_millis(750),
            settle: Duration::from_secs(2),
            cooldown: Duration::from_secs(10),
        }
    }
}

/// Believed power state of the amplifier. No device acknowledgement exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmplifierState {
    Off,
    On,
}

/// Transition executed by a control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    TurnedOn,
    TurnedOff,
}

/// How a volume ramp ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampOutcome {
    Completed,
    /// Volume changed underneath the ramp; the user's value was left alone.
    Interrupted { at_step: i32, observed: i32 },
}

/// Last observed activity plus the trailing timeout.
#[derive(Debug, Clone)]
struct ActivityWindow {
    last_active_at: Option<Instant>,
    timeout: Duration,
}

impl ActivityWindow {
    fn new(timeout: Duration) -> Self {
        Self {
            last_active_at: None,
            timeout,
        }
    }

    fn mark(&mut self, now: Instant) {
        // Never move backwards.
        if self.last_active_at.is_none_or(|last| now > last) {
            self.last_active_at = Some(now);
        }
    }

    fn within_timeout(&self, now: Instant) -> bool {
        self.last_active_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.timeout)
    }

    fn expired(&self, now: Instant) -> bool {
        self.last_active_at
            .is_some_and(|last| now.saturating_duration_since(last) > self.timeout)
    }
}

/// Drives amplifier power from audio activity.
pub struct AmplifierController<A, T, C> {
    audio: A,
    transport: T,
    clock: C,
    config: ControllerConfig,
    state: AmplifierState,
    window: ActivityWindow,
}

impl<A, T, C> AmplifierController<A, T, C>
where
    A: AudioSource,
    T: AmplifierTransport,
    C: Clock,
{
    pub fn new(audio: A, transport: T, clock: C, config: ControllerConfig) -> Self {
        let window = ActivityWindow::new(config.timeout);
        Self {
            audio,
            transport,
            clock,
            config,
            state: AmplifierState::Off,
            window,
        }
    }

    pub fn state(&self) -> AmplifierState {
        self.state
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Warm up, switch the amplifier on once, then poll until `shutdown` fires.
    ///
    /// Shutdown is observed within one poll interval; in-flight settle, ramp
    /// and cooldown delays are not interrupted.
    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        tracing::info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            timeout_secs = self.config.timeout.as_secs(),
            warmup_secs = self.config.warmup.as_secs(),
            "controller starting"
        );
        if !self.warm_up(shutdown) {
            tracing::info!("shutdown during warm-up");
            return;
        }
        while !shutdown.is_triggered() {
            self.cycle();
            self.clock.sleep(self.config.poll_interval);
        }
        tracing::info!(state = ?self.state, "controller stopped");
    }

    /// Startup sequence: wait, preset the volume, power on once and seed the
    /// activity window so the amplifier does not time out immediately.
    ///
    /// Returns `false` if shutdown fired during the wait.
    pub fn warm_up(&mut self, shutdown: &ShutdownSignal) -> bool {
        if !self.pause(self.config.warmup, shutdown) {
            return false;
        }
        self.audio.set_volume(self.config.startup_volume);
        self.clock.sleep(self.config.settle);
        self.turn_on();
        self.window.mark(self.clock.now());
        true
    }

    /// One poll: record activity, then apply at most one transition.
    pub fn cycle(&mut self) -> Option<Transition> {
        let now = self.clock.now();
        if self.audio.is_playing() {
            self.window.mark(now);
        }

        if self.window.within_timeout(now) && self.state == AmplifierState::Off {
            self.turn_on().then_some(Transition::TurnedOn)
        } else if self.window.expired(now) && self.state == AmplifierState::On {
            self.turn_off().then_some(Transition::TurnedOff)
        } else {
            None
        }
    }

    /// Mute, power on, let the amplifier settle and ramp back to the previous
    /// volume. No-op if already on.
    pub fn turn_on(&mut self) -> bool {
        if self.state == AmplifierState::On {
            return false;
        }
        let original = self.audio.volume();
        tracing::info!(original_volume = original, "turning on amplifier");
        self.audio.set_volume(0);
        self.state = AmplifierState::On;
        self.send(AmplifierCommand::PowerOn);
        self.clock.sleep(self.config.settle);
        self.ramp_volume_to(original);
        true
    }

    /// Power off and hold the cooldown. No-op if already off.
    pub fn turn_off(&mut self) -> bool {
        if self.state == AmplifierState::Off {
            return false;
        }
        self.state = AmplifierState::Off;
        tracing::info!("turning off amplifier");
        self.send(AmplifierCommand::PowerOff);
        // Rapid off/on cycles make the relay pop.
        self.clock.sleep(self.config.cooldown);
        true
    }

    /// Raise the volume one unit per step up to `target`.
    ///
    /// Before every step the volume is sampled, the step delay elapses and the
    /// volume is sampled again; any difference means someone else changed it
    /// and the ramp stops without touching the volume again.
    pub fn ramp_volume_to(&mut self, target: i32) -> RampOutcome {
        let target = target.clamp(0, 100);
        for step in 0..target {
            let before = self.audio.volume();
            self.clock.sleep(self.config.ramp_step);
            let observed = self.audio.volume();
            if observed != before {
                tracing::info!(
                    step,
                    expected = before,
                    observed,
                    "volume changed during ramp; stopping"
                );
                return RampOutcome::Interrupted {
                    at_step: step,
                    observed,
                };
            }
            let next = step + 1;
            tracing::debug!(volume = next, "ramping volume");
            self.audio.set_volume(next);
        }
        if target > 0 {
            tracing::info!(volume = target, "volume ramp complete");
        }
        RampOutcome::Completed
    }

    fn send(&self, command: AmplifierCommand) {
        if let Err(e) = self.transport.send(command) {
            // Local state has already moved; it resyncs on the next transition.
            tracing::warn!(
                command = command.payload(),
                error = %e,
                state = ?self.state,
                "amplifier command not delivered"
            );
        }
    }

    /// Sleep for `total` in poll-sized slices, stopping early on shutdown.
    fn pause(&self, total: Duration, shutdown: &ShutdownSignal) -> bool {
        let slice = self.config.poll_interval.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() {
            if shutdown.is_triggered() {
                return false;
            }
            let chunk = remaining.min(slice);
            self.clock.sleep(chunk);
            remaining -= chunk;
        }
        !shutdown.is_triggered()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use amp_bus::PublishError;

    use super::*;
    use crate::clock::ManualClock;

    struct FakeAudio {
        clock: ManualClock,
        playing: Box<dyn Fn(Duration) -> bool>,
        volume: i32,
        reads: usize,
        interfere: Option<(usize, i32)>,
        sets: Vec<i32>,
    }

    impl FakeAudio {
        fn new(clock: &ManualClock, volume: i32, playing: impl Fn(Duration) -> bool + 'static) -> Self {
            Self {
                clock: clock.clone(),
                playing: Box::new(playing),
                volume,
                reads: 0,
                interfere: None,
                sets: Vec::new(),
            }
        }
    }

    impl AudioSource for FakeAudio {
        fn is_playing(&mut self) -> bool {
            (self.playing)(self.clock.elapsed())
        }

        fn volume(&mut self) -> i32 {
            if let Some((at, value)) = self.interfere {
                if at == self.reads {
                    self.volume = value;
                }
            }
            self.reads += 1;
            self.volume
        }

        fn set_volume(&mut self, value: i32) {
            self.volume = value.clamp(0, 100);
            self.sets.push(self.volume);
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        sent: RefCell<Vec<AmplifierCommand>>,
        attempts: Cell<usize>,
        fail_next: Cell<bool>,
    }

    impl FakeTransport {
        fn sent(&self) -> Vec<AmplifierCommand> {
            self.sent.borrow().clone()
        }

        fn count(&self, command: AmplifierCommand) -> usize {
            self.sent.borrow().iter().filter(|c| **c == command).count()
        }
    }

    impl AmplifierTransport for FakeTransport {
        fn send(&self, command: AmplifierCommand) -> Result<(), PublishError> {
            self.attempts.set(self.attempts.get() + 1);
            if self.fail_next.replace(false) {
                return Err(PublishError::NotConnected);
            }
            self.sent.borrow_mut().push(command);
            Ok(())
        }
    }

    type TestController = AmplifierController<FakeAudio, FakeTransport, ManualClock>;

    fn controller(
        clock: &ManualClock,
        volume: i32,
        timeout: Duration,
        playing: impl Fn(Duration) -> bool + 'static,
    ) -> TestController {
        let config = ControllerConfig {
            timeout,
            ..ControllerConfig::default()
        };
        AmplifierController::new(
            FakeAudio::new(clock, volume, playing),
            FakeTransport::default(),
            clock.clone(),
            config,
        )
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn stays_off_without_any_activity() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 20, secs(60), |_| false);
        for _ in 0..1000 {
            assert_eq!(c.cycle(), None);
            clock.sleep(c.config().poll_interval);
        }
        assert_eq!(c.state(), AmplifierState::Off);
        assert!(c.transport.sent().is_empty());
    }

    #[test]
    fn activity_turns_on_and_ramps_to_original_volume() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 4, secs(60), |_| true);

        assert_eq!(c.cycle(), Some(Transition::TurnedOn));

        assert_eq!(c.state(), AmplifierState::On);
        assert_eq!(c.transport.sent(), vec![AmplifierCommand::PowerOn]);
        assert_eq!(c.audio.sets, vec![0, 1, 2, 3, 4]);
        // settle + four ramp steps
        assert_eq!(clock.elapsed(), Duration::from_millis(2000 + 4 * 750));
    }

    #[test]
    fn turn_on_is_idempotent_while_on() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| true);
        for _ in 0..50 {
            c.cycle();
            clock.sleep(c.config().poll_interval);
        }
        assert!(!c.turn_on());
        assert_eq!(c.transport.count(AmplifierCommand::PowerOn), 1);
        assert_eq!(c.transport.count(AmplifierCommand::PowerOff), 0);
    }

    #[test]
    fn turn_off_is_idempotent_while_off() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |t| t.is_zero());
        assert_eq!(c.cycle(), Some(Transition::TurnedOn));
        clock.advance(secs(61));
        assert_eq!(c.cycle(), Some(Transition::TurnedOff));
        for _ in 0..50 {
            assert_eq!(c.cycle(), None);
            clock.sleep(c.config().poll_interval);
        }
        assert!(!c.turn_off());
        assert_eq!(c.transport.count(AmplifierCommand::PowerOff), 1);
    }

    #[test]
    fn turns_on_only_for_activity_within_timeout() {
        let clock = ManualClock::new();
        // Activity at t=0 only, but the controller first polls at t=90s.
        let mut c = controller(&clock, 0, secs(60), |t| t.is_zero());
        c.window.mark(clock.now());
        clock.advance(secs(90));
        assert_eq!(c.cycle(), None);
        assert_eq!(c.state(), AmplifierState::Off);

        // Fresh activity flips it on.
        c.audio.playing = Box::new(|_: Duration| true);
        assert_eq!(c.cycle(), Some(Transition::TurnedOn));
    }

    #[test]
    fn boundary_tick_is_neither_within_nor_expired() {
        let clock = ManualClock::new();
        let mut window = ActivityWindow::new(secs(60));
        let start = clock.now();
        window.mark(start);
        assert!(window.within_timeout(start + Duration::from_millis(59_999)));
        assert!(!window.within_timeout(start + secs(60)));
        assert!(!window.expired(start + secs(60)));
        assert!(window.expired(start + Duration::from_millis(60_001)));
    }

    #[test]
    fn window_never_moves_backwards() {
        let clock = ManualClock::new();
        let mut window = ActivityWindow::new(secs(60));
        let later = clock.now() + secs(5);
        window.mark(later);
        window.mark(clock.now());
        assert_eq!(window.last_active_at, Some(later));
    }

    #[test]
    fn single_burst_turns_off_just_after_timeout() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 3, secs(60), |t| t.is_zero());

        let mut checked_at_30 = false;
        let mut off_at = None;
        while clock.elapsed() < secs(70) {
            let t = clock.elapsed();
            if !checked_at_30 && t >= secs(30) {
                assert_eq!(c.state(), AmplifierState::On);
                checked_at_30 = true;
            }
            if c.cycle() == Some(Transition::TurnedOff) {
                off_at = Some(t);
                break;
            }
            clock.sleep(c.config().poll_interval);
        }

        assert!(checked_at_30);
        let off_at = off_at.expect("amplifier should turn off");
        assert!(off_at > secs(60), "turned off too early at {off_at:?}");
        assert!(off_at <= secs(61), "turned off too late at {off_at:?}");
        assert_eq!(
            c.transport.sent(),
            vec![AmplifierCommand::PowerOn, AmplifierCommand::PowerOff]
        );
    }

    #[test]
    fn periodic_activity_keeps_amplifier_on() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |t| t.as_millis() % 10_000 < 100);

        while clock.elapsed() < secs(5 * 60) {
            c.cycle();
            if clock.elapsed() > secs(1) {
                assert_eq!(c.state(), AmplifierState::On);
            }
            clock.sleep(c.config().poll_interval);
        }

        assert_eq!(c.transport.count(AmplifierCommand::PowerOn), 1);
        assert_eq!(c.transport.count(AmplifierCommand::PowerOff), 0);
    }

    #[test]
    fn failed_power_on_still_advances_state() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |t| t.is_zero());
        c.transport.fail_next.set(true);

        assert_eq!(c.cycle(), Some(Transition::TurnedOn));
        assert_eq!(c.state(), AmplifierState::On);
        assert!(c.transport.sent().is_empty());
        assert_eq!(c.transport.attempts.get(), 1);

        clock.advance(secs(61));
        assert_eq!(c.cycle(), Some(Transition::TurnedOff));
        assert_eq!(c.state(), AmplifierState::Off);
        assert_eq!(c.transport.sent(), vec![AmplifierCommand::PowerOff]);
    }

    #[test]
    fn turn_off_holds_cooldown() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        c.state = AmplifierState::On;
        let before = clock.elapsed();
        assert!(c.turn_off());
        assert_eq!(clock.elapsed() - before, secs(10));
    }

    #[test]
    fn ramp_reaches_target_without_overshoot() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        assert_eq!(c.ramp_volume_to(6), RampOutcome::Completed);
        assert_eq!(c.audio.sets, vec![1, 2, 3, 4, 5, 6]);
        assert!(c.audio.sets.iter().all(|v| *v <= 6));
    }

    #[test]
    fn ramp_clamps_out_of_range_targets() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        assert_eq!(c.ramp_volume_to(-5), RampOutcome::Completed);
        assert!(c.audio.sets.is_empty());

        assert_eq!(c.ramp_volume_to(250), RampOutcome::Completed);
        assert_eq!(c.audio.sets.len(), 100);
        assert_eq!(c.audio.sets.last(), Some(&100));
    }

    #[test]
    fn ramp_stops_when_user_changes_volume() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        // Reads 2k / 2k+1 bracket step k; the user moves the volume during step 2.
        c.audio.interfere = Some((5, 42));

        let outcome = c.ramp_volume_to(10);

        assert_eq!(
            outcome,
            RampOutcome::Interrupted {
                at_step: 2,
                observed: 42
            }
        );
        assert_eq!(c.audio.sets, vec![1, 2]);
        assert_eq!(c.audio.volume, 42);
    }

    #[test]
    fn turn_on_ramp_respects_user_adjustment() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 8, secs(60), |_| true);
        // Read 0 is the snapshot; ramp step 0 uses reads 1 and 2.
        c.audio.interfere = Some((2, 30));

        assert_eq!(c.cycle(), Some(Transition::TurnedOn));
        assert_eq!(c.audio.sets, vec![0]);
        assert_eq!(c.audio.volume, 30);
    }

    #[test]
    fn warm_up_presets_volume_and_powers_on() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        let shutdown = ShutdownSignal::new();

        assert!(c.warm_up(&shutdown));

        assert_eq!(c.state(), AmplifierState::On);
        assert_eq!(c.transport.sent(), vec![AmplifierCommand::PowerOn]);
        // preset 10, mute, ramp back to 10
        assert_eq!(c.audio.sets[0], 10);
        assert_eq!(c.audio.sets[1], 0);
        assert_eq!(c.audio.sets.last(), Some(&10));
        assert!(c.window.within_timeout(clock.now()));
        // No immediate timeout right after startup.
        assert_eq!(c.cycle(), None);
    }

    #[test]
    fn warm_up_aborts_on_shutdown() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| false);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        assert!(!c.warm_up(&shutdown));
        assert_eq!(c.state(), AmplifierState::Off);
        assert!(c.transport.sent().is_empty());
        assert!(c.audio.sets.is_empty());
    }

    #[test]
    fn run_returns_when_shutdown_already_triggered() {
        let clock = ManualClock::new();
        let mut c = controller(&clock, 0, secs(60), |_| true);
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        c.run(&shutdown);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }
}
