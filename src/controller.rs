//! Lock / unlock / confirmation state machine.
//!
//! The controller is a plain value: every method takes the current session
//! time and returns what the UI should show. Timers live in a [`Scheduler`]
//! and only fire from [`AccessController::advance`], so a caller that
//! serializes all calls gets race-free behaviour for free.

use crate::matcher::{FrameLabel, MatchResult};
use crate::scheduler::{Scheduler, TimerKind};
use crate::stability::{StabilityAggregator, StabilityState, DEFAULT_FRAMES_REQUIRED};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessConfig {
    pub frames_required: u32,
    /// Quiet period after locking during which recognition is ignored.
    pub cooldown: Duration,
    /// Hard deadline of a confirmation window.
    pub confirmation_timeout: Duration,
    /// Visible countdown ticks before the open-ended prompt.
    pub countdown_ticks: u32,
    pub countdown_interval: Duration,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            frames_required: DEFAULT_FRAMES_REQUIRED,
            cooldown: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(10),
            countdown_ticks: 5,
            countdown_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Locked,
    AwaitingUnlockConfirmation { candidate: String },
    Unlocked,
    AwaitingLockerRecognition,
    AwaitingLockConfirmation { locker: String },
    OnBreak,
    Ended,
}

/// Externally visible state, with the cooldown split out of `Locked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessPhase {
    LockedCooldown,
    LockedIdle,
    AwaitingUnlockConfirmation,
    Unlocked,
    AwaitingLockerRecognition,
    AwaitingLockConfirmation,
    OnBreak,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub headline: String,
    pub detail: String,
}

impl Status {
    fn new(headline: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct UiVisibility {
    pub confirm_prompt: bool,
    pub lock_button: bool,
    pub session_buttons: bool,
}

/// What the UI should render after an event. `status` is `None` when the
/// text on screen must stay as it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Update {
    pub status: Option<Status>,
    pub ui: UiVisibility,
    pub door_locked: bool,
    pub phase: AccessPhase,
}

/// Leaving the recognition loop for an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Handoff {
    Break { unlocker: Option<String> },
    EndClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cancel {
    Denied,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Lock,
    Unlock,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Lock => "Lock",
            Action::Unlock => "Unlock",
        }
    }
}

pub struct AccessController {
    config: AccessConfig,
    mode: Mode,
    door_locked: bool,
    authorized_locker: Option<String>,
    authorized_unlocker: Option<String>,
    last_lock_at: Option<Duration>,
    stability: StabilityAggregator,
    timers: Scheduler,
}

impl AccessController {
    /// Start locked with no cooldown pending.
    pub fn new(config: AccessConfig) -> Self {
        Self {
            stability: StabilityAggregator::new(config.frames_required),
            config,
            mode: Mode::Locked,
            door_locked: true,
            authorized_locker: None,
            authorized_unlocker: None,
            last_lock_at: None,
            timers: Scheduler::new(),
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn door_locked(&self) -> bool {
        self.door_locked
    }

    pub fn authorized_locker(&self) -> Option<&str> {
        self.authorized_locker.as_deref()
    }

    pub fn authorized_unlocker(&self) -> Option<&str> {
        self.authorized_unlocker.as_deref()
    }

    pub fn last_lock_at(&self) -> Option<Duration> {
        self.last_lock_at
    }

    pub fn stability(&self) -> &StabilityState {
        self.stability.state()
    }

    pub fn is_timer_active(&self, kind: TimerKind) -> bool {
        self.timers.is_active(kind)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn phase(&self, now: Duration) -> AccessPhase {
        match self.mode {
            Mode::Locked if self.cooldown_left(now).is_some() => AccessPhase::LockedCooldown,
            Mode::Locked => AccessPhase::LockedIdle,
            Mode::AwaitingUnlockConfirmation { .. } => AccessPhase::AwaitingUnlockConfirmation,
            Mode::Unlocked => AccessPhase::Unlocked,
            Mode::AwaitingLockerRecognition => AccessPhase::AwaitingLockerRecognition,
            Mode::AwaitingLockConfirmation { .. } => AccessPhase::AwaitingLockConfirmation,
            Mode::OnBreak => AccessPhase::OnBreak,
            Mode::Ended => AccessPhase::Ended,
        }
    }

    fn cooldown_left(&self, now: Duration) -> Option<Duration> {
        let locked_at = self.last_lock_at?;
        let elapsed = now.saturating_sub(locked_at);
        (elapsed < self.config.cooldown).then(|| self.config.cooldown - elapsed)
    }

    fn is_confirming(&self) -> bool {
        matches!(
            self.mode,
            Mode::AwaitingUnlockConfirmation { .. } | Mode::AwaitingLockConfirmation { .. }
        )
    }

    fn update(&self, now: Duration, status: Option<Status>) -> Update {
        let unlocked = self.mode == Mode::Unlocked;
        Update {
            status,
            ui: UiVisibility {
                confirm_prompt: self.is_confirming(),
                lock_button: unlocked,
                session_buttons: unlocked,
            },
            door_locked: self.door_locked,
            phase: self.phase(now),
        }
    }

    fn unlocker_name(&self) -> &str {
        self.authorized_unlocker.as_deref().unwrap_or("Unknown")
    }

    fn granted_status(&self, detail: &str) -> Status {
        Status::new(format!("Access Granted: {}", self.unlocker_name()), detail)
    }

    fn pending(&self) -> Option<(Action, &str)> {
        match &self.mode {
            Mode::AwaitingUnlockConfirmation { candidate } => Some((Action::Unlock, candidate)),
            Mode::AwaitingLockConfirmation { locker } => Some((Action::Lock, locker)),
            _ => None,
        }
    }

    fn countdown_status(&self, remaining: u32) -> Option<Status> {
        let (action, name) = self.pending()?;
        let headline = format!("Confirm {} Identity", action.as_str());
        let detail = if remaining > 0 {
            format!(
                "Is this you: {}?\nAction auto-cancels in {}s (Visual countdown: {}s).",
                name,
                self.config.confirmation_timeout.as_secs(),
                remaining
            )
        } else {
            format!("Is this you: {}? (Awaiting confirmation)", name)
        };
        Some(Status::new(headline, detail))
    }

    /// Process one analyzed frame.
    pub fn on_frame(&mut self, now: Duration, result: &MatchResult) -> Update {
        let label = &result.label;
        let status = match self.mode {
            Mode::AwaitingUnlockConfirmation { .. } | Mode::AwaitingLockConfirmation { .. } => {
                if self.timers.is_active(TimerKind::Countdown) {
                    None
                } else {
                    self.countdown_status(0)
                }
            }
            Mode::AwaitingLockerRecognition => {
                self.stability.observe(label.clone());
                if self.stability.is_settled() {
                    match self.stability.state().confirmed.clone() {
                        FrameLabel::Identified(name) => {
                            return self.open_confirmation(
                                now,
                                Mode::AwaitingLockConfirmation { locker: name },
                            )
                        }
                        other => {
                            log::info!("Locker recognition failed ({})", other);
                            self.mode = Mode::Unlocked;
                            self.stability.reset();
                            Some(Status::new(
                                "Recognition Failed",
                                "Lock initiation failed. Please try again.",
                            ))
                        }
                    }
                } else {
                    Some(self.progress_status(label, Action::Lock))
                }
            }
            Mode::Locked => {
                if let Some(left) = self.cooldown_left(now) {
                    let secs = left.as_millis() / 1000 + 1;
                    let status = Status::new(
                        "System Locked",
                        format!("Unlock Cooldown Active: {} seconds remaining.", secs),
                    );
                    return self.update(now, Some(status));
                }

                self.stability.observe(label.clone());
                if self.stability.is_settled() {
                    match self.stability.state().confirmed.clone() {
                        FrameLabel::Identified(name) => {
                            return self.open_confirmation(
                                now,
                                Mode::AwaitingUnlockConfirmation { candidate: name },
                            )
                        }
                        FrameLabel::Unknown => {
                            log::info!("Unknown face held steady, access denied");
                            self.stability.reset();
                            Some(Status::new(
                                "Access Denied",
                                "Recognition Failed. Please try again.",
                            ))
                        }
                        FrameLabel::NoFace => {
                            self.stability.reset();
                            Some(self.progress_status(label, Action::Unlock))
                        }
                    }
                } else {
                    Some(self.progress_status(label, Action::Unlock))
                }
            }
            Mode::Unlocked => Some(self.granted_status("Door UNLOCKED. Choose options below.")),
            Mode::OnBreak | Mode::Ended => None,
        };

        self.update(now, status)
    }

    fn progress_status(&self, label: &FrameLabel, action: Action) -> Status {
        let state = self.stability.state();
        match (label, action) {
            (FrameLabel::Identified(name), _) if state.run > 0 => {
                let hint = match action {
                    Action::Unlock => "Hold Steady for unlock!",
                    Action::Lock => "Hold Steady to LOCK!",
                };
                Status::new(
                    format!("Recognizing: {}", name),
                    format!("{} ({} frames remaining)", hint, self.stability.remaining()),
                )
            }
            (_, Action::Unlock) => Status::new("Awaiting Recognition", "Scanning for faculty..."),
            (_, Action::Lock) => Status::new(
                "Awaiting Locker Recognition",
                "Please hold a faculty face steady for 5 seconds to initiate lock.",
            ),
        }
    }

    fn open_confirmation(&mut self, now: Duration, mode: Mode) -> Update {
        debug_assert!(
            !self.is_confirming(),
            "confirmation window opened while another is active"
        );

        if let Mode::AwaitingLockConfirmation { locker } = &mode {
            self.authorized_locker = Some(locker.clone());
        }
        self.mode = mode;
        self.stability.reset();

        self.timers.start_once(
            TimerKind::ConfirmationTimeout,
            now + self.config.confirmation_timeout,
        );

        let ticks = self.config.countdown_ticks;
        if ticks > 0 {
            // The first tick is shown right away, the rest come from the timer.
            self.timers.start_repeating(
                TimerKind::Countdown,
                now + self.config.countdown_interval,
                self.config.countdown_interval,
                ticks - 1,
            );
        } else {
            self.timers.cancel(TimerKind::Countdown);
        }

        if let Some((action, name)) = self.pending() {
            log::info!("{} confirmation requested for {}", action.as_str(), name);
        }
        let status = self.countdown_status(ticks);
        self.update(now, status)
    }

    fn stop_confirmation_timers(&mut self) {
        self.timers.cancel(TimerKind::ConfirmationTimeout);
        self.timers.cancel(TimerKind::Countdown);
    }

    /// Explicit "yes". Ignored when nothing awaits confirmation.
    pub fn confirm(&mut self, now: Duration) -> Option<Update> {
        let status = match std::mem::replace(&mut self.mode, Mode::Locked) {
            Mode::AwaitingLockConfirmation { locker } => {
                self.stop_confirmation_timers();
                log::info!("Door locked by {}", locker);
                self.door_locked = true;
                self.last_lock_at = Some(now);
                self.authorized_locker = None;
                self.stability.reset();
                Status::new("System Locked", "Door secured. Cooldown active.")
            }
            Mode::AwaitingUnlockConfirmation { candidate } => {
                self.stop_confirmation_timers();
                log::info!("Door unlocked by {}", candidate);
                self.mode = Mode::Unlocked;
                self.door_locked = false;
                self.authorized_unlocker = Some(candidate);
                self.authorized_locker = None;
                self.stability.reset();
                self.granted_status("Door UNLOCKED. Choose options below.")
            }
            other => {
                self.mode = other;
                log::debug!("confirm ignored, nothing awaits confirmation");
                return None;
            }
        };
        Some(self.update(now, Some(status)))
    }

    /// Explicit "no". Ignored when nothing awaits confirmation.
    pub fn deny(&mut self, now: Duration) -> Option<Update> {
        self.cancel_confirmation(now, Cancel::Denied)
    }

    fn cancel_confirmation(&mut self, now: Duration, reason: Cancel) -> Option<Update> {
        let (action, _) = self.pending()?;
        self.stop_confirmation_timers();
        self.stability.reset();

        let status = match (action, reason) {
            (Action::Lock, _) => {
                self.mode = Mode::Unlocked;
                self.authorized_locker = None;
                match reason {
                    Cancel::Denied => {
                        self.granted_status("Lock cancelled by user. Door is UNLOCKED.")
                    }
                    Cancel::TimedOut => Status::new(
                        "Lock Timed Out",
                        "Lock request cancelled due to inactivity.",
                    ),
                }
            }
            (Action::Unlock, Cancel::Denied) => {
                self.mode = Mode::Locked;
                Status::new(
                    "Access Denied",
                    "Unlock cancelled by user. Awaiting recognition.",
                )
            }
            (Action::Unlock, Cancel::TimedOut) => {
                self.mode = Mode::Locked;
                Status::new(
                    "Unlock Timed Out",
                    "Unlock request cancelled due to inactivity.",
                )
            }
        };
        log::info!("{} confirmation cancelled ({:?})", action.as_str(), reason);
        Some(self.update(now, Some(status)))
    }

    /// Ask to lock the door; only meaningful while unlocked.
    pub fn request_lock(&mut self, now: Duration) -> Option<Update> {
        if self.mode != Mode::Unlocked {
            log::debug!("lock request ignored in {:?}", self.phase(now));
            return None;
        }
        self.mode = Mode::AwaitingLockerRecognition;
        self.stability.reset();
        let status = self.progress_status(&FrameLabel::NoFace, Action::Lock);
        Some(self.update(now, Some(status)))
    }

    /// Hand the session over for a break. Only while unlocked.
    pub fn take_break(&mut self, now: Duration) -> Option<Handoff> {
        if self.mode != Mode::Unlocked {
            log::debug!("break ignored in {:?}", self.phase(now));
            return None;
        }
        self.mode = Mode::OnBreak;
        self.stop_confirmation_timers();
        log::info!("{} is on break", self.unlocker_name());
        Some(Handoff::Break {
            unlocker: self.authorized_unlocker.clone(),
        })
    }

    /// End the class: the door is latched and the session is over.
    pub fn end_class(&mut self, now: Duration) -> Option<Handoff> {
        if self.mode != Mode::Unlocked {
            log::debug!("end of class ignored in {:?}", self.phase(now));
            return None;
        }
        self.mode = Mode::Ended;
        self.door_locked = true;
        self.stop_confirmation_timers();
        log::info!("Class ended and door is locked");
        Some(Handoff::EndClass)
    }

    /// Come back from a break: rescan from a clean locked state.
    pub fn resume_after_break(&mut self, now: Duration) -> Option<Update> {
        if self.mode != Mode::OnBreak {
            log::debug!("resume ignored in {:?}", self.phase(now));
            return None;
        }
        self.mode = Mode::Locked;
        self.door_locked = true;
        self.last_lock_at = None;
        self.authorized_unlocker = None;
        self.authorized_locker = None;
        self.stability.reset();
        let status = Status::new("Professor Back in Class", "Please scan to confirm identity.");
        Some(self.update(now, Some(status)))
    }

    /// Fire every timer due at `now`, in deadline order.
    pub fn advance(&mut self, now: Duration) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(fired) = self.timers.pop_due(now) {
            match fired.kind {
                TimerKind::ConfirmationTimeout => {
                    if let Some(update) = self.cancel_confirmation(now, Cancel::TimedOut) {
                        updates.push(update);
                    }
                }
                TimerKind::Countdown => {
                    if let Some(status) = self.countdown_status(fired.remaining) {
                        updates.push(self.update(now, Some(status)));
                    }
                }
            }
        }
        updates
    }

    /// Drop every pending timer so nothing fires after teardown.
    pub fn shutdown(&mut self) {
        self.timers.cancel_all();
    }

    pub fn is_ended(&self) -> bool {
        self.mode == Mode::Ended
    }
}
