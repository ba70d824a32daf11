//! Access control sessions driven by a hand-advanced clock
use facegate::scheduler::TimerKind;
use facegate::store::EmbeddingStore;
use facegate::{
    matcher, AccessConfig, AccessController, AccessPhase, FrameLabel, Handoff, MatchResult,
};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn hold(ctl: &mut AccessController, now: Duration, result: &MatchResult, frames: usize) {
    for _ in 0..frames {
        ctl.on_frame(now, result);
    }
}

fn alice() -> MatchResult {
    MatchResult::identified("Alice", 0.1)
}

#[test]
fn empty_store_reports_unknown_for_any_threshold() {
    env_logger::try_init().ok();
    let store = EmbeddingStore::new();
    let probe = facegate::Embedding::from_vec(vec![0.6, 0.8]);
    for threshold in [0.01, 0.9, 100.0] {
        let result = matcher::match_probe(&probe, &store, threshold);
        assert_eq!(result.label, FrameLabel::Unknown);
    }
}

#[test]
fn exact_copy_matches_at_zero_distance() {
    let values: Vec<f32> = (0..128).map(|i| ((i * 53 % 89) as f32 - 44.0) / 13.0).collect();
    let probe = facegate::Embedding::from_vec(values).normalized();
    let mut store = EmbeddingStore::new();
    store.insert("Alice", probe.to_vec());
    for threshold in [f32::MIN_POSITIVE, 0.5, 2.0] {
        let result = matcher::match_probe(&probe, &store, threshold);
        assert_eq!(result.label, FrameLabel::Identified("Alice".into()));
        assert_eq!(result.distance, 0.0);
    }
}

#[test]
fn steady_face_then_deny_returns_to_idle() {
    env_logger::try_init().ok();
    let mut ctl = AccessController::new(AccessConfig::default());

    hold(&mut ctl, secs(1), &alice(), 19);
    assert_eq!(ctl.phase(secs(1)), AccessPhase::LockedIdle);

    let update = ctl.on_frame(secs(1), &alice());
    assert_eq!(update.phase, AccessPhase::AwaitingUnlockConfirmation);
    assert_eq!(ctl.authorized_locker(), None);
    assert!(ctl.is_timer_active(TimerKind::Countdown));
    assert!(ctl.is_timer_active(TimerKind::ConfirmationTimeout));

    let update = ctl.deny(secs(2)).unwrap();
    assert_eq!(update.phase, AccessPhase::LockedIdle);
    assert!(update.door_locked);
    let status = update.status.unwrap();
    assert_eq!(status.headline, "Access Denied");
    assert_eq!(ctl.stability().run, 0);
    assert_eq!(ctl.stability().confirmed, FrameLabel::NoFace);
    assert_eq!(ctl.next_deadline(), None);
}

#[test]
fn unanswered_unlock_times_out() {
    let mut ctl = AccessController::new(AccessConfig::default());
    hold(&mut ctl, secs(0), &alice(), 20);
    assert_eq!(ctl.phase(secs(0)), AccessPhase::AwaitingUnlockConfirmation);

    assert!(ctl
        .advance(ms(9_999))
        .iter()
        .all(|u| u.phase == AccessPhase::AwaitingUnlockConfirmation));

    let updates = ctl.advance(secs(10));
    let last = updates.last().unwrap();
    assert_eq!(last.phase, AccessPhase::LockedIdle);
    let status = last.status.clone().unwrap();
    assert_eq!(status.headline, "Unlock Timed Out");
    assert_ne!(status.headline, "Access Denied");
    assert!(!ctl.is_timer_active(TimerKind::ConfirmationTimeout));
    assert!(!ctl.is_timer_active(TimerKind::Countdown));
}

#[test]
fn full_lock_round_trip_with_cooldown() {
    let config = AccessConfig {
        frames_required: 3,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);

    hold(&mut ctl, secs(0), &alice(), 3);
    ctl.confirm(secs(1)).unwrap();
    assert!(!ctl.door_locked());
    assert_eq!(ctl.authorized_unlocker(), Some("Alice"));

    let update = ctl.request_lock(secs(2)).unwrap();
    assert_eq!(update.phase, AccessPhase::AwaitingLockerRecognition);
    assert_eq!(update.status.unwrap().headline, "Awaiting Locker Recognition");

    let bob = MatchResult::identified("Bob", 0.2);
    hold(&mut ctl, secs(3), &bob, 3);
    assert_eq!(ctl.phase(secs(3)), AccessPhase::AwaitingLockConfirmation);
    assert_eq!(ctl.authorized_locker(), Some("Bob"));

    let update = ctl.confirm(secs(4)).unwrap();
    assert!(update.door_locked);
    assert_eq!(update.phase, AccessPhase::LockedCooldown);
    assert_eq!(ctl.last_lock_at(), Some(secs(4)));

    // Recognition is ignored until the cooldown has elapsed.
    let update = ctl.on_frame(ms(7_500), &alice());
    let status = update.status.unwrap();
    assert_eq!(status.headline, "System Locked");
    assert_eq!(status.detail, "Unlock Cooldown Active: 7 seconds remaining.");
    assert_eq!(ctl.stability().run, 0);

    hold(&mut ctl, secs(14), &alice(), 3);
    assert_eq!(ctl.phase(secs(14)), AccessPhase::AwaitingUnlockConfirmation);
}

#[test]
fn long_steady_run_during_cooldown_is_ignored() {
    let config = AccessConfig {
        frames_required: 3,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);
    hold(&mut ctl, secs(0), &alice(), 3);
    ctl.confirm(secs(0));
    ctl.request_lock(secs(0));
    hold(&mut ctl, secs(0), &alice(), 3);
    ctl.confirm(secs(0)).unwrap();
    assert_eq!(ctl.last_lock_at(), Some(secs(0)));

    for i in 0..50u64 {
        let now = ms(100 + i * 195);
        let update = ctl.on_frame(now, &alice());
        assert_eq!(update.phase, AccessPhase::LockedCooldown, "frame {}", i);
        assert!(!update.ui.confirm_prompt);
        assert_eq!(ctl.stability().run, 0);
    }
    assert_eq!(ctl.next_deadline(), None);

    let update = ctl.on_frame(secs(10), &alice());
    assert_eq!(update.phase, AccessPhase::LockedIdle);
    assert_eq!(ctl.stability().run, 1);
}

#[test]
fn unknown_locker_keeps_door_unlocked() {
    let config = AccessConfig {
        frames_required: 2,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);
    hold(&mut ctl, secs(0), &alice(), 2);
    ctl.confirm(secs(0));
    ctl.request_lock(secs(1));

    let unknown = MatchResult {
        label: FrameLabel::Unknown,
        distance: 1.1,
    };
    hold(&mut ctl, secs(2), &unknown, 2);
    assert_eq!(ctl.phase(secs(2)), AccessPhase::Unlocked);
    assert!(!ctl.door_locked());
}

#[test]
fn lock_timeout_reverts_to_unlocked() {
    let config = AccessConfig {
        frames_required: 1,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);
    ctl.on_frame(secs(0), &alice());
    ctl.confirm(secs(0));
    ctl.request_lock(secs(0));
    ctl.on_frame(secs(1), &alice());
    assert_eq!(ctl.phase(secs(1)), AccessPhase::AwaitingLockConfirmation);

    let updates = ctl.advance(secs(11));
    let last = updates.last().unwrap();
    assert_eq!(last.phase, AccessPhase::Unlocked);
    assert_eq!(last.status.clone().unwrap().headline, "Lock Timed Out");
    assert_eq!(ctl.authorized_locker(), None);
    assert!(!ctl.door_locked());
}

#[test]
fn only_one_confirmation_timer_of_each_kind() {
    let config = AccessConfig {
        frames_required: 1,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);
    ctl.on_frame(secs(0), &alice());
    let deadline = ctl.next_deadline();

    // Frames while confirming must not restart the window.
    hold(&mut ctl, ms(500), &alice(), 5);
    assert_eq!(ctl.next_deadline(), deadline);

    ctl.deny(secs(1));
    assert_eq!(ctl.next_deadline(), None);
    assert!(ctl.advance(secs(30)).is_empty());
}

#[test]
fn end_of_class_latches_the_door() {
    let config = AccessConfig {
        frames_required: 1,
        ..AccessConfig::default()
    };
    let mut ctl = AccessController::new(config);
    ctl.on_frame(secs(0), &alice());
    ctl.confirm(secs(0));

    assert_eq!(ctl.end_class(secs(1)), Some(Handoff::EndClass));
    assert!(ctl.door_locked());
    assert!(ctl.is_ended());
    assert!(ctl.on_frame(secs(2), &alice()).status.is_none());
    assert!(ctl.request_lock(secs(2)).is_none());
}
