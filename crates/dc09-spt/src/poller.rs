//! Poll scheduler: one worker interleaving main-heartbeat, back-up-heartbeat
//! and routine-message emission. Created on the first `start_poll` or
//! `start_routine` call and exits once all three duties are empty.

use crate::core::{enqueue, transfer_msg, Shared};
use crate::msg::{EventType, MessageParams};
use crate::path::{Branch, Slot};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// Per-branch heartbeat schedule: when it's next due, and whether this will
/// be the branch's first pass (which probes every slot instead of stopping
/// at the first success).
struct BranchState {
    next_deadline: Instant,
    first_pass: bool,
}

impl BranchState {
    fn due_now() -> Self {
        Self {
            next_deadline: Instant::now(),
            first_pass: true,
        }
    }
}

struct RoutineState {
    params: MessageParams,
    interval: i64,
    next_fire: i64,
}

struct PollerState {
    main_interval: Option<Duration>,
    backup_interval: Option<Duration>,
    retry_delay: Duration,
    ok_msg: Option<MessageParams>,
    fail_msg: Option<MessageParams>,
    main_branch: BranchState,
    backup_branch: BranchState,
    routines: Vec<RoutineState>,
}

impl PollerState {
    fn interval_for(&self, branch: Branch) -> Option<Duration> {
        match branch {
            Branch::Main => self.main_interval,
            Branch::BackUp => self.backup_interval,
        }
    }

    fn branch_state(&self, branch: Branch) -> &BranchState {
        match branch {
            Branch::Main => &self.main_branch,
            Branch::BackUp => &self.backup_branch,
        }
    }

    fn branch_state_mut(&mut self, branch: Branch) -> &mut BranchState {
        match branch {
            Branch::Main => &mut self.main_branch,
            Branch::BackUp => &mut self.backup_branch,
        }
    }

    fn idle(&self) -> bool {
        self.main_interval.is_none() && self.backup_interval.is_none() && self.routines.is_empty()
    }
}

pub(crate) struct PollerHandle {
    control: Arc<Mutex<PollerState>>,
    active: Arc<AtomicU8>,
    count: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Bitmask: 1 = heartbeat scheduled, 2 = routines scheduled.
    pub fn active(&self) -> u8 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn start_poll(
    shared: &Arc<Shared>,
    main_interval: Option<Duration>,
    backup_interval: Option<Duration>,
    retry_delay: Duration,
    ok_msg: Option<MessageParams>,
    fail_msg: Option<MessageParams>,
) {
    let mut guard = shared.poller.lock().unwrap();
    if let Some(handle) = guard.as_ref() {
        if handle.running.load(Ordering::Relaxed) {
            let mut c = handle.control.lock().unwrap();
            c.main_interval = main_interval;
            c.backup_interval = backup_interval;
            c.retry_delay = retry_delay;
            c.ok_msg = ok_msg;
            c.fail_msg = fail_msg;
            c.main_branch = BranchState::due_now();
            c.backup_branch = BranchState::due_now();
            return;
        }
    }
    let control = Arc::new(Mutex::new(PollerState {
        main_interval,
        backup_interval,
        retry_delay,
        ok_msg,
        fail_msg,
        main_branch: BranchState::due_now(),
        backup_branch: BranchState::due_now(),
        routines: Vec::new(),
    }));
    *guard = Some(spawn_poller(shared, control));
}

/// Clears heartbeat scheduling only; routines (managed by `start_routine`)
/// are left untouched. The poller observes this on its next cycle and, if
/// routines are also empty, exits.
pub(crate) fn stop(shared: &Arc<Shared>) {
    if let Some(handle) = shared.poller.lock().unwrap().as_ref() {
        let mut c = handle.control.lock().unwrap();
        c.main_interval = None;
        c.backup_interval = None;
    }
}

/// Replaces the routine list wholesale; an empty `routines` clears them.
pub(crate) fn start_routine(shared: &Arc<Shared>, routines: Vec<MessageParams>) {
    let now = Utc::now().timestamp();
    let states: Vec<RoutineState> = routines
        .into_iter()
        .map(|params| {
            let interval = params.interval.unwrap_or(86_400).max(1);
            let start = params.start.unwrap_or(0);
            let next_fire = seed_next_fire(now, interval, start);
            RoutineState {
                params,
                interval,
                next_fire,
            }
        })
        .collect();

    let mut guard = shared.poller.lock().unwrap();
    if let Some(handle) = guard.as_ref() {
        if handle.running.load(Ordering::Relaxed) {
            handle.control.lock().unwrap().routines = states;
            return;
        }
    }
    let control = Arc::new(Mutex::new(PollerState {
        main_interval: None,
        backup_interval: None,
        retry_delay: Duration::from_secs(5),
        ok_msg: None,
        fail_msg: None,
        main_branch: BranchState::due_now(),
        backup_branch: BranchState::due_now(),
        routines: states,
    }));
    *guard = Some(spawn_poller(shared, control));
}

/// Next occurrence at `start` seconds into the current UTC day, rolled
/// forward by whole `interval` steps until it is not in the past.
fn seed_next_fire(now: i64, interval: i64, start: i64) -> i64 {
    let day_start = now - now.rem_euclid(86_400);
    let mut next = day_start + start;
    while next < now {
        next += interval;
    }
    next
}

fn spawn_poller(shared: &Arc<Shared>, control: Arc<Mutex<PollerState>>) -> PollerHandle {
    let active = Arc::new(AtomicU8::new(0));
    let count = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(true));
    let shared2 = Arc::clone(shared);
    let control2 = Arc::clone(&control);
    let active2 = Arc::clone(&active);
    let count2 = Arc::clone(&count);
    let running2 = Arc::clone(&running);
    let handle = thread::spawn(move || run(shared2, control2, active2, count2, running2));
    PollerHandle {
        control,
        active,
        count,
        running,
        _handle: handle,
    }
}

fn run(
    shared: Arc<Shared>,
    control: Arc<Mutex<PollerState>>,
    active: Arc<AtomicU8>,
    count: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    loop {
        let retry_delay = {
            let c = control.lock().unwrap();
            if c.idle() {
                break;
            }
            c.retry_delay
        };

        let main_failed = poll_branch_if_due(&shared, &control, Branch::Main, false);
        poll_branch_if_due(&shared, &control, Branch::BackUp, main_failed);
        fire_due_routines(&shared, &control);

        let bitmask = {
            let c = control.lock().unwrap();
            let mut m = 0u8;
            if c.main_interval.is_some() || c.backup_interval.is_some() {
                m |= 1;
            }
            if !c.routines.is_empty() {
                m |= 2;
            }
            m
        };
        active.store(bitmask, Ordering::Relaxed);
        count.fetch_add(1, Ordering::Relaxed);

        thread::sleep(retry_delay);
    }
    running.store(false, Ordering::Relaxed);
    active.store(0, Ordering::Relaxed);
}

/// Polls `branch` if its own deadline has elapsed, or unconditionally when
/// `forced` (the back-up branch is always probed the cycle main fails, to
/// force a redundancy check). Returns true iff the branch was polled this
/// cycle and no slot succeeded.
fn poll_branch_if_due(shared: &Arc<Shared>, control: &Arc<Mutex<PollerState>>, branch: Branch, forced: bool) -> bool {
    let (interval, due) = {
        let c = control.lock().unwrap();
        let interval = c.interval_for(branch);
        let due = interval.is_some() && (forced || Instant::now() >= c.branch_state(branch).next_deadline);
        (interval, due)
    };
    let Some(interval) = interval else {
        return false;
    };
    if !due {
        return false;
    }
    do_poll_branch(shared, control, branch, interval)
}

fn do_poll_branch(shared: &Arc<Shared>, control: &Arc<Mutex<PollerState>>, branch: Branch, interval: Duration) -> bool {
    let first_pass = control.lock().unwrap().branch_state(branch).first_pass;
    let mut any_success = false;

    for slot in Slot::ALL {
        let exists = shared.paths.lock().unwrap().get(branch, slot).is_some();
        if !exists {
            continue;
        }
        let success = transfer_msg(shared, 0, EventType::Null, "]", branch, slot);
        let prev_ok = shared.paths.lock().unwrap().get(branch, slot).map(|e| e.ok);

        if success {
            if let Some(e) = shared.paths.lock().unwrap().get_mut(branch, slot) {
                e.ok = 1;
            }
            if prev_ok != Some(1) {
                let ok_msg = control.lock().unwrap().ok_msg.clone();
                emit_state(shared, ok_msg.as_ref(), branch, true);
            }
            any_success = true;
            if !first_pass {
                break;
            }
        } else {
            if let Some(e) = shared.paths.lock().unwrap().get_mut(branch, slot) {
                e.ok = 0;
            }
            if prev_ok != Some(0) {
                let fail_msg = control.lock().unwrap().fail_msg.clone();
                emit_state(shared, fail_msg.as_ref(), branch, false);
            }
        }
    }

    let mut c = control.lock().unwrap();
    let bs = c.branch_state_mut(branch);
    bs.first_pass = false;
    if any_success {
        bs.next_deadline = Instant::now() + interval;
    }
    !any_success
}

/// Classifies a message by its `r#type` override, or else by code length
/// (3 digits => Contact-ID, 2 letters => SIA alphanumeric), defaulting to
/// SIA alphanumeric when no code is set.
fn infer_event_type(params: &MessageParams) -> EventType {
    if let Some(t) = params.r#type {
        return t;
    }
    match params.code.as_deref() {
        Some(code) if code.len() == 3 => EventType::AdmCid,
        _ => EventType::SiaDcs,
    }
}

/// Builds and enqueues the state-change message for a branch's OK/FAIL
/// transition, delivering it to the user callback synchronously. A panic
/// inside the callback is caught so it can't kill the poller thread.
fn emit_state(shared: &Arc<Shared>, msg: Option<&MessageParams>, branch: Branch, ok: bool) {
    let Some(base) = msg else {
        return;
    };
    let mut m = base.clone();
    m.zone = Some(branch.as_zone().to_string());
    if m.r#type.is_none() {
        match m.code.as_deref() {
            Some(code) if code.len() == 3 => {
                m.r#type = Some(EventType::AdmCid);
                m.q = Some(if ok { "1" } else { "3" }.to_string());
            }
            Some(code) if code.len() == 2 => {
                m.r#type = Some(EventType::SiaDcs);
            }
            _ => {}
        }
    }
    let Some(event_type) = m.r#type else {
        warn!(code = ?m.code, "poll state-change message has no determinable type");
        return;
    };
    let mtype = event_type.as_dc09_type();
    if mtype == "NULL" {
        return;
    }

    if let Err(e) = enqueue(shared, mtype, &m) {
        warn!(error = %e, "failed to enqueue poll state-change message");
    }

    let callback = shared.callback.lock().unwrap();
    if let Some(cb) = callback.as_ref() {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(mtype, &m)));
        if outcome.is_err() {
            error!("poll state-change callback panicked");
        }
    }
}

fn fire_due_routines(shared: &Arc<Shared>, control: &Arc<Mutex<PollerState>>) {
    let now = Utc::now().timestamp();
    let due: Vec<MessageParams> = {
        let mut c = control.lock().unwrap();
        let mut fired = Vec::new();
        for r in c.routines.iter_mut() {
            if r.next_fire <= now {
                fired.push(r.params.clone());
                r.next_fire += r.interval;
            }
        }
        fired
    };
    for params in due {
        let mtype = infer_event_type(&params).as_dc09_type();
        if let Err(e) = enqueue(shared, mtype, &params) {
            warn!(error = %e, "failed to enqueue routine message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_next_occurrence_forward_from_day_start() {
        let day_start = 1_700_000_000i64 - (1_700_000_000i64 % 86_400);
        let now = day_start + 50;
        let next = seed_next_fire(now, 3600, 10);
        assert!(next >= now);
        assert_eq!((next - day_start - 10).rem_euclid(3600), 0);
    }

    #[test]
    fn seed_rolls_forward_past_a_missed_start() {
        let day_start = 1_700_000_000i64 - (1_700_000_000i64 % 86_400);
        let now = day_start + 5000;
        let next = seed_next_fire(now, 3600, 10);
        assert!(next >= now);
        assert!(next - now < 3600);
    }

    #[test]
    fn infer_event_type_from_code_length() {
        let mut p = MessageParams::new();
        p.code = Some("400".into());
        assert_eq!(infer_event_type(&p), EventType::AdmCid);
        p.code = Some("RP".into());
        assert_eq!(infer_event_type(&p), EventType::SiaDcs);
        p.code = None;
        assert_eq!(infer_event_type(&p), EventType::SiaDcs);
    }

    #[test]
    fn explicit_type_override_wins() {
        let mut p = MessageParams::new();
        p.code = Some("400".into());
        p.r#type = Some(EventType::SiaDcs);
        assert_eq!(infer_event_type(&p), EventType::SiaDcs);
    }
}
