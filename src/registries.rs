//! Process-wide in-memory registries: `AttemptLedger`, `AbortRegistry`,
//! `JudgeRegistry`, `lastReflected`, and the per-session `RUNNING` guard.
//! All are plain `Mutex`-guarded maps owned by one `Registries` struct
//! constructed once at startup and shared via `Arc` across spawned
//! per-session tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bundle of every registry the orchestrator consults between suspension
/// points. Cheap to construct; intended to be wrapped in `Arc` once at
/// startup and shared across spawned per-session tasks.
#[derive(Default)]
pub struct Registries {
    /// (sessionId, humanMessageId) -> attempt count.
    attempts: Mutex<HashMap<(String, String), usize>>,
    /// sessionId -> instant an abort was last observed.
    aborts: Mutex<HashMap<String, Instant>>,
    /// Session ids the core itself created as auxiliary/judge sessions.
    judges: Mutex<HashSet<String>>,
    /// sessionId -> last humanMessageId this session was reflected for.
    last_reflected: Mutex<HashMap<String, String>>,
    /// Session ids with a reflection currently RUNNING.
    running: Mutex<HashSet<String>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    // -- AttemptLedger ----------------------------------------------------

    pub fn attempt_count(&self, session_id: &str, human_msg_id: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(&(session_id.to_string(), human_msg_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Increments and returns the new count.
    pub fn increment_attempt(&self, session_id: &str, human_msg_id: &str) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        let entry = attempts
            .entry((session_id.to_string(), human_msg_id.to_string()))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn clear_attempts(&self, session_id: &str, human_msg_id: &str) {
        self.attempts
            .lock()
            .unwrap()
            .remove(&(session_id.to_string(), human_msg_id.to_string()));
    }

    // -- AbortRegistry ------------------------------------------------------

    pub fn record_abort(&self, session_id: &str) {
        self.aborts
            .lock()
            .unwrap()
            .insert(session_id.to_string(), Instant::now());
    }

    /// Whether an abort for `session_id` was observed after `since`.
    pub fn aborted_after(&self, session_id: &str, since: Instant) -> bool {
        self.aborts
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|t| *t > since)
    }

    /// Whether `session_id` is within its abort cooldown window right now.
    pub fn in_abort_cooldown(&self, session_id: &str, cooldown: Duration) -> bool {
        self.aborts
            .lock()
            .unwrap()
            .get(session_id)
            .is_some_and(|t| t.elapsed() < cooldown)
    }

    /// Purge abort entries older than `cooldown` (lifecycle cleanup).
    pub fn purge_expired_aborts(&self, cooldown: Duration) {
        self.aborts
            .lock()
            .unwrap()
            .retain(|_, t| t.elapsed() < cooldown);
    }

    // -- JudgeRegistry ------------------------------------------------------

    pub fn judge_register(&self, session_id: String) {
        self.judges.lock().unwrap().insert(session_id);
    }

    pub fn judge_unregister(&self, session_id: &str) {
        self.judges.lock().unwrap().remove(session_id);
    }

    pub fn is_judge(&self, session_id: &str) -> bool {
        self.judges.lock().unwrap().contains(session_id)
    }

    /// All still-owned auxiliary session ids, for use at shutdown.
    pub fn judge_ids(&self) -> Vec<String> {
        self.judges.lock().unwrap().iter().cloned().collect()
    }

    // -- lastReflected -------------------------------------------------------

    pub fn last_reflected(&self, session_id: &str) -> Option<String> {
        self.last_reflected.lock().unwrap().get(session_id).cloned()
    }

    pub fn set_last_reflected(&self, session_id: &str, human_msg_id: &str) {
        self.last_reflected
            .lock()
            .unwrap()
            .insert(session_id.to_string(), human_msg_id.to_string());
    }

    pub fn clear_last_reflected(&self, session_id: &str) {
        self.last_reflected.lock().unwrap().remove(session_id);
    }

    // -- RUNNING guard -----------------------------------------------------

    /// Attempt to enter RUNNING for `session_id`. Returns `true` if this
    /// caller now holds the guard (i.e. no reflection was already running).
    pub fn try_enter_running(&self, session_id: &str) -> bool {
        self.running.lock().unwrap().insert(session_id.to_string())
    }

    pub fn exit_running(&self, session_id: &str) {
        self.running.lock().unwrap().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.running.lock().unwrap().contains(session_id)
    }
}

/// RAII guard releasing the RUNNING entry for a session when dropped, so
/// every exit path of the per-reflection algorithm releases the guard even
/// on early `return`.
pub struct RunningGuard<'a> {
    registries: &'a Registries,
    session_id: String,
}

impl<'a> RunningGuard<'a> {
    /// Try to acquire the guard; `None` if a reflection is already RUNNING.
    pub fn try_acquire(registries: &'a Registries, session_id: &str) -> Option<Self> {
        if registries.try_enter_running(session_id) {
            Some(Self {
                registries,
                session_id: session_id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.registries.exit_running(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_count_never_silently_resets() {
        let registries = Registries::new();
        assert_eq!(registries.increment_attempt("s1", "h1"), 1);
        assert_eq!(registries.increment_attempt("s1", "h1"), 2);
        assert_eq!(registries.attempt_count("s1", "h1"), 2);
        registries.clear_attempts("s1", "h1");
        assert_eq!(registries.attempt_count("s1", "h1"), 0);
    }

    #[test]
    fn running_guard_rejects_concurrent_entry() {
        let registries = Registries::new();
        let guard1 = RunningGuard::try_acquire(&registries, "s1");
        assert!(guard1.is_some());
        let guard2 = RunningGuard::try_acquire(&registries, "s1");
        assert!(guard2.is_none());
        drop(guard1);
        let guard3 = RunningGuard::try_acquire(&registries, "s1");
        assert!(guard3.is_some());
    }

    #[test]
    fn abort_cooldown_expires() {
        let registries = Registries::new();
        registries.record_abort("s1");
        assert!(registries.in_abort_cooldown("s1", Duration::from_secs(10)));
        assert!(!registries.in_abort_cooldown("s1", Duration::from_millis(0)));
    }

    #[test]
    fn judge_registry_add_remove() {
        let registries = Registries::new();
        registries.judge_register("aux-1".to_string());
        assert!(registries.is_judge("aux-1"));
        registries.judge_unregister("aux-1");
        assert!(!registries.is_judge("aux-1"));
    }
}
