//! Per-app operation counters.
//!
//! Counters are shared across every session talking to the same app, so all
//! updates happen under one mutex. Two windows apply: a rolling minute and a
//! five-second burst window; sustained breach arms a 30-second cool-down.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

const MINUTE_MS: i64 = 60_000;
const BURST_MS: i64 = 5_000;
const COOLDOWN_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateOp {
    KvGet,
    KvSet,
    KvDelete,
    CommandExecution,
    CurrentUser,
}

impl RateOp {
    fn caps(self) -> (u32, Option<u32>) {
        match self {
            RateOp::KvGet => (100, Some(20)),
            RateOp::KvSet => (50, Some(10)),
            RateOp::KvDelete => (20, Some(5)),
            RateOp::CommandExecution => (30, None),
            RateOp::CurrentUser => (60, None),
        }
    }

    fn label(self) -> &'static str {
        match self {
            RateOp::KvGet => "kv_get",
            RateOp::KvSet => "kv_set",
            RateOp::KvDelete => "kv_delete",
            RateOp::CommandExecution => "command_execution",
            RateOp::CurrentUser => "current_user",
        }
    }
}

#[derive(Debug, Default)]
struct OpWindow {
    minute_start: i64,
    minute_count: u32,
    burst_start: i64,
    burst_count: u32,
    cooldown_until: i64,
    warned_minute: i64,
}

pub struct RateLimiter {
    app_id: String,
    windows: Mutex<HashMap<RateOp, OpWindow>>,
}

impl RateLimiter {
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, op: RateOp) -> bool {
        self.check_at(op, now_millis())
    }

    /// Timestamp-injectable variant so window arithmetic is testable.
    pub fn check_at(&self, op: RateOp, now: i64) -> bool {
        let (minute_cap, burst_cap) = op.caps();
        let mut windows = self.windows.lock().unwrap();
        let w = windows.entry(op).or_default();

        if now < w.cooldown_until {
            self.warn_once(op, w, "cooling down");
            return false;
        }

        if now - w.minute_start >= MINUTE_MS {
            w.minute_start = now;
            w.minute_count = 0;
        }
        if now - w.burst_start >= BURST_MS {
            w.burst_start = now;
            w.burst_count = 0;
        }

        w.minute_count += 1;
        w.burst_count += 1;

        if let Some(cap) = burst_cap {
            if w.burst_count > cap {
                self.warn_once(op, w, "burst cap");
                return false;
            }
        }

        if w.minute_count > minute_cap {
            // Hammering on well past the cap arms the cool-down.
            if w.minute_count > minute_cap.saturating_mul(2) {
                w.cooldown_until = now + COOLDOWN_MS;
            }
            self.warn_once(op, w, "minute cap");
            return false;
        }

        true
    }

    fn warn_once(&self, op: RateOp, w: &mut OpWindow, reason: &str) {
        if w.warned_minute != w.minute_start {
            w.warned_minute = w.minute_start;
            warn!(
                app = %self.app_id,
                op = op.label(),
                count = w.minute_count,
                reason,
                "rate limit tripped"
            );
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
