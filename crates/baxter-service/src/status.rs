//! Daemon status block: one owner (the [`crate::supervisor::Supervisor`])
//! holds it behind a mutex; readers only ever get a cloned snapshot, so the
//! lock is never held across an I/O boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Failed,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct VerifyCounters {
    pub checked: usize,
    pub ok: usize,
    pub missing: usize,
    pub read_errors: usize,
    pub decrypt_errors: usize,
    pub checksum_errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub state: RunState,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub verify_state: RunState,
    pub last_verify_at: Option<DateTime<Utc>>,
    pub next_verify_at: Option<DateTime<Utc>>,
    pub last_verify_error: Option<String>,
    pub last_verify_result: Option<VerifyCounters>,

    pub last_restore_at: Option<DateTime<Utc>>,
    pub last_restore_path: Option<String>,
    pub last_restore_error: Option<String>,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            last_backup_at: None,
            next_scheduled_at: None,
            last_error: None,
            verify_state: RunState::Idle,
            last_verify_at: None,
            next_verify_at: None,
            last_verify_error: None,
            last_verify_result: None,
            last_restore_at: None,
            last_restore_path: None,
            last_restore_error: None,
        }
    }
}
