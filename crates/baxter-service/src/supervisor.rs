//! Supervisor: single-flight backup/verify state machines, two wall-clock
//! schedulers, and config hot-reload, all serialized by one status mutex.
//!
//! Only short critical sections are taken under the lock; the mutex is
//! always released before a runner task is spawned or any I/O is awaited.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use baxter_core::config::{parse_hh_mm, parse_weekday, Config, Schedule, ScheduleSettings};
use baxter_core::engine::{self, EngineContext};
use baxter_core::objectstore::{LocalObjectStore, ObjectStore, RemoteObjectStore};
use baxter_core::paths::StatePaths;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::status::{DaemonStatus, RunState, VerifyCounters};

/// Everything the supervisor needs to build a fresh [`EngineContext`] for a
/// run, captured once at startup. Configuration is re-read from `config`
/// (which config/reload replaces) on every trigger, so a reload takes
/// effect on the next run without restarting the daemon.
pub struct Supervisor {
    paths: StatePaths,
    passphrase: String,
    config_path: PathBuf,
    config: Mutex<Arc<Config>>,
    status: Mutex<DaemonStatus>,
    running: AtomicBool,
    verify_running: AtomicBool,
    backup_schedule_changed: watch::Sender<()>,
    verify_schedule_changed: watch::Sender<()>,
}

impl Supervisor {
    pub fn new(paths: StatePaths, config: Config, config_path: PathBuf, passphrase: String) -> Arc<Self> {
        let (backup_tx, _) = watch::channel(());
        let (verify_tx, _) = watch::channel(());
        Arc::new(Self {
            paths,
            passphrase,
            config_path,
            config: Mutex::new(Arc::new(config)),
            status: Mutex::new(DaemonStatus::default()),
            running: AtomicBool::new(false),
            verify_running: AtomicBool::new(false),
            backup_schedule_changed: backup_tx,
            verify_schedule_changed: verify_tx,
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.lock().clone()
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Build a fresh [`EngineContext`] from the current config snapshot, for
    /// HTTP handlers that need to run an engine operation synchronously
    /// (restore dry-run/run).
    pub async fn engine_context(&self) -> Result<EngineContext, baxter_core::Error> {
        self.build_engine_context().await
    }

    /// Snapshot-copy accessor: takes the lock for the minimum duration and
    /// returns an owned value, per the "global state for status" design note.
    pub fn status_snapshot(&self) -> DaemonStatus {
        self.status.lock().clone()
    }

    pub fn reload_config(&self) -> Result<(), String> {
        let fresh = Config::load(&self.config_path).map_err(|e| e.to_string())?;
        *self.config.lock() = Arc::new(fresh);
        let _ = self.backup_schedule_changed.send(());
        let _ = self.verify_schedule_changed.send(());
        info!("config reloaded");
        Ok(())
    }

    async fn build_engine_context(&self) -> Result<EngineContext, baxter_core::Error> {
        let config = self.config();
        let store = build_store(&self.paths, &config).await?;
        EngineContext::new(self.paths.clone(), (*config).clone(), store, &self.passphrase)
    }

    /// Fail fast with `Err(true)` if a backup is already running (the
    /// caller should report `backup_already_running`/409); otherwise mark
    /// the domain running and spawn the background task, per §4.8.
    pub fn trigger_backup(self: &Arc<Self>) -> Result<(), ()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(());
        }
        {
            let mut status = self.status.lock();
            status.state = RunState::Running;
            status.last_error = None;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_backup().await });
        Ok(())
    }

    async fn run_backup(self: Arc<Self>) {
        let result = match self.build_engine_context().await {
            Ok(ctx) => engine::backup::run(&ctx).await,
            Err(e) => Err(e),
        };
        let mut status = self.status.lock();
        match result {
            Ok(report) => {
                info!(uploaded = report.uploaded, total = report.total, "scheduled backup finished");
                status.state = RunState::Idle;
                status.last_backup_at = Some(Utc::now());
                status.last_error = None;
            }
            Err(e) => {
                error!(error = %e, "backup run failed");
                status.state = RunState::Failed;
                status.last_error = Some(e.to_string());
            }
        }
        drop(status);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn trigger_verify(self: &Arc<Self>) -> Result<(), ()> {
        if self.verify_running.swap(true, Ordering::SeqCst) {
            return Err(());
        }
        {
            let mut status = self.status.lock();
            status.verify_state = RunState::Running;
            status.last_verify_error = None;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_verify().await });
        Ok(())
    }

    async fn run_verify(self: Arc<Self>) {
        let result = match self.build_engine_context().await {
            Ok(ctx) => engine::verify::run(&ctx, "latest").await,
            Err(e) => Err(e),
        };
        let mut status = self.status.lock();
        match result {
            Ok(report) => {
                info!(checked = report.checked, ok = report.ok, "scheduled verify finished");
                status.verify_state = RunState::Idle;
                status.last_verify_at = Some(Utc::now());
                status.last_verify_error = None;
                status.last_verify_result = Some(VerifyCounters {
                    checked: report.checked,
                    ok: report.ok,
                    missing: report.missing,
                    read_errors: report.read_errors,
                    decrypt_errors: report.decrypt_errors,
                    checksum_errors: report.checksum_errors,
                });
            }
            Err(e) => {
                error!(error = %e, "verify run failed");
                status.verify_state = RunState::Failed;
                status.last_verify_error = Some(e.to_string());
            }
        }
        drop(status);
        self.verify_running.store(false, Ordering::SeqCst);
    }

    pub fn record_restore(&self, path: &str, error: Option<String>) {
        let mut status = self.status.lock();
        status.last_restore_at = Some(Utc::now());
        status.last_restore_path = Some(path.to_string());
        status.last_restore_error = error;
    }

    pub fn is_backup_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_verify_running(&self) -> bool {
        self.verify_running.load(Ordering::SeqCst)
    }

    /// One scheduler loop per domain (backup or verify), following §4.8's
    /// loop shape: compute the next run, wait for either a schedule change,
    /// shutdown, or the timer, then trigger (suppressing "already running").
    pub async fn run_backup_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut changed = self.backup_schedule_changed.subscribe();
        loop {
            let config = self.config();
            let (next, enabled) = next_scheduled_run(&config.schedule, &config.timezone, Utc::now());
            {
                let mut status = self.status.lock();
                status.next_scheduled_at = if enabled { next } else { None };
            }
            if !enabled {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = changed.changed() => continue,
                }
            }
            let next = next.expect("enabled schedule always yields a next run");
            let wait = duration_until(next);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = changed.changed() => continue,
                _ = tokio::time::sleep(wait) => {
                    if self.trigger_backup().is_err() {
                        warn!("scheduled backup skipped: already running");
                    }
                }
            }
        }
    }

    pub async fn run_verify_scheduler(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut changed = self.verify_schedule_changed.subscribe();
        loop {
            let config = self.config();
            let (next, enabled) = next_scheduled_run(&config.verify.schedule, &config.timezone, Utc::now());
            {
                let mut status = self.status.lock();
                status.next_verify_at = if enabled { next } else { None };
            }
            if !enabled {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = changed.changed() => continue,
                }
            }
            let next = next.expect("enabled schedule always yields a next run");
            let wait = duration_until(next);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = changed.changed() => continue,
                _ = tokio::time::sleep(wait) => {
                    if self.trigger_verify().is_err() {
                        warn!("scheduled verify skipped: already running");
                    }
                }
            }
        }
    }
}

async fn build_store(paths: &StatePaths, config: &Config) -> Result<Arc<dyn ObjectStore>, baxter_core::Error> {
    if config.s3.bucket.is_empty() {
        Ok(Arc::new(LocalObjectStore::new(paths.objects_dir())))
    } else {
        Ok(Arc::new(RemoteObjectStore::new(&config.s3).await?))
    }
}

fn duration_until(target: DateTime<Utc>) -> std::time::Duration {
    let now = Utc::now();
    (target - now).to_std().unwrap_or(std::time::Duration::from_secs(0))
}

/// Compute the next scheduled run, honoring wall-clock semantics across DST:
/// a `daily`/`weekly` time is evaluated in `timezone`'s local calendar, so
/// the instant shifts by the DST delta while the displayed wall-clock time
/// does not. Returns `(None, false)` when the schedule is disabled or
/// invalid.
pub fn next_scheduled_run(
    schedule: &ScheduleSettings,
    timezone: &str,
    now: DateTime<Utc>,
) -> (Option<DateTime<Utc>>, bool) {
    let tz: chrono_tz::Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => return (None, false),
    };

    match schedule.schedule {
        Schedule::Manual => (None, false),
        Schedule::Daily => {
            let Some((hour, minute)) = parse_hh_mm(&schedule.daily_time) else {
                return (None, false);
            };
            let local_now = now.with_timezone(&tz);
            let mut date = local_now.date_naive();
            let mut candidate = local_datetime(&tz, date, hour, minute);
            if candidate <= now {
                date += chrono::Duration::days(1);
                candidate = local_datetime(&tz, date, hour, minute);
            }
            (Some(candidate), true)
        }
        Schedule::Weekly => {
            let Some((hour, minute)) = parse_hh_mm(&schedule.weekly_time) else {
                return (None, false);
            };
            let Some(target_day) = parse_weekday(&weekday_name(schedule)) else {
                return (None, false);
            };
            let local_now = now.with_timezone(&tz);
            let today_index = local_now.weekday().num_days_from_sunday() as i64;
            let days_ahead = (target_day.as_index() - today_index + 7) % 7;
            let mut date = local_now.date_naive() + chrono::Duration::days(days_ahead);
            let mut candidate = local_datetime(&tz, date, hour, minute);
            if candidate <= now {
                date += chrono::Duration::days(7);
                candidate = local_datetime(&tz, date, hour, minute);
            }
            (Some(candidate), true)
        }
    }
}

/// `ScheduleSettings` stores the weekday as a typed enum already; this
/// recovers the canonical lowercase name `parse_weekday` expects so the two
/// call sites share one parser.
fn weekday_name(schedule: &ScheduleSettings) -> String {
    format!("{:?}", schedule.weekly_day).to_lowercase()
}

fn local_datetime(tz: &chrono_tz::Tz, date: chrono::NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let naive = date.and_hms_opt(hour, minute, 0).expect("validated HH:MM");
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _latest) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => {
            // Wall-clock time falls in a spring-forward gap; the next
            // representable instant is the DST transition point itself.
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}
