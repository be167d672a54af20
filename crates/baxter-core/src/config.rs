//! Typed configuration: defaults, normalization, and validation.
//!
//! TOML decoding itself is treated as an external collaborator (`toml::from_str`);
//! this module owns everything downstream of that: default values, path/string
//! cleanup, and the user-visible validation error messages.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Daily,
    Weekly,
    Manual,
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Manual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    /// `chrono`'s numbering: Sunday = 0 .. Saturday = 6, matching §4.8's
    /// `weekday(now)` arithmetic.
    pub fn as_index(self) -> i64 {
        match self {
            Weekday::Sunday => 0,
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sunday" => Weekday::Sunday,
            "monday" => Weekday::Monday,
            "tuesday" => Weekday::Tuesday,
            "wednesday" => Weekday::Wednesday,
            "thursday" => Weekday::Thursday,
            "friday" => Weekday::Friday,
            "saturday" => Weekday::Saturday,
            _ => return None,
        })
    }
}

impl Default for Weekday {
    fn default() -> Self {
        Weekday::Sunday
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub daily_time: String,
    #[serde(default)]
    pub weekly_day: Weekday,
    #[serde(default)]
    pub weekly_time: String,
}

impl ScheduleSettings {
    fn normalize(&mut self) {
        self.daily_time = self.daily_time.trim().to_string();
        self.weekly_time = self.weekly_time.trim().to_string();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub prefix: String,
}

impl S3Config {
    fn normalize(&mut self) {
        self.prefix = self.prefix.trim().to_lowercase();
        if !self.prefix.is_empty() && !self.prefix.ends_with('/') {
            self.prefix.push('/');
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.bucket.is_empty() {
            return Ok(());
        }
        if self.region.is_empty() {
            return Err("s3.region is required when s3.bucket is set".into());
        }
        if self.bucket.contains('/') {
            return Err("s3.bucket must not contain '/'".into());
        }
        if !self.endpoint.is_empty()
            && !self.endpoint.starts_with("http://")
            && !self.endpoint.starts_with("https://")
        {
            return Err("s3.endpoint must be an http(s) URL".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub keychain_service: String,
    pub keychain_account: String,
}

impl EncryptionConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.keychain_service.is_empty() || self.keychain_account.is_empty() {
            return Err("encryption.keychain_service and keychain_account are required".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    #[serde(flatten)]
    pub schedule: ScheduleSettings,
    pub prefix: String,
    pub limit: usize,
    pub sample: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub manifest_snapshots: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            manifest_snapshots: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Empty means default loopback bind.
    pub bind_addr: String,
    pub allow_remote: bool,
    /// Comma-separated in TOML for parity with `BAXTER_IPC_TOKEN`; stored
    /// already split.
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup_roots: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub exclude_globs: Vec<String>,
    #[serde(flatten)]
    pub schedule: ScheduleSettings,
    /// IANA timezone name used to evaluate `daily_time`/`weekly_time` against
    /// wall-clock, DST-aware local time.
    pub timezone: String,
    pub s3: S3Config,
    pub encryption: EncryptionConfig,
    pub verify: VerifyConfig,
    pub retention: RetentionConfig,
    pub server: ServerConfig,
    pub upload_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_roots: Vec::new(),
            exclude_paths: Vec::new(),
            exclude_globs: Vec::new(),
            schedule: ScheduleSettings::default(),
            timezone: "UTC".to_string(),
            s3: S3Config::default(),
            encryption: EncryptionConfig::default(),
            verify: VerifyConfig::default(),
            retention: RetentionConfig::default(),
            server: ServerConfig::default(),
            upload_max_attempts: 0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut cfg = Config::default();
                cfg.normalize();
                return Ok(cfg);
            }
            Err(e) => return Err(Error::io(path.to_path_buf(), e)),
        };
        let mut cfg: Config =
            toml::from_str(&text).map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        cfg.normalize();
        cfg.validate().map_err(Error::Config)?;
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent.to_path_buf(), e))?;
        }
        std::fs::write(path, text).map_err(|e| Error::io(path.to_path_buf(), e))
    }

    pub fn upload_max_attempts(&self) -> u32 {
        if self.upload_max_attempts == 0 {
            3
        } else {
            self.upload_max_attempts
        }
    }

    fn normalize(&mut self) {
        self.backup_roots = self.backup_roots.iter().map(|p| clean_path(p)).collect();
        self.exclude_paths = self.exclude_paths.iter().map(|p| clean_path(p)).collect();
        self.schedule.normalize();
        self.verify.schedule.normalize();
        self.s3.normalize();
        self.timezone = self.timezone.trim().to_string();
        if self.timezone.is_empty() {
            self.timezone = "UTC".to_string();
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        self.s3.validate()?;
        if !self.backup_roots.is_empty() {
            self.encryption.validate()?;
        }
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| format!("invalid timezone: {}", self.timezone))?;
        validate_time(&self.schedule.daily_time, self.schedule.schedule == Schedule::Daily)?;
        validate_time(&self.schedule.weekly_time, self.schedule.schedule == Schedule::Weekly)?;
        validate_time(
            &self.verify.schedule.daily_time,
            self.verify.schedule.schedule == Schedule::Daily,
        )?;
        validate_time(
            &self.verify.schedule.weekly_time,
            self.verify.schedule.schedule == Schedule::Weekly,
        )?;
        Ok(())
    }
}

fn validate_time(value: &str, required: bool) -> std::result::Result<(), String> {
    if value.is_empty() {
        if required {
            return Err("a HH:MM time is required for the selected schedule".into());
        }
        return Ok(());
    }
    parse_hh_mm(value).ok_or_else(|| format!("invalid HH:MM time: {value}"))?;
    Ok(())
}

/// Parse `HH:MM`, returning `(hour, minute)`. Exposed for the scheduler.
pub fn parse_hh_mm(value: &str) -> Option<(u32, u32)> {
    let (h, m) = value.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

/// Parse a lowercased weekday name.
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    Weekday::parse(&value.to_lowercase())
}

fn clean_path(raw: &str) -> String {
    let path = PathBuf::from(raw);
    clean_path_buf(&path).to_string_lossy().into_owned()
}

/// Lexical path cleaning (no filesystem access): collapse `.` segments,
/// resolve `..` against earlier components, and drop duplicate separators.
/// Used both for config normalization and for manifest path cleaning.
pub fn clean_path_buf(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut cfg = Config::default();
        cfg.normalize();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn s3_requires_region_when_bucket_set() {
        let mut cfg = Config {
            s3: S3Config {
                bucket: "my-bucket".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.normalize();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn s3_prefix_is_trailing_slashed_and_lowercased() {
        let mut cfg = Config {
            s3: S3Config {
                bucket: "my-bucket".into(),
                region: "us-east-1".into(),
                prefix: "Backups".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.normalize();
        assert_eq!(cfg.s3.prefix, "backups/");
    }

    #[test]
    fn invalid_daily_time_rejected() {
        let mut cfg = Config {
            schedule: ScheduleSettings {
                schedule: Schedule::Daily,
                daily_time: "25:99".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        cfg.normalize();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("does-not-exist.toml")).unwrap();
        assert!(cfg.backup_roots.is_empty());
    }

    #[test]
    fn invalid_timezone_rejected() {
        let mut cfg = Config {
            timezone: "Not/AZone".into(),
            ..Default::default()
        };
        cfg.normalize();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn clean_path_collapses_parent_segments() {
        let cleaned = clean_path_buf(Path::new("/a/b/../c/./d"));
        assert_eq!(cleaned, PathBuf::from("/a/c/d"));
    }
}
