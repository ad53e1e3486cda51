//! Runtime settings and config file loading.
//!
//! [`Settings`] carries every tunable with its default. A `key = value` file
//! at `$XDG_CONFIG_HOME/magnet-relay/config.toml` (or
//! `$HOME/.config/magnet-relay/config.toml`, or an explicit path) overrides
//! individual keys. Unknown keys and out-of-range values are rejected with
//! the offending line number.
//!
//! # Example
//!
//! ```text
//! database_path = "/var/lib/magnet-relay/relay.db"
//! publish_channel = -1001234567890
//! resolve_timeout_secs = 300 # five minutes
//! basic_daily_quota = 20
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseOptions;
use crate::ledger::{DEFAULT_CLAIM_WAIT, DEFAULT_REPLY_PACING, DEFAULT_STALE_CLAIM, LedgerSettings};
use crate::quota::TierTable;
use crate::resolution::{DEFAULT_RESOLVE_TICK, DEFAULT_RESOLVE_TIMEOUT};
use crate::session::{DEFAULT_POLL_INTERVAL, DeadlinePolicy};
use crate::transport::ChatId;

const APP_DIR: &str = "magnet-relay";
const CONFIG_FILE: &str = "config.toml";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax { line: usize },

    /// A value could not be parsed for its key.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        key: String,
        line: usize,
        reason: String,
    },

    /// A key is not recognised.
    #[error(
        "unknown configuration key '{key}' on line {line}\n  Suggestion: Run `magnet-relay config show` to list supported keys"
    )]
    UnknownKey { key: String, line: usize },

    /// A setting the requested component cannot run without is unset.
    #[error(
        "`{key}` is not configured\n  Suggestion: Set `{key}` in the config file, see `magnet-relay config show`"
    )]
    MissingValue { key: &'static str },

    /// A value parsed but lies outside its allowed range.
    #[error("invalid config value for `{key}`: {value}. Expected range: {expected}")]
    OutOfRange {
        key: &'static str,
        value: String,
        expected: String,
    },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }
}

/// Effective runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_path: PathBuf,
    pub download_root: PathBuf,
    /// Channel receiving announcements; publishing needs one.
    pub publish_channel: Option<ChatId>,
    pub resolve_timeout: Duration,
    pub resolve_tick: Duration,
    pub poll_interval: Duration,
    pub deadline: DeadlinePolicy,
    pub reply_pacing: Duration,
    pub claim_wait: Duration,
    pub stale_claim: Duration,
    pub database: DatabaseOptions,
    pub tiers: TierTable,
    pub verbosity: Option<VerbositySetting>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("magnet-relay.db"),
            download_root: PathBuf::from("downloads"),
            publish_channel: None,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            resolve_tick: DEFAULT_RESOLVE_TICK,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DeadlinePolicy::default(),
            reply_pacing: DEFAULT_REPLY_PACING,
            claim_wait: DEFAULT_CLAIM_WAIT,
            stale_claim: DEFAULT_STALE_CLAIM,
            database: DatabaseOptions::default(),
            tiers: TierTable::default(),
            verbosity: None,
        }
    }
}

impl Settings {
    /// Publish ledger tunables drawn from these settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] when no publish channel is set.
    pub fn ledger_settings(&self) -> Result<LedgerSettings> {
        let channel = self
            .publish_channel
            .ok_or(ConfigError::MissingValue {
                key: "publish_channel",
            })?;
        Ok(LedgerSettings {
            channel,
            download_root: self.download_root.clone(),
            reply_pacing: self.reply_pacing,
            claim_wait: self.claim_wait,
            stale_claim: self.stale_claim,
        })
    }

    /// Key/value pairs in config file syntax, for display.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let quoted = |path: &Path| format!("\"{}\"", path.display());
        vec![
            ("database_path", quoted(&self.database_path)),
            ("download_root", quoted(&self.download_root)),
            (
                "publish_channel",
                self.publish_channel
                    .map_or_else(|| "(unset)".to_string(), |c| c.to_string()),
            ),
            ("resolve_timeout_secs", self.resolve_timeout.as_secs().to_string()),
            ("resolve_tick_ms", self.resolve_tick.as_millis().to_string()),
            ("poll_interval_secs", self.poll_interval.as_secs().to_string()),
            ("deadline_min_secs", self.deadline.minimum.as_secs().to_string()),
            ("deadline_buffer_secs", self.deadline.buffer.as_secs().to_string()),
            ("deadline_max_secs", self.deadline.maximum.as_secs().to_string()),
            (
                "floor_bytes_per_sec",
                self.deadline.floor_bytes_per_sec.to_string(),
            ),
            ("reply_pacing_ms", self.reply_pacing.as_millis().to_string()),
            ("claim_wait_secs", self.claim_wait.as_secs().to_string()),
            ("stale_claim_secs", self.stale_claim.as_secs().to_string()),
            (
                "db_max_connections",
                self.database.max_connections.to_string(),
            ),
            (
                "db_busy_timeout_ms",
                self.database.busy_timeout_ms.to_string(),
            ),
            (
                "basic_concurrent_slots",
                self.tiers.basic.concurrent_slots.to_string(),
            ),
            ("basic_daily_quota", self.tiers.basic.daily_quota.to_string()),
            (
                "basic_max_file_bytes",
                self.tiers.basic.max_file_bytes.to_string(),
            ),
            (
                "premium_concurrent_slots",
                self.tiers.premium.concurrent_slots.to_string(),
            ),
            (
                "premium_daily_quota",
                self.tiers.premium.daily_quota.to_string(),
            ),
            (
                "premium_max_file_bytes",
                self.tiers.premium.max_file_bytes.to_string(),
            ),
            (
                "verbosity",
                format!(
                    "\"{}\"",
                    self.verbosity.unwrap_or(VerbositySetting::Default).as_str()
                ),
            ),
        ]
    }
}

/// Values read from a config file; `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub download_root: Option<PathBuf>,
    pub publish_channel: Option<i64>,
    pub resolve_timeout_secs: Option<u64>,
    pub resolve_tick_ms: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub deadline_min_secs: Option<u64>,
    pub deadline_buffer_secs: Option<u64>,
    pub deadline_max_secs: Option<u64>,
    pub floor_bytes_per_sec: Option<u64>,
    pub reply_pacing_ms: Option<u64>,
    pub claim_wait_secs: Option<u64>,
    pub stale_claim_secs: Option<u64>,
    pub db_max_connections: Option<u64>,
    pub db_busy_timeout_ms: Option<u64>,
    pub basic_concurrent_slots: Option<u64>,
    pub basic_daily_quota: Option<u64>,
    pub basic_max_file_bytes: Option<u64>,
    pub premium_concurrent_slots: Option<u64>,
    pub premium_daily_quota: Option<u64>,
    pub premium_max_file_bytes: Option<u64>,
    pub verbosity: Option<VerbositySetting>,
}

fn check_range(
    key: &'static str,
    value: Option<u64>,
    range: std::ops::RangeInclusive<u64>,
) -> Result<()> {
    if let Some(value) = value
        && !range.contains(&value)
    {
        return Err(ConfigError::OutOfRange {
            key,
            value: value.to_string(),
            expected: format!("{}..={}", range.start(), range.end()),
        });
    }
    Ok(())
}

fn narrow(value: u64) -> u32 {
    // Ranges are validated before narrowing.
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl FileConfig {
    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending key.
    pub fn validate(&self) -> Result<()> {
        check_range("resolve_timeout_secs", self.resolve_timeout_secs, 1..=3600)?;
        check_range("resolve_tick_ms", self.resolve_tick_ms, 10..=60_000)?;
        check_range("poll_interval_secs", self.poll_interval_secs, 1..=300)?;
        check_range("deadline_min_secs", self.deadline_min_secs, 60..=86_400)?;
        check_range("deadline_buffer_secs", self.deadline_buffer_secs, 0..=86_400)?;
        check_range("deadline_max_secs", self.deadline_max_secs, 60..=172_800)?;
        check_range("floor_bytes_per_sec", self.floor_bytes_per_sec, 1..=u64::MAX)?;
        check_range("reply_pacing_ms", self.reply_pacing_ms, 0..=60_000)?;
        check_range("claim_wait_secs", self.claim_wait_secs, 1..=600)?;
        check_range("stale_claim_secs", self.stale_claim_secs, 60..=86_400)?;
        check_range("db_max_connections", self.db_max_connections, 1..=20)?;
        check_range("db_busy_timeout_ms", self.db_busy_timeout_ms, 0..=120_000)?;
        check_range("basic_concurrent_slots", self.basic_concurrent_slots, 1..=100)?;
        check_range("basic_daily_quota", self.basic_daily_quota, 1..=100_000)?;
        check_range("basic_max_file_bytes", self.basic_max_file_bytes, 1..=u64::MAX)?;
        check_range("premium_concurrent_slots", self.premium_concurrent_slots, 1..=100)?;
        check_range("premium_daily_quota", self.premium_daily_quota, 1..=100_000)?;
        check_range("premium_max_file_bytes", self.premium_max_file_bytes, 1..=u64::MAX)?;

        if let (Some(min), Some(max)) = (self.deadline_min_secs, self.deadline_max_secs)
            && max < min
        {
            return Err(ConfigError::OutOfRange {
                key: "deadline_max_secs",
                value: max.to_string(),
                expected: format!("{min}..=172800 (at least deadline_min_secs)"),
            });
        }
        Ok(())
    }

    /// Overlays the values that are set onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.database_path {
            settings.database_path.clone_from(path);
        }
        if let Some(path) = &self.download_root {
            settings.download_root.clone_from(path);
        }
        if let Some(channel) = self.publish_channel {
            settings.publish_channel = Some(ChatId(channel));
        }
        if let Some(secs) = self.resolve_timeout_secs {
            settings.resolve_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.resolve_tick_ms {
            settings.resolve_tick = Duration::from_millis(ms);
        }
        if let Some(secs) = self.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.deadline_min_secs {
            settings.deadline.minimum = Duration::from_secs(secs);
        }
        if let Some(secs) = self.deadline_buffer_secs {
            settings.deadline.buffer = Duration::from_secs(secs);
        }
        if let Some(secs) = self.deadline_max_secs {
            settings.deadline.maximum = Duration::from_secs(secs);
        }
        if let Some(rate) = self.floor_bytes_per_sec {
            settings.deadline.floor_bytes_per_sec = rate;
        }
        if let Some(ms) = self.reply_pacing_ms {
            settings.reply_pacing = Duration::from_millis(ms);
        }
        if let Some(secs) = self.claim_wait_secs {
            settings.claim_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stale_claim_secs {
            settings.stale_claim = Duration::from_secs(secs);
        }
        if let Some(n) = self.db_max_connections {
            settings.database.max_connections = narrow(n);
        }
        if let Some(ms) = self.db_busy_timeout_ms {
            settings.database.busy_timeout_ms = narrow(ms);
        }
        if let Some(n) = self.basic_concurrent_slots {
            settings.tiers.basic.concurrent_slots = narrow(n);
        }
        if let Some(n) = self.basic_daily_quota {
            settings.tiers.basic.daily_quota = narrow(n);
        }
        if let Some(bytes) = self.basic_max_file_bytes {
            settings.tiers.basic.max_file_bytes = bytes;
        }
        if let Some(n) = self.premium_concurrent_slots {
            settings.tiers.premium.concurrent_slots = narrow(n);
        }
        if let Some(n) = self.premium_daily_quota {
            settings.tiers.premium.daily_quota = narrow(n);
        }
        if let Some(bytes) = self.premium_max_file_bytes {
            settings.tiers.premium.max_file_bytes = bytes;
        }
        if let Some(verbosity) = self.verbosity {
            settings.verbosity = Some(verbosity);
        }
    }
}

/// Loaded settings and where they came from.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    /// Config path consulted, if one could be determined.
    pub path: Option<PathBuf>,
    /// Defaults with file overrides applied.
    pub settings: Settings,
    /// Whether a file was actually read.
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/magnet-relay/config.toml`
/// 2. `$HOME/.config/magnet-relay/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads settings from `explicit`, or from the default path if it exists.
///
/// An explicit path must exist; a missing default file means defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_settings(explicit: Option<&Path>) -> Result<LoadedSettings> {
    let (path, required) = match explicit {
        Some(path) => (Some(path.to_path_buf()), true),
        None => (resolve_default_config_path(), false),
    };

    let mut settings = Settings::default();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedSettings {
            path,
            settings,
            loaded_from_file: false,
        });
    };
    if !required && !path_ref.exists() {
        return Ok(LoadedSettings {
            path,
            settings,
            loaded_from_file: false,
        });
    }

    let raw = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_config_str(&raw)?.apply(&mut settings);
    Ok(LoadedSettings {
        path,
        settings,
        loaded_from_file: true,
    })
}

/// Parses and validates config file text.
///
/// # Errors
///
/// Returns the first syntax, value, unknown-key or range error.
pub fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Syntax { line: line_no });
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: key.to_string(),
            line: line_no,
            reason,
        };

        match key {
            "database_path" => {
                cfg.database_path = Some(PathBuf::from(
                    parse_string_literal(value).map_err(invalid)?,
                ));
            }
            "download_root" => {
                cfg.download_root = Some(PathBuf::from(
                    parse_string_literal(value).map_err(invalid)?,
                ));
            }
            "publish_channel" => {
                cfg.publish_channel = Some(parse_integer_i64(value).map_err(invalid)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).map_err(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).map_err(invalid)?);
            }
            numeric => {
                let Some(slot) = numeric_slot(&mut cfg, numeric) else {
                    return Err(ConfigError::UnknownKey {
                        key: numeric.to_string(),
                        line: line_no,
                    });
                };
                *slot = Some(parse_integer_u64(value).map_err(invalid)?);
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn numeric_slot<'a>(cfg: &'a mut FileConfig, key: &str) -> Option<&'a mut Option<u64>> {
    let slot = match key {
        "resolve_timeout_secs" => &mut cfg.resolve_timeout_secs,
        "resolve_tick_ms" => &mut cfg.resolve_tick_ms,
        "poll_interval_secs" => &mut cfg.poll_interval_secs,
        "deadline_min_secs" => &mut cfg.deadline_min_secs,
        "deadline_buffer_secs" => &mut cfg.deadline_buffer_secs,
        "deadline_max_secs" => &mut cfg.deadline_max_secs,
        "floor_bytes_per_sec" => &mut cfg.floor_bytes_per_sec,
        "reply_pacing_ms" => &mut cfg.reply_pacing_ms,
        "claim_wait_secs" => &mut cfg.claim_wait_secs,
        "stale_claim_secs" => &mut cfg.stale_claim_secs,
        "db_max_connections" => &mut cfg.db_max_connections,
        "db_busy_timeout_ms" => &mut cfg.db_busy_timeout_ms,
        "basic_concurrent_slots" => &mut cfg.basic_concurrent_slots,
        "basic_daily_quota" => &mut cfg.basic_daily_quota,
        "basic_max_file_bytes" => &mut cfg.basic_max_file_bytes,
        "premium_concurrent_slots" => &mut cfg.premium_concurrent_slots,
        "premium_daily_quota" => &mut cfg.premium_daily_quota,
        "premium_max_file_bytes" => &mut cfg.premium_max_file_bytes,
        _ => return None,
    };
    Some(slot)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> std::result::Result<String, String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err("expected double-quoted string".to_string());
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> std::result::Result<u64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    let value = token.parse::<i128>().map_err(|e| e.to_string())?;
    if value < 0 {
        return Err("expected non-negative integer".to_string());
    }
    u64::try_from(value).map_err(|_| "integer value out of range for u64".to_string())
}

fn parse_integer_i64(raw_value: &str) -> std::result::Result<i64, String> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value".to_string());
    }
    token.parse::<i64>().map_err(|e| e.to_string())
}

fn parse_verbosity(value: &str) -> std::result::Result<VerbositySetting, String> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => Err("expected one of: default, verbose, quiet, debug".to_string()),
    }
}
