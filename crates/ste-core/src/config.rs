//! Process configuration: plans/logs directories, concurrency and memory caps.
//!
//! Resolution order for every setting is: explicit override (set via the
//! `set_*` functions, used by tests and by `ste-cli`'s `--plans-dir`-style
//! flags) -> environment variable -> platform default.

use directories::{BaseDirs, ProjectDirs};
use eyre::{eyre, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use crate::checksum::CheckMd5Mode;

static CONFIG_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));
static PLANS_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));
static LOGS_DIR_OVERRIDE: Lazy<RwLock<Option<PathBuf>>> = Lazy::new(|| RwLock::new(None));
static CONCURRENCY_OVERRIDE: Lazy<RwLock<Option<usize>>> = Lazy::new(|| RwLock::new(None));
static BUFFER_GB_OVERRIDE: Lazy<RwLock<Option<f64>>> = Lazy::new(|| RwLock::new(None));
static CHECK_MD5_OVERRIDE: Lazy<RwLock<Option<CheckMd5Mode>>> = Lazy::new(|| RwLock::new(None));

/// Environment variables honoured, per the persisted-state layout.
pub const ENV_CONCURRENCY: &str = "STE_CONCURRENCY";
pub const ENV_BUFFER_GB: &str = "STE_BUFFER_GB";
pub const ENV_PLANS_DIR: &str = "STE_PLANS_DIR";
pub const ENV_LOGS_DIR: &str = "STE_LOGS_DIR";
pub const ENV_DEBUG: &str = "STE_DEBUG";
pub const ENV_CHECK_MD5: &str = "STE_CHECK_MD5";

/// Override the configuration directory for the current process.
pub fn set_config_dir<P: AsRef<Path>>(path: P) {
    *CONFIG_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

pub fn clear_config_dir_override() {
    CONFIG_DIR_OVERRIDE.write().take();
}

pub fn config_dir_override() -> Option<PathBuf> {
    CONFIG_DIR_OVERRIDE.read().clone()
}

/// Resolve the configuration directory.
/// Priority: explicit override -> platform standard -> ~/.config/ste
pub fn config_dir() -> Result<PathBuf> {
    if let Some(path) = CONFIG_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }

    if let Some(proj) = ProjectDirs::from("com", "Ste", "Ste") {
        return Ok(proj.config_dir().to_path_buf());
    }

    if let Some(base) = BaseDirs::new() {
        return Ok(base.home_dir().join(".config").join("ste"));
    }

    Err(eyre!(
        "unable to determine configuration directory (no override and no platform default)"
    ))
}

/// Override the plans directory (where job part files and the pidfile live).
pub fn set_plans_dir<P: AsRef<Path>>(path: P) {
    *PLANS_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

/// Resolve the plans directory: override -> `STE_PLANS_DIR` -> `{config_dir}/plans`.
pub fn plans_dir() -> Result<PathBuf> {
    if let Some(path) = PLANS_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(ENV_PLANS_DIR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(config_dir()?.join("plans"))
}

/// Override the logs directory.
pub fn set_logs_dir<P: AsRef<Path>>(path: P) {
    *LOGS_DIR_OVERRIDE.write() = Some(path.as_ref().to_path_buf());
}

/// Resolve the logs directory: override -> `STE_LOGS_DIR` -> `{config_dir}/logs`.
pub fn logs_dir() -> Result<PathBuf> {
    if let Some(path) = LOGS_DIR_OVERRIDE.read().clone() {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(ENV_LOGS_DIR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(config_dir()?.join("logs"))
}

/// Override the worker concurrency cap.
pub fn set_concurrency(n: usize) {
    *CONCURRENCY_OVERRIDE.write() = Some(n);
}

/// Resolve the concurrency cap: override -> `STE_CONCURRENCY` -> `min(32, 16 * logical cores)`.
pub fn concurrency() -> usize {
    if let Some(n) = *CONCURRENCY_OVERRIDE.read() {
        return n.max(1);
    }
    if let Ok(val) = std::env::var(ENV_CONCURRENCY) {
        if let Ok(n) = val.parse::<usize>() {
            return n.max(1);
        }
    }
    (16 * num_cpus::get()).min(32).max(1)
}

/// Override the buffer-pool memory ceiling, in gibibytes.
pub fn set_buffer_gb(gb: f64) {
    *BUFFER_GB_OVERRIDE.write() = Some(gb);
}

/// Resolve the buffer-pool memory ceiling in bytes: override -> `STE_BUFFER_GB` -> 1 GiB default.
pub fn buffer_memory_budget_bytes() -> u64 {
    const DEFAULT_GB: f64 = 1.0;
    let gb = if let Some(gb) = *BUFFER_GB_OVERRIDE.read() {
        gb
    } else if let Ok(val) = std::env::var(ENV_BUFFER_GB) {
        val.parse::<f64>().unwrap_or(DEFAULT_GB)
    } else {
        DEFAULT_GB
    };
    ((gb.max(0.05)) * 1024.0 * 1024.0 * 1024.0) as u64
}

/// Override the post-transfer checksum-verification mode.
pub fn set_check_md5_mode(mode: CheckMd5Mode) {
    *CHECK_MD5_OVERRIDE.write() = Some(mode);
}

/// Resolve the check-md5 mode: override -> `STE_CHECK_MD5` -> `CheckMd5Mode::default()`.
pub fn check_md5_mode() -> CheckMd5Mode {
    if let Some(mode) = *CHECK_MD5_OVERRIDE.read() {
        return mode;
    }
    match std::env::var(ENV_CHECK_MD5) {
        Ok(val) => parse_check_md5_mode(&val).unwrap_or_default(),
        Err(_) => CheckMd5Mode::default(),
    }
}

/// Parse a `--check-md5`-style value; used by `ste-cli`'s argument mapping too.
pub fn parse_check_md5_mode(value: &str) -> Option<CheckMd5Mode> {
    match value.to_ascii_lowercase().replace('_', "-").as_str() {
        "no-check" | "nocheck" | "none" => Some(CheckMd5Mode::NoCheck),
        "log-only" | "logonly" => Some(CheckMd5Mode::LogOnly),
        "fail-if-different" | "failifdifferent" | "fail" => Some(CheckMd5Mode::FailIfDifferent),
        _ => None,
    }
}

/// Whether debug mode is requested via `STE_DEBUG`.
pub fn debug_mode() -> bool {
    std::env::var(ENV_DEBUG)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans_dir_override_wins() {
        set_plans_dir("/tmp/ste-test-plans");
        assert_eq!(plans_dir().unwrap(), PathBuf::from("/tmp/ste-test-plans"));
        *PLANS_DIR_OVERRIDE.write() = None;
    }

    #[test]
    fn concurrency_override_wins() {
        set_concurrency(7);
        assert_eq!(concurrency(), 7);
        *CONCURRENCY_OVERRIDE.write() = None;
    }

    #[test]
    fn buffer_budget_has_sane_default() {
        *BUFFER_GB_OVERRIDE.write() = None;
        let budget = buffer_memory_budget_bytes();
        assert!(budget > 0);
    }

    #[test]
    fn check_md5_mode_defaults_to_log_only() {
        *CHECK_MD5_OVERRIDE.write() = None;
        assert_eq!(check_md5_mode(), CheckMd5Mode::LogOnly);
    }

    #[test]
    fn check_md5_mode_override_wins() {
        set_check_md5_mode(CheckMd5Mode::FailIfDifferent);
        assert_eq!(check_md5_mode(), CheckMd5Mode::FailIfDifferent);
        *CHECK_MD5_OVERRIDE.write() = None;
    }

    #[test]
    fn check_md5_mode_parses_cli_spellings() {
        assert_eq!(parse_check_md5_mode("no-check"), Some(CheckMd5Mode::NoCheck));
        assert_eq!(parse_check_md5_mode("LOG-ONLY"), Some(CheckMd5Mode::LogOnly));
        assert_eq!(
            parse_check_md5_mode("fail-if-different"),
            Some(CheckMd5Mode::FailIfDifferent)
        );
        assert_eq!(parse_check_md5_mode("bogus"), None);
    }
}
