// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::guard::{GuardCfg, RateLimitCfg, SessionCfg};
use crate::sync::types::{JobSpec, SUPPORTED_INTERVALS_MS};

const ENV_PATH: &str = "SYNC_CONFIG_PATH";

fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    5
}
fn default_window_ms() -> u64 {
    900_000
}
fn default_session_timeout_ms() -> u64 {
    86_400_000
}
fn default_warning_ms() -> u64 {
    300_000
}
fn default_adapter_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_true")]
    pub visibility_aware: bool,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            visibility_aware: true,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GuardSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_ms: default_window_ms(),
            session_timeout_ms: default_session_timeout_ms(),
            warning_ms: default_warning_ms(),
        }
    }
}

impl GuardSection {
    pub fn to_guard_cfg(&self) -> GuardCfg {
        GuardCfg {
            rate: RateLimitCfg {
                max_attempts: self.max_attempts,
                window_ms: self.window_ms,
            },
            session: SessionCfg {
                session_timeout_ms: self.session_timeout_ms,
                warning_ms: self.warning_ms,
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub guard: GuardSection,
    #[serde(default = "default_adapter_timeout_ms")]
    pub adapter_timeout_ms: u64,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSection::default(),
            guard: GuardSection::default(),
            adapter_timeout_ms: default_adapter_timeout_ms(),
            jobs: vec![JobSpec {
                id: "odds".to_string(),
                source_ids: vec!["odds-api".to_string(), "score-feed".to_string()],
                interval_ms: 300_000,
                enabled: true,
                params: Default::default(),
            }],
        }
    }
}

impl SyncConfig {
    /// Misconfiguration is fatal here, at load time, never later.
    pub fn validate(&self) -> Result<()> {
        if self.adapter_timeout_ms == 0 {
            return Err(anyhow!("adapter_timeout_ms must be positive"));
        }
        if self.guard.max_attempts == 0 || self.guard.window_ms == 0 {
            return Err(anyhow!("guard max_attempts/window_ms must be positive"));
        }
        let mut seen = std::collections::BTreeSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(anyhow!("job id must not be empty"));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(anyhow!("duplicate job id '{}'", job.id));
            }
            if job.source_ids.is_empty() {
                return Err(anyhow!("job '{}' has no source ids", job.id));
            }
            if !SUPPORTED_INTERVALS_MS.contains(&job.interval_ms) {
                return Err(anyhow!(
                    "job '{}': unsupported interval {}ms (supported: {:?})",
                    job.id,
                    job.interval_ms,
                    SUPPORTED_INTERVALS_MS
                ));
            }
        }
        Ok(())
    }
}

/// Load configuration from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<SyncConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sync config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing sync config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration using env var + fallbacks:
/// 1) $SYNC_CONFIG_PATH
/// 2) config/sync.toml
/// 3) config/sync.json
/// 4) built-in defaults
pub fn load_default() -> Result<SyncConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("SYNC_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sync.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sync.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    let cfg = SyncConfig::default();
    cfg.validate()?;
    Ok(cfg)
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    // TOML first (default extension), JSON as fallback for extensionless paths.
    match toml::from_str::<SyncConfig>(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => match serde_json::from_str::<SyncConfig>(s) {
            Ok(v) => Ok(v),
            Err(_) => Err(anyhow!(toml_err)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_and_json_parse_with_defaults() {
        let toml_s = r#"
            adapter_timeout_ms = 5000

            [[jobs]]
            id = "odds"
            source_ids = ["odds-api"]
            interval_ms = 180000
        "#;
        let cfg = parse_config(toml_s, "toml").unwrap();
        assert_eq!(cfg.adapter_timeout_ms, 5_000);
        assert_eq!(cfg.guard.max_attempts, 5);
        assert!(cfg.jobs[0].enabled);
        cfg.validate().unwrap();

        let json_s = r#"{"jobs":[{"id":"odds","source_ids":["odds-api"],"interval_ms":120000}]}"#;
        let cfg = parse_config(json_s, "json").unwrap();
        assert_eq!(cfg.jobs[0].interval_ms, 120_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn unsupported_interval_is_rejected_not_clamped() {
        let s = r#"{"jobs":[{"id":"odds","source_ids":["odds-api"],"interval_ms":150000}]}"#;
        let cfg = parse_config(s, "json").unwrap();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("unsupported interval"), "{err}");
    }

    #[test]
    fn duplicate_job_ids_are_rejected() {
        let s = r#"{"jobs":[
            {"id":"odds","source_ids":["odds-api"],"interval_ms":120000},
            {"id":"odds","source_ids":["score-feed"],"interval_ms":120000}
        ]}"#;
        let cfg = parse_config(s, "json").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        // Isolate CWD in a temp dir so a real config/ in the repo does not
        // interfere.
        let old = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();

        std::env::remove_var(ENV_PATH);

        // No files in temp CWD: built-in defaults.
        let cfg = load_default().unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        assert_eq!(cfg.jobs[0].id, "odds");

        // Env var takes precedence.
        let p_json = tmp.path().join("sync.json");
        std::fs::write(
            &p_json,
            r#"{"jobs":[{"id":"scores","source_ids":["score-feed"],"interval_ms":600000}]}"#,
        )
        .unwrap();
        std::env::set_var(ENV_PATH, p_json.display().to_string());
        let cfg = load_default().unwrap();
        assert_eq!(cfg.jobs[0].id, "scores");
        std::env::remove_var(ENV_PATH);

        std::env::set_current_dir(&old).unwrap();
    }
}
