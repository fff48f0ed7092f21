// src/types.rs

use std::time::Duration;

use serde::Deserialize;

/// Where the persisted ref snapshot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateStorageMode {
    /// One TOML file per key under `<state_dir>/`.
    File,
    /// Process memory only (lost on restart; every repository is first-seen again).
    Memory,
}

impl Default for StateStorageMode {
    fn default() -> Self {
        StateStorageMode::File
    }
}

/// Granularity of the exclusivity tag a build-type handler locks on.
///
/// - `Repository`: one build per repository at a time, across all branches.
/// - `Branch`: one build per repository+branch, so different branches of the
///   same repository can build in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockGranularity {
    Repository,
    Branch,
}

impl Default for LockGranularity {
    fn default() -> Self {
        LockGranularity::Branch
    }
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}
