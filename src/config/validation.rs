//! Config validation: unknown-key detection with Levenshtein suggestions.
//!
//! Two-pass parse: the raw TOML is first read into a `toml::Value`, its key
//! tree walked and compared against the known field names, and a warning
//! with a "did you mean?" suggestion emitted for each stranger. Then serde
//! deserialization proceeds as normal. Warnings never break a config.

use std::collections::HashSet;

/// A non-fatal config warning (typo, unknown section).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `SentinelConfig`.
///
/// Kept by hand in step with sentinel_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [server]
        "server",
        "server.addr",
        // [runtime]
        "runtime",
        "runtime.backend",
        "runtime.docker_host",
        "runtime.monitor_label",
        "runtime.service_label",
        "runtime.include_services",
        "runtime.request_timeout_ms",
        // [observer]
        "observer",
        "observer.poll_interval_ms",
        "observer.health_timeout_ms",
        "observer.cycle_timeout_ms",
        "observer.max_concurrency",
        // [policy]
        "policy",
        "policy.restart_threshold",
        "policy.recreate_threshold",
        "policy.grace_period_secs",
        "policy.cooldown_multiplier",
        "policy.max_cooldown_secs",
        "policy.fault_override_ttl_secs",
        "policy.load_high_watermark",
        "policy.load_sustain_polls",
        "policy.scale_step",
        "policy.max_scale_step",
        // [executor]
        "executor",
        "executor.action_timeout_ms",
        "executor.recreate_suffix",
        "executor.min_replicas",
        "executor.max_replicas",
        // [activity]
        "activity",
        "activity.capacity",
        "activity.persist_path",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively collect all dotted key paths of a TOML table.
///
/// `{ a = { b = 1, c = 2 } }` yields `["a", "a.b", "a.c"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within edit distance 3, if any.
///
/// Ties resolve to the lexicographically smallest key so suggestions are
/// stable across runs.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|&k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Warnings for every unknown key in a raw TOML document.
///
/// Unparseable input yields no warnings; serde reports the parse error.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("policy", "policy"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("observr", "observer"), 1);
        assert_eq!(levenshtein("scale_stp", "scale_step"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let value: toml::Value = "[policy]\nrestart_threshold = 1\n[runtime]\nbackend = \"memory\"\n"
            .parse()
            .unwrap();
        let mut keys = walk_toml_keys(&value, "");
        keys.sort();
        assert_eq!(
            keys,
            vec!["policy", "policy.restart_threshold", "runtime", "runtime.backend"]
        );
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys("[policy]\nrestart_treshold = 2\n");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "policy.restart_treshold");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("policy.restart_threshold")
        );
        assert!(warnings[0].to_string().contains("did you mean"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
[server]
addr = "127.0.0.1:9000"

[runtime]
backend = "docker"
monitor_label = "sentinel.monitor=true"

[observer]
poll_interval_ms = 2000

[policy]
restart_threshold = 1
recreate_threshold = 3

[executor]
recreate_suffix = "-next"

[activity]
capacity = 500
"#;
        assert!(validate_unknown_keys(toml_str).is_empty());
    }

    #[test]
    fn test_unknown_section_produces_warning() {
        let warnings = validate_unknown_keys("[dashboard]\ntheme = \"dark\"\n");
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.field == "dashboard"));
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("zzzzzzzzzzzzzzzzzzz", &known).is_none());
    }

    #[test]
    fn test_known_keys_cover_serialized_defaults() {
        let config = crate::config::SentinelConfig {
            activity: crate::config::ActivityConfig {
                persist_path: Some("/var/lib/sentinel".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let value: toml::Value = text.parse().unwrap();
        let known = known_config_keys();
        for key in walk_toml_keys(&value, "") {
            assert!(known.contains(key.as_str()), "missing known key {key}");
        }
    }
}
