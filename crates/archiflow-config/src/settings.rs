use serde_json::Value;

use crate::hierarchy::ConfigSnapshot;

/// `autoRefinement.*` keys as found in the snapshot.  Every field is
/// optional; the preprocessor folds in environment variables and built-in
/// defaults after this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefinementSettings {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub min_length: Option<usize>,
}

impl RefinementSettings {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            enabled: snapshot
                .get("autoRefinement.enabled")
                .and_then(Value::as_bool),
            threshold: snapshot
                .get("autoRefinement.threshold")
                .and_then(Value::as_f64),
            min_length: snapshot
                .get("autoRefinement.minLength")
                .and_then(Value::as_u64)
                .map(|v| v as usize),
        }
    }
}

/// `history.*` keys as found in the snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySettings {
    pub max_tokens: Option<usize>,
    pub retention_window: Option<usize>,
    pub proactive_threshold: Option<f64>,
    pub auto_remove_old_todos: Option<bool>,
}

impl HistorySettings {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Self {
        Self {
            max_tokens: snapshot
                .get("history.maxTokens")
                .and_then(Value::as_u64)
                .map(|v| v as usize),
            retention_window: snapshot
                .get("history.retentionWindow")
                .and_then(Value::as_u64)
                .map(|v| v as usize),
            proactive_threshold: snapshot
                .get("history.proactiveThreshold")
                .and_then(Value::as_f64),
            auto_remove_old_todos: snapshot
                .get("history.autoRemoveOldTodos")
                .and_then(Value::as_bool),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(settings: Value) -> ConfigSnapshot {
        ConfigSnapshot {
            settings,
            ..ConfigSnapshot::default()
        }
    }

    #[test]
    fn refinement_settings_read_camel_case_keys() {
        let snap = snapshot(json!({
            "autoRefinement": {"enabled": true, "threshold": 6.5, "minLength": 12}
        }));
        let s = RefinementSettings::from_snapshot(&snap);
        assert_eq!(s.enabled, Some(true));
        assert_eq!(s.threshold, Some(6.5));
        assert_eq!(s.min_length, Some(12));
    }

    #[test]
    fn absent_keys_stay_none() {
        let s = RefinementSettings::from_snapshot(&snapshot(json!({})));
        assert_eq!(s, RefinementSettings::default());
    }

    #[test]
    fn history_settings_read_all_keys() {
        let snap = snapshot(json!({
            "history": {
                "maxTokens": 50_000,
                "retentionWindow": 8,
                "proactiveThreshold": 0.8,
                "autoRemoveOldTodos": false
            }
        }));
        let s = HistorySettings::from_snapshot(&snap);
        assert_eq!(s.max_tokens, Some(50_000));
        assert_eq!(s.retention_window, Some(8));
        assert_eq!(s.proactive_threshold, Some(0.8));
        assert_eq!(s.auto_remove_old_todos, Some(false));
    }

    #[test]
    fn wrong_types_are_ignored() {
        let snap = snapshot(json!({"history": {"maxTokens": "lots"}}));
        assert_eq!(HistorySettings::from_snapshot(&snap).max_tokens, None);
    }
}
