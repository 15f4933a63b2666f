use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_STEP: u8 = 5;

/// Named stages reported by the remote pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetched,
    Filtered,
    Verified,
    Summarized,
    Scripted,
    Voiced,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Fetched,
        Stage::Filtered,
        Stage::Verified,
        Stage::Summarized,
        Stage::Scripted,
        Stage::Voiced,
    ];

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.as_str() == name)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Fetched => "fetched",
            Stage::Filtered => "filtered",
            Stage::Verified => "verified",
            Stage::Summarized => "summarized",
            Stage::Scripted => "scripted",
            Stage::Voiced => "voiced",
        }
    }

    /// UI step shown once this stage completes.
    pub fn step(self) -> u8 {
        match self {
            Stage::Fetched => 1,
            Stage::Filtered | Stage::Verified => 2,
            Stage::Summarized => 3,
            Stage::Scripted => 4,
            Stage::Voiced => 5,
        }
    }
}

/// Unknown values read as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
    #[default]
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageEntry {
    #[serde(default)]
    pub status: StageStatus,
}

/// Body of `GET /api/processed/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub pipeline: HashMap<String, StageEntry>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One observation of the remote job, whichever channel it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub stages: Vec<(Stage, StageStatus)>,
    pub published: bool,
}

impl StatusUpdate {
    pub fn published() -> Self {
        Self {
            stages: Vec::new(),
            published: true,
        }
    }

    fn from_stage_map(map: &HashMap<String, StageEntry>, status: Option<&str>) -> Self {
        let mut stages: Vec<_> = map
            .iter()
            .filter_map(|(name, entry)| Stage::from_name(name).map(|s| (s, entry.status)))
            .collect();
        stages.sort_by_key(|(s, _)| *s);
        Self {
            stages,
            published: status == Some("published"),
        }
    }
}

impl From<&StatusSnapshot> for StatusUpdate {
    fn from(snap: &StatusSnapshot) -> Self {
        StatusUpdate::from_stage_map(&snap.pipeline, snap.status.as_deref())
    }
}

pub const EVENT_STATUS_UPDATE: &str = "bhiv_status_update";
pub const EVENT_PUBLISHED: &str = "news_published";

/// WebSocket envelope `{type, data, timestamp?}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl PushEvent {
    /// The job the event belongs to: `data.newsItemId`, else `data.id`.
    pub fn job_id(&self) -> Option<String> {
        ["newsItemId", "id"].iter().find_map(|key| match self.data.get(*key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn is_for(&self, job_id: &str) -> bool {
        self.job_id().as_deref() == Some(job_id)
    }

    /// `None` for event types the tracker does not care about.
    pub fn to_update(&self) -> Option<StatusUpdate> {
        match self.kind.as_str() {
            EVENT_PUBLISHED => Some(StatusUpdate::published()),
            EVENT_STATUS_UPDATE => {
                let status = self.data.get("status").and_then(Value::as_str);
                if let Some(map) = self.data.get("pipeline") {
                    let map: HashMap<String, StageEntry> =
                        serde_json::from_value(map.clone()).unwrap_or_default();
                    return Some(StatusUpdate::from_stage_map(&map, status));
                }
                let stage = self
                    .data
                    .get("stage")
                    .and_then(Value::as_str)
                    .and_then(Stage::from_name);
                match stage {
                    Some(stage) => {
                        let stage_status = self
                            .data
                            .get("stageStatus")
                            .or_else(|| self.data.get("status"))
                            .cloned()
                            .and_then(|v| serde_json::from_value(v).ok())
                            .unwrap_or_default();
                        Some(StatusUpdate {
                            stages: vec![(stage, stage_status)],
                            published: status == Some("published"),
                        })
                    }
                    None => Some(StatusUpdate {
                        stages: Vec::new(),
                        published: status == Some("published"),
                    }),
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_steps() {
        let steps: Vec<u8> = Stage::ALL.iter().map(|s| s.step()).collect();
        assert_eq!(steps, vec![1, 2, 2, 3, 4, 5]);
        assert_eq!(Stage::from_name("voiced"), Some(Stage::Voiced));
        assert_eq!(Stage::from_name("rendered"), None);
    }

    #[test]
    fn snapshot_tolerates_unknown_status_and_stages() {
        let snap: StatusSnapshot = serde_json::from_value(json!({
            "success": true,
            "pipeline": {
                "fetched": {"status": "completed"},
                "filtered": {"status": "in_progress"},
                "rendered": {"status": "completed"},
                "verified": {}
            },
            "status": "processing"
        }))
        .unwrap();
        let update = StatusUpdate::from(&snap);
        assert_eq!(
            update.stages,
            vec![
                (Stage::Fetched, StageStatus::Completed),
                (Stage::Filtered, StageStatus::Pending),
                (Stage::Verified, StageStatus::Pending),
            ]
        );
        assert!(!update.published);
    }

    #[test]
    fn push_event_job_id_and_updates() {
        let ev: PushEvent = serde_json::from_value(json!({
            "type": "bhiv_status_update",
            "data": {"newsItemId": "n1", "stage": "summarized", "stageStatus": "completed"}
        }))
        .unwrap();
        assert!(ev.is_for("n1"));
        assert!(!ev.is_for("n2"));
        assert_eq!(
            ev.to_update().unwrap().stages,
            vec![(Stage::Summarized, StageStatus::Completed)]
        );

        let ev: PushEvent =
            serde_json::from_value(json!({"type": "news_published", "data": {"id": 7}})).unwrap();
        assert_eq!(ev.job_id().as_deref(), Some("7"));
        assert!(ev.to_update().unwrap().published);

        let ev: PushEvent = serde_json::from_value(json!({"type": "heartbeat"})).unwrap();
        assert!(ev.to_update().is_none());
        assert!(ev.job_id().is_none());
    }
}
