use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProjectId = i64;

/// Stable objective identifier, generated client-side on creation and kept by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ObjectiveId(pub Uuid);

impl ObjectiveId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum ObjectiveStatus {
    #[default]
    Pending,
    Concluded,
}

impl ObjectiveStatus {
    pub fn toggled(&self) -> Self {
        match self {
            ObjectiveStatus::Pending => ObjectiveStatus::Concluded,
            ObjectiveStatus::Concluded => ObjectiveStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Objective {
    pub id: ObjectiveId,
    pub title: String,
    #[serde(default)]
    pub status: ObjectiveStatus,
    #[serde(rename = "dueDate", default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl Objective {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ObjectiveId::generate(),
            title: title.into(),
            status: ObjectiveStatus::Pending,
            due_date: None,
        }
    }

    pub fn is_concluded(&self) -> bool {
        self.status == ObjectiveStatus::Concluded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub objectives: Vec<Objective>,
}
