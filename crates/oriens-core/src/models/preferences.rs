use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-user settings mirrored between the server and the local fallback store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PreferenceRecord {
    pub notifications: bool,
    pub sound: bool,
    pub theme: Theme,
}

impl Default for PreferenceRecord {
    fn default() -> Self {
        Self {
            notifications: true,
            sound: true,
            theme: Theme::Light,
        }
    }
}

/// Partial update sent as a PATCH body. Absent fields are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PreferencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

impl PreferencePatch {
    pub fn notifications(value: bool) -> Self {
        Self {
            notifications: Some(value),
            ..Self::default()
        }
    }

    pub fn sound(value: bool) -> Self {
        Self {
            sound: Some(value),
            ..Self::default()
        }
    }

    pub fn theme(value: Theme) -> Self {
        Self {
            theme: Some(value),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_none() && self.sound.is_none() && self.theme.is_none()
    }

    pub fn apply_to(&self, record: &PreferenceRecord) -> PreferenceRecord {
        PreferenceRecord {
            notifications: self.notifications.unwrap_or(record.notifications),
            sound: self.sound.unwrap_or(record.sound),
            theme: self.theme.unwrap_or(record.theme),
        }
    }
}
