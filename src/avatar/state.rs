//! UI mode, pose and skin material state

use serde::{Deserialize, Serialize};

use crate::config::SkinConfig;

/// Named poses the renderer maps onto animation clips
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pose {
    #[default]
    Idle,
    Chill,
    Cool,
    Punch,
    Ninja,
    King,
    Busy,
}

impl Pose {
    pub const ALL: [Pose; 7] = [
        Pose::Idle,
        Pose::Chill,
        Pose::Cool,
        Pose::Punch,
        Pose::Ninja,
        Pose::King,
        Pose::Busy,
    ];

    /// Animation clip name
    pub fn clip_name(&self) -> &'static str {
        match self {
            Pose::Idle => "Idle",
            Pose::Chill => "Chill",
            Pose::Cool => "Cool",
            Pose::Punch => "Punch",
            Pose::Ninja => "Ninja",
            Pose::King => "King",
            Pose::Busy => "Busy",
        }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.clip_name())
    }
}

/// What the UI is currently doing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    /// Picking assets and colours
    #[default]
    Customize,
    /// Posing for screenshots
    Photo,
}

impl std::fmt::Display for UiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UiMode::Customize => write!(f, "customize"),
            UiMode::Photo => write!(f, "photo"),
        }
    }
}

/// Mode and pose together, with the rule that customizing always idles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    mode: UiMode,
    pose: Pose,
}

impl Stage {
    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Switch mode; entering customize mode resets the pose to idle
    pub fn with_mode(mut self, mode: UiMode) -> Self {
        self.mode = mode;
        if mode == UiMode::Customize {
            self.pose = Pose::Idle;
        }
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }
}

/// Parameters of the shared skin material the renderer applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinTone {
    pub color: String,
    pub roughness: f32,
}

impl From<&SkinConfig> for SkinTone {
    fn from(config: &SkinConfig) -> Self {
        Self {
            color: config.color.clone(),
            roughness: config.roughness,
        }
    }
}

impl Default for SkinTone {
    fn default() -> Self {
        Self::from(&SkinConfig::default())
    }
}
