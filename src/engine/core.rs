use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::messenger::OutputLevel;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogFileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub level: OutputLevel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub app_name: String,
    pub target_fps: u32,
    pub is_headless: bool,
    pub output_level: OutputLevel,
    /// Resources loaded per tick on room change; `None` loads them at once.
    pub lazy_amount: Option<usize>,
    /// Tags protected in addition to the built-in ones.
    pub protected_tags: Vec<String>,
    pub log_files: Vec<LogFileConfig>,
    pub max_frames: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "Hive Engine".to_string(),
            target_fps: 60,
            is_headless: false,
            output_level: OutputLevel::Normal,
            lazy_amount: None,
            protected_tags: Vec::new(),
            log_files: Vec::new(),
            max_frames: None,
        }
    }
}

impl EngineConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&source)
    }

    /// Milliseconds one frame may take at the target rate.
    pub fn frame_budget_ms(&self) -> u64 {
        1000 / u64::from(self.target_fps.max(1))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FrameTiming {
    pub tick: u64,
    pub frame: u64,
    pub delta_seconds: f32,
    pub fps: f32,
}

impl FrameTiming {
    /// Advances to the frame starting at `tick`.
    pub fn advance(&mut self, tick: u64) {
        let delta_ms = tick.saturating_sub(self.tick);
        self.delta_seconds = delta_ms as f32 / 1000.0;
        self.fps = if delta_ms == 0 {
            0.0
        } else {
            1000.0 / delta_ms as f32
        };
        self.tick = tick;
        self.frame += 1;
    }
}

/// What the loop should do once the current frame returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameControl {
    Continue,
    RestartRoom,
    RestartGame,
    ChangeRoom(String),
    EndGame,
}
