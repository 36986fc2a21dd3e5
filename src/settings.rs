use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, TabError};
use crate::tab::{DEFAULT_MAX_FRET, Tuning};
use crate::timing::{DEFAULT_BPM, valid_bpm};

pub const DEFAULT_SETTINGS_FILE: &str = "tabfret.ron";
const MAX_RECENT_FILES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tuning: Tuning,
    pub transpose: i32,
    pub bpm: f64,
    pub metronome: bool,
    pub max_fret: u8,
    /// Pair note events within each track only.
    pub per_track: bool,
    /// Prefer the file's own Set Tempo over `bpm` when it has one.
    pub follow_file_tempo: bool,
    /// Substring of the MIDI output port to play through.
    pub midi_out: Option<String>,
    /// Most recent first.
    pub recent_files: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tuning: Tuning::standard(),
            transpose: 0,
            bpm: DEFAULT_BPM,
            metronome: false,
            max_fret: DEFAULT_MAX_FRET,
            per_track: true,
            follow_file_tempo: false,
            midi_out: None,
            recent_files: Vec::new(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, falling back to defaults when the file
    /// does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let ron_string = fs::read_to_string(path)?;
        let settings: Settings =
            ron::from_str(&ron_string).map_err(|e| TabError::Settings(e.to_string()))?;

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| TabError::Settings(e.to_string()))?;
        fs::write(path, ron_string)?;

        tracing::debug!(path = %path.display(), "Saved settings");
        Ok(())
    }

    /// Tempo to play a file at: the explicit setting unless told to follow
    /// the file. A tempo that cannot be played falls back to the default.
    pub fn tempo_for(&self, file_tempo: Option<f64>) -> f64 {
        let bpm = match file_tempo {
            Some(bpm) if self.follow_file_tempo => bpm,
            _ => self.bpm,
        };
        if valid_bpm(bpm) { bpm } else { DEFAULT_BPM }
    }

    pub fn push_recent_file(&mut self, path: &Path) {
        self.recent_files.retain(|p| p != path);
        self.recent_files.insert(0, path.to_path_buf());
        self.recent_files.truncate(MAX_RECENT_FILES);
    }
}
