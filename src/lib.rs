//! MIDI to guitar tablature, with tick-synchronized playback.
//!
//! The pipeline is `MidiSource` (note events per track) → [`reduce`] (closed
//! notes) → [`map_notes`] (string/fret positions) → [`PlaybackScheduler`]
//! (tick, metronome and stop events). [`spawn_engine`] wires them together
//! behind a command channel.

pub mod engine;
pub mod error;
pub mod events;
pub mod midi;
pub mod output;
pub mod settings;
pub mod tab;
pub mod timing;

pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{Result, TabError};
pub use events::{PlaybackEvent, RawMidiEvent};
pub use midi::{MidiSource, Note, reduce};
pub use settings::Settings;
pub use tab::{TabNote, Tuning, best_position, export_tab, map_notes, transpose_notes, write_tab};
pub use timing::{PlaybackScheduler, PlaybackState};

/// Reduces and maps a parsed file with the given settings.
pub fn tablature(source: &MidiSource, settings: &Settings) -> Vec<TabNote> {
    map_notes(
        &source.notes(settings.per_track),
        &settings.tuning,
        settings.max_fret,
        settings.transpose,
    )
}
