//! Fret/string assignment and the plain-text tab export.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TabError};
use crate::midi::Note;

pub const DEFAULT_MAX_FRET: u8 = 20;

/// Open-string pitches, string 1 (highest) first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Tuning(Vec<u8>);

impl Tuning {
    pub fn new(open_strings: Vec<u8>) -> Result<Self> {
        if open_strings.is_empty() {
            return Err(TabError::InvalidTuning(
                "a tuning needs at least one string".to_string(),
            ));
        }
        if open_strings.len() > u8::MAX as usize {
            return Err(TabError::InvalidTuning(format!(
                "{} strings is more than {} can number",
                open_strings.len(),
                u8::MAX
            )));
        }
        if let Some(bad) = open_strings.iter().find(|&&pitch| pitch > 127) {
            return Err(TabError::InvalidTuning(format!(
                "{bad} is not a MIDI note number"
            )));
        }
        Ok(Self(open_strings))
    }

    /// E4 B3 G3 D3 A2 E2.
    pub fn standard() -> Self {
        Self(vec![64, 59, 55, 50, 45, 40])
    }

    pub fn strings(&self) -> &[u8] {
        &self.0
    }

    pub fn string_count(&self) -> usize {
        self.0.len()
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<u8>> for Tuning {
    type Error = TabError;

    fn try_from(open_strings: Vec<u8>) -> Result<Self> {
        Self::new(open_strings)
    }
}

impl From<Tuning> for Vec<u8> {
    fn from(tuning: Tuning) -> Self {
        tuning.0
    }
}

impl FromStr for Tuning {
    type Err = TabError;

    /// Parses comma-separated MIDI note numbers, e.g. `64,59,55,50,45,40`.
    fn from_str(s: &str) -> Result<Self> {
        let open_strings = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<u8>().map_err(|_| {
                    TabError::InvalidTuning(format!("'{part}' is not a MIDI note number"))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Self::new(open_strings)
    }
}

impl fmt::Display for Tuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pitch) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{pitch}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabNote {
    /// 1 is the highest string.
    pub string: u8,
    /// 0 is the open string.
    pub fret: u8,
    pub start_tick: u64,
    pub duration_ticks: u64,
    pub original_pitch: u8,
}

impl TabNote {
    pub fn end_tick(&self) -> u64 {
        self.start_tick + self.duration_ticks
    }

    pub fn sounds_at(&self, tick: u64) -> bool {
        self.start_tick <= tick && tick < self.end_tick()
    }
}

/// Lowest-fret position for `pitch`, as `(string, fret)`.
///
/// Strings are scanned from string 1 down, and only a strictly lower fret
/// replaces the current pick, so ties go to the lower string number.
pub fn best_position(pitch: i32, tuning: &Tuning, max_fret: u8) -> Option<(u8, u8)> {
    let mut best: Option<(u8, u8)> = None;

    for (i, &open) in tuning.strings().iter().enumerate() {
        let Some(fret) = pitch.checked_sub(open as i32) else {
            continue;
        };
        if fret < 0 || fret > max_fret as i32 {
            continue;
        }
        let fret = fret as u8;
        if best.is_none_or(|(_, best_fret)| fret < best_fret) {
            best = Some(((i + 1) as u8, fret));
        }
    }

    best
}

/// Maps notes onto the fretboard one at a time, keeping their order.
///
/// Notes no string can reach within `max_fret` are left out.
pub fn map_notes(notes: &[Note], tuning: &Tuning, max_fret: u8, transpose: i32) -> Vec<TabNote> {
    let tab: Vec<TabNote> = notes
        .iter()
        .filter_map(|note| {
            let pitch = (note.pitch as i32).checked_add(transpose)?;
            let (string, fret) = best_position(pitch, tuning, max_fret)?;
            Some(TabNote {
                string,
                fret,
                start_tick: note.start_tick,
                duration_ticks: note.duration_ticks,
                original_pitch: note.pitch,
            })
        })
        .collect();

    if tab.len() < notes.len() {
        tracing::debug!(
            dropped = notes.len() - tab.len(),
            tuning = %tuning,
            max_fret,
            transpose,
            "Some notes are out of the fretboard's range"
        );
    }

    tab
}

/// Shifts every note by `semitones`, leaving out notes pushed past 0..=127.
pub fn transpose_notes(notes: &[Note], semitones: i32) -> Vec<Note> {
    notes
        .iter()
        .filter_map(|note| {
            let pitch = u8::try_from((note.pitch as i32).checked_add(semitones)?).ok()?;
            (pitch <= 127).then_some(Note { pitch, ..*note })
        })
        .collect()
}

/// Writes one `Tick <start>: String <s>, Fret <f>` line per note, by start tick.
pub fn write_tab<W: Write>(notes: &[TabNote], mut out: W) -> Result<usize> {
    let mut sorted: Vec<&TabNote> = notes.iter().collect();
    sorted.sort_by_key(|note| note.start_tick);

    for note in &sorted {
        writeln!(
            out,
            "Tick {}: String {}, Fret {}",
            note.start_tick, note.string, note.fret
        )?;
    }
    out.flush()?;

    Ok(sorted.len())
}

pub fn export_tab(notes: &[TabNote], path: &Path) -> Result<usize> {
    let file = File::create(path)?;
    let lines = write_tab(notes, BufWriter::new(file))?;
    tracing::info!(lines, path = %path.display(), "Exported tab");
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, start_tick: u64) -> Note {
        Note {
            pitch,
            start_tick,
            duration_ticks: 10,
            channel: 0,
            velocity: 100,
        }
    }

    fn positions(tab: &[TabNote]) -> Vec<(u8, u8)> {
        tab.iter().map(|t| (t.string, t.fret)).collect()
    }

    #[test]
    fn open_high_e_maps_to_first_string() {
        let tab = map_notes(&[note(64, 0)], &Tuning::standard(), DEFAULT_MAX_FRET, 0);
        assert_eq!(positions(&tab), vec![(1, 0)]);
        assert_eq!(tab[0].original_pitch, 64);
    }

    #[test]
    fn pitch_below_low_e_is_dropped() {
        assert!(map_notes(&[note(39, 0)], &Tuning::standard(), DEFAULT_MAX_FRET, 0).is_empty());
    }

    #[test]
    fn pitch_above_reach_is_dropped() {
        // Highest reachable with 20 frets on high E is 84.
        let tuning = Tuning::standard();
        assert_eq!(best_position(84, &tuning, 20), Some((1, 20)));
        assert_eq!(best_position(85, &tuning, 20), None);
    }

    #[test]
    fn lowest_fret_wins() {
        // B3 is open string 2, fret 4 on string 3, etc.
        assert_eq!(best_position(59, &Tuning::standard(), 20), Some((2, 0)));
        // C4 on string 2 fret 1 beats string 3 fret 5.
        assert_eq!(best_position(60, &Tuning::standard(), 20), Some((2, 1)));
    }

    #[test]
    fn ties_go_to_lower_string_number() {
        let unison = Tuning::new(vec![50, 50, 45]).unwrap();
        assert_eq!(best_position(52, &unison, 20), Some((1, 2)));
    }

    #[test]
    fn max_fret_limits_candidates() {
        // E4 with only 3 frets: string 2 needs fret 5, too high; string 1 open.
        assert_eq!(best_position(64, &Tuning::standard(), 3), Some((1, 0)));
        // G#4 needs fret 4 on high E.
        assert_eq!(best_position(68, &Tuning::standard(), 3), None);
    }

    #[test]
    fn mapping_preserves_order_and_timing() {
        let notes = [note(40, 30), note(20, 5), note(64, 0)];
        let tab = map_notes(&notes, &Tuning::standard(), 20, 0);
        assert_eq!(positions(&tab), vec![(6, 0), (1, 0)]);
        assert_eq!(tab[0].start_tick, 30);
        assert_eq!(tab[0].duration_ticks, 10);
    }

    #[test]
    fn transpose_offset_matches_pretransposed_notes() {
        let notes: Vec<Note> = (40..=84).map(|p| note(p, p as u64)).collect();
        let tuning = Tuning::standard();

        let plain = map_notes(&notes, &tuning, 20, 0);
        let shifted = map_notes(&transpose_notes(&notes, 12), &tuning, 20, -12);

        assert_eq!(positions(&plain), positions(&shifted));
    }

    #[test]
    fn transpose_drops_pitches_out_of_midi_range() {
        let notes = [note(2, 0), note(126, 0), note(60, 0)];
        assert_eq!(transpose_notes(&notes, -3).len(), 2);
        assert_eq!(transpose_notes(&notes, 3).len(), 2);
    }

    #[test]
    fn extreme_transpose_leaves_notes_unmapped() {
        let notes = [note(64, 0), note(40, 4)];
        let tuning = Tuning::standard();

        assert!(map_notes(&notes, &tuning, 20, i32::MAX).is_empty());
        assert!(map_notes(&notes, &tuning, 20, i32::MIN).is_empty());
        assert!(transpose_notes(&notes, i32::MAX).is_empty());
        assert_eq!(best_position(i32::MIN, &tuning, 20), None);
    }

    #[test]
    fn tuning_parses_and_displays() {
        let tuning: Tuning = " 62, 57 ,50,45,40,38".parse().unwrap();
        assert_eq!(tuning.string_count(), 6);
        assert_eq!(tuning.to_string(), "62,57,50,45,40,38");
    }

    #[test]
    fn tuning_rejects_bad_input() {
        assert!("".parse::<Tuning>().is_err());
        assert!("64,x,55".parse::<Tuning>().is_err());
        assert!("64,200".parse::<Tuning>().is_err());
        assert!(Tuning::new(vec![]).is_err());
    }

    #[test]
    fn tuning_string_count_fits_string_numbers() {
        assert!(Tuning::new(vec![40; 255]).is_ok());
        assert!(matches!(
            Tuning::new(vec![40; 256]),
            Err(TabError::InvalidTuning(_))
        ));
    }

    #[test]
    fn export_sorts_by_start_tick() {
        let tab = vec![
            TabNote {
                string: 2,
                fret: 3,
                start_tick: 480,
                duration_ticks: 10,
                original_pitch: 62,
            },
            TabNote {
                string: 6,
                fret: 0,
                start_tick: 0,
                duration_ticks: 10,
                original_pitch: 40,
            },
        ];

        let mut out = Vec::new();
        let lines = write_tab(&tab, &mut out).unwrap();

        assert_eq!(lines, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Tick 0: String 6, Fret 0\nTick 480: String 2, Fret 3\n"
        );
    }
}
