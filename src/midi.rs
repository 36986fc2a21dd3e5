//! Reading Standard MIDI Files and reducing their note events into closed
//! note intervals.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TabError};
use crate::events::RawMidiEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub start_tick: u64,
    pub duration_ticks: u64,
    pub channel: u8,
    pub velocity: u8,
}

impl Note {
    pub fn end_tick(&self) -> u64 {
        self.start_tick + self.duration_ticks
    }
}

/// The parts of a MIDI file the tab pipeline cares about.
#[derive(Debug, Clone)]
pub struct MidiSource {
    pub ticks_per_quarter: u16,
    /// Tempo of the first Set Tempo meta event, if the file has one.
    pub tempo_bpm: Option<f64>,
    pub tracks: Vec<Vec<RawMidiEvent>>,
}

impl MidiSource {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let smf = Smf::parse(bytes)?;

        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) if tpq.as_int() > 0 => tpq.as_int(),
            Timing::Metrical(_) => {
                return Err(TabError::SourceUnreadable(
                    "header declares zero ticks per quarter note".to_string(),
                ));
            }
            Timing::Timecode(..) => {
                return Err(TabError::SourceUnreadable(
                    "SMPTE timecode files are not supported".to_string(),
                ));
            }
        };

        let mut tempo_bpm = None;
        let mut tracks = Vec::with_capacity(smf.tracks.len());

        for track in &smf.tracks {
            let mut events = Vec::new();
            // Deltas of events we skip still move time forward.
            let mut carried: u64 = 0;

            for event in track {
                let delta = carried + event.delta.as_int() as u64;
                carried = delta;

                match event.kind {
                    TrackEventKind::Midi { channel, message } => match message {
                        MidiMessage::NoteOn { key, vel } => {
                            events.push(RawMidiEvent::NoteOn {
                                pitch: key.as_int(),
                                velocity: vel.as_int(),
                                channel: channel.as_int(),
                                delta,
                            });
                            carried = 0;
                        }
                        MidiMessage::NoteOff { key, .. } => {
                            events.push(RawMidiEvent::NoteOff {
                                pitch: key.as_int(),
                                channel: channel.as_int(),
                                delta,
                            });
                            carried = 0;
                        }
                        _ => {}
                    },
                    TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter)) => {
                        if tempo_bpm.is_none() && us_per_quarter.as_int() > 0 {
                            tempo_bpm = Some(60_000_000.0 / us_per_quarter.as_int() as f64);
                        }
                    }
                    _ => {}
                }
            }

            tracks.push(events);
        }

        tracing::debug!(
            tracks = tracks.len(),
            ticks_per_quarter,
            ?tempo_bpm,
            "Parsed MIDI source"
        );

        Ok(Self {
            ticks_per_quarter,
            tempo_bpm,
            tracks,
        })
    }

    pub fn notes(&self, per_track: bool) -> Vec<Note> {
        reduce(&self.tracks, per_track)
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingStart {
    tick: u64,
    velocity: u8,
    channel: u8,
}

/// Pairs note-on/note-off events into closed notes.
///
/// Each pitch keeps a FIFO of pending starts, so retriggered notes of the same
/// pitch close in the order they were opened. Unmatched note-offs, zero-length
/// pairs and notes still open at the end of a track are dropped.
///
/// With `per_track` the pending starts are forgotten at every track boundary;
/// otherwise a note-off in a later track may close a start from an earlier one.
pub fn reduce(tracks: &[Vec<RawMidiEvent>], per_track: bool) -> Vec<Note> {
    let mut pending: HashMap<u8, VecDeque<PendingStart>> = HashMap::new();
    let mut notes = Vec::new();
    let mut unpaired = 0usize;
    let mut unterminated = 0usize;

    for track in tracks {
        if per_track {
            unterminated += pending.values().map(VecDeque::len).sum::<usize>();
            pending.clear();
        }

        let mut tick: u64 = 0;
        for event in track {
            tick += event.delta();

            match *event {
                RawMidiEvent::NoteOn {
                    pitch,
                    velocity,
                    channel,
                    ..
                } if velocity > 0 => {
                    pending.entry(pitch).or_default().push_back(PendingStart {
                        tick,
                        velocity,
                        channel,
                    });
                }
                _ => {
                    let pitch = event.pitch();
                    match pending.get_mut(&pitch).and_then(VecDeque::pop_front) {
                        Some(start) if tick > start.tick => notes.push(Note {
                            pitch,
                            start_tick: start.tick,
                            duration_ticks: tick - start.tick,
                            channel: start.channel,
                            velocity: start.velocity,
                        }),
                        _ => unpaired += 1,
                    }
                }
            }
        }
    }

    unterminated += pending.values().map(VecDeque::len).sum::<usize>();
    if unpaired > 0 || unterminated > 0 {
        tracing::trace!(unpaired, unterminated, "Dropped unmatched note events");
    }

    notes
}
