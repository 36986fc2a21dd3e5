#![allow(dead_code)]

use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::PathBuf;

/// (absolute tick, pitch, is_on) per track, turned into a format-1 file.
pub fn smf_bytes(
    ticks_per_quarter: u16,
    tempo_us: Option<u32>,
    tracks: &[Vec<(u32, u8, bool)>],
) -> Vec<u8> {
    let mut smf_tracks = Vec::new();

    for (i, notes) in tracks.iter().enumerate() {
        let mut events = Vec::new();
        if i == 0 {
            if let Some(us) = tempo_us {
                events.push(TrackEvent {
                    delta: u28::from(0),
                    kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(us))),
                });
            }
        }

        let mut sorted = notes.clone();
        sorted.sort_by_key(|&(tick, _, _)| tick);

        let mut last = 0;
        for (tick, pitch, is_on) in sorted {
            let message = if is_on {
                MidiMessage::NoteOn {
                    key: u7::from(pitch),
                    vel: u7::from(100),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::from(pitch),
                    vel: u7::from(0),
                }
            };
            events.push(TrackEvent {
                delta: u28::from(tick - last),
                kind: TrackEventKind::Midi {
                    channel: u4::from(0),
                    message,
                },
            });
            last = tick;
        }

        events.push(TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf_tracks.push(events);
    }

    let smf = Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical(u15::from(ticks_per_quarter)),
        },
        tracks: smf_tracks,
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes).unwrap();
    bytes
}

/// A fresh path under the system temp dir, unique per test and process.
pub fn scratch_file(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tabfret-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

pub fn write_midi(name: &str, bytes: &[u8]) -> PathBuf {
    let path = scratch_file(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Notes as (start, end, pitch) spans.
pub fn note(start: u32, end: u32, pitch: u8) -> [(u32, u8, bool); 2] {
    [(start, pitch, true), (end, pitch, false)]
}
