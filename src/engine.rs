use crate::error::TabError;
use crate::events::PlaybackEvent;
use crate::midi::{MidiSource, Note};
use crate::output::MidiSink;
use crate::settings::Settings;
use crate::tab::{self, TabNote, Tuning};
use crate::timing::PlaybackScheduler;
use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use std::thread::JoinHandle;

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadFile(PathBuf),
    Play,
    /// Stop where we are; `Play` resumes.
    Pause,
    /// `Pause` when playing, `Play` otherwise.
    TogglePause,
    /// Stop and rewind to the start.
    Stop,
    Seek(u64),
    SetTempo(f64),
    SetTranspose(i32),
    SetTuning(Tuning),
    SetMetronome(bool),
    Export(PathBuf),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    FileLoaded {
        path: PathBuf,
        tab_notes: Vec<TabNote>,
        ticks_per_quarter: u16,
        bpm: f64,
        /// Notes that could not be placed on the fretboard.
        dropped: usize,
    },
    Position {
        tick: u64,
        active: Vec<TabNote>,
    },
    Metronome {
        tick: u64,
    },
    PlaybackState {
        playing: bool,
    },
    Exported {
        path: PathBuf,
        lines: usize,
    },
    Error {
        message: String,
    },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: JoinHandle<Settings>,
}

impl EngineHandle {
    pub fn send(&self, command: EngineCommand) {
        let _ = self.command_tx.send(command);
    }

    /// Stops the engine and hands back its settings, including any changes
    /// made through commands.
    pub fn shutdown(self) -> Settings {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        self.thread.join().unwrap_or_else(|_| {
            tracing::warn!("Engine thread panicked, settings changes are lost");
            Settings::default()
        })
    }
}

pub fn spawn_engine(settings: Settings) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let thread = std::thread::spawn(move || engine_thread(settings, command_rx, update_tx));

    EngineHandle {
        command_tx,
        update_rx,
        thread,
    }
}

/// The currently loaded file, before fret mapping.
struct Session {
    path: PathBuf,
    notes: Vec<Note>,
    ticks_per_quarter: u16,
    file_tempo: Option<f64>,
}

struct EngineState {
    settings: Settings,
    session: Option<Session>,
    scheduler: PlaybackScheduler,
    sink: Option<MidiSink>,
    update_tx: Sender<EngineUpdate>,
}

fn engine_thread(
    settings: Settings,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) -> Settings {
    let scheduler = PlaybackScheduler::new();
    let playback_rx = scheduler.subscribe();

    let sink = match settings.midi_out.as_deref() {
        Some(hint) => match MidiSink::connect(Some(hint)) {
            Ok(sink) => Some(sink),
            Err(e) => {
                let _ = update_tx.send(EngineUpdate::Error {
                    message: e.to_string(),
                });
                None
            }
        },
        None => None,
    };

    let mut state = EngineState {
        settings,
        session: None,
        scheduler,
        sink,
        update_tx,
    };

    loop {
        crossbeam::channel::select! {
            recv(command_rx) -> command => match command {
                Ok(EngineCommand::Shutdown) | Err(_) => break,
                Ok(command) => state.handle_command(command),
            },
            recv(playback_rx) -> event => match event {
                Ok(event) => state.handle_playback(event),
                Err(_) => break,
            },
        }
    }

    state.scheduler.stop();
    state.settings
}

impl EngineState {
    fn send(&self, update: EngineUpdate) {
        let _ = self.update_tx.send(update);
    }

    fn report(&self, error: TabError) {
        tracing::warn!("{error}");
        self.send(EngineUpdate::Error {
            message: error.to_string(),
        });
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::LoadFile(path) => self.load_file(path),
            EngineCommand::Play => self.play(),
            EngineCommand::Pause => self.scheduler.stop(),
            EngineCommand::TogglePause => {
                if self.scheduler.is_playing() {
                    self.scheduler.stop();
                } else {
                    self.play();
                }
            }
            EngineCommand::Stop => {
                self.scheduler.stop();
                self.scheduler.seek(0);
            }
            EngineCommand::Seek(tick) => {
                if let Some(sink) = &mut self.sink {
                    sink.all_notes_off();
                }
                self.scheduler.seek(tick);
            }
            EngineCommand::SetTempo(bpm) => match self.scheduler.set_tempo(bpm) {
                Ok(()) => self.settings.bpm = bpm,
                Err(e) => self.report(e),
            },
            EngineCommand::SetTranspose(semitones) => {
                self.settings.transpose = semitones;
                self.remap();
            }
            EngineCommand::SetTuning(tuning) => {
                self.settings.tuning = tuning;
                self.remap();
            }
            EngineCommand::SetMetronome(on) => self.settings.metronome = on,
            EngineCommand::Export(path) => {
                match tab::export_tab(&self.scheduler.notes(), &path) {
                    Ok(lines) => self.send(EngineUpdate::Exported { path, lines }),
                    Err(e) => self.report(e),
                }
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn play(&mut self) {
        if self.session.is_none() {
            self.send(EngineUpdate::Error {
                message: "No MIDI file loaded".to_string(),
            });
        } else if self.scheduler.play() {
            self.send(EngineUpdate::PlaybackState { playing: true });
        } else if self.scheduler.notes().is_empty() {
            self.send(EngineUpdate::Error {
                message: "Nothing to play: no note fits on the fretboard".to_string(),
            });
        } else if !self.scheduler.is_playing() {
            self.send(EngineUpdate::Error {
                message: "Playback could not start".to_string(),
            });
        }
    }

    fn load_file(&mut self, path: PathBuf) {
        let source = match MidiSource::open(&path) {
            Ok(source) => source,
            Err(e) => {
                self.report(e);
                return;
            }
        };

        let notes = source.notes(self.settings.per_track);
        let bpm = self.settings.tempo_for(source.tempo_bpm);
        let tab_notes = self.map(&notes);
        let dropped = notes.len() - tab_notes.len();

        tracing::info!(
            path = %path.display(),
            notes = notes.len(),
            dropped,
            bpm,
            "Loaded MIDI file"
        );

        self.scheduler
            .load(tab_notes.clone(), source.ticks_per_quarter, bpm);
        self.settings.push_recent_file(&path);
        self.session = Some(Session {
            path: path.clone(),
            notes,
            ticks_per_quarter: source.ticks_per_quarter,
            file_tempo: source.tempo_bpm,
        });

        self.send(EngineUpdate::FileLoaded {
            path,
            tab_notes,
            ticks_per_quarter: source.ticks_per_quarter,
            bpm,
            dropped,
        });
    }

    fn map(&self, notes: &[Note]) -> Vec<TabNote> {
        tab::map_notes(
            notes,
            &self.settings.tuning,
            self.settings.max_fret,
            self.settings.transpose,
        )
    }

    /// Re-places the loaded notes after a tuning or transpose change, keeping
    /// the playback position.
    fn remap(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let tab_notes = self.map(&session.notes);
        let dropped = session.notes.len() - tab_notes.len();
        let was_playing = self.scheduler.is_playing();
        let state = self.scheduler.state();

        tracing::debug!(
            path = %session.path.display(),
            tuning = %self.settings.tuning,
            transpose = self.settings.transpose,
            file_tempo = ?session.file_tempo,
            "Remapping notes"
        );

        self.scheduler
            .load(tab_notes.clone(), session.ticks_per_quarter, state.tempo_bpm);
        self.scheduler.seek(state.current_tick);
        if was_playing {
            self.scheduler.play();
        }

        self.send(EngineUpdate::FileLoaded {
            path: session.path.clone(),
            tab_notes,
            ticks_per_quarter: session.ticks_per_quarter,
            bpm: state.tempo_bpm,
            dropped,
        });
    }

    fn handle_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Tick(tick) => {
                if let Some(sink) = &mut self.sink {
                    let tuning = self.settings.tuning.strings();
                    for note in self.scheduler.notes().iter() {
                        if note.end_tick() == tick {
                            if let Some(pitch) = sounding_pitch(note, tuning) {
                                sink.note_off(pitch);
                            }
                        }
                    }
                    for note in self.scheduler.notes().iter() {
                        if note.start_tick == tick {
                            if let Some(pitch) = sounding_pitch(note, tuning) {
                                sink.note_on(pitch);
                            }
                        }
                    }
                }

                let active = self.scheduler.active_notes(tick);
                self.send(EngineUpdate::Position { tick, active });
            }
            PlaybackEvent::Metronome(tick) => {
                if self.settings.metronome {
                    if let Some(sink) = &mut self.sink {
                        sink.click();
                    }
                    self.send(EngineUpdate::Metronome { tick });
                }
            }
            PlaybackEvent::Stopped => {
                if let Some(sink) = &mut self.sink {
                    sink.all_notes_off();
                }
                // A remap restarts playback right after stopping it.
                let playing = self.scheduler.is_playing();
                self.send(EngineUpdate::PlaybackState { playing });
            }
        }
    }
}

/// Pitch actually fretted, which differs from the original when transposed.
fn sounding_pitch(note: &TabNote, tuning: &[u8]) -> Option<u8> {
    let open = *tuning.get(usize::from(note.string).checked_sub(1)?)?;
    Some(open.saturating_add(note.fret).min(127))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sounding_pitch_adds_fret_to_open_string() {
        let tuning = Tuning::standard();
        let note = TabNote {
            string: 3,
            fret: 2,
            start_tick: 0,
            duration_ticks: 1,
            original_pitch: 55,
        };
        assert_eq!(sounding_pitch(&note, tuning.strings()), Some(57));
    }

    #[test]
    fn sounding_pitch_rejects_strings_outside_tuning() {
        let tuning = Tuning::standard();
        let mut note = TabNote {
            string: 0,
            fret: 0,
            start_tick: 0,
            duration_ticks: 1,
            original_pitch: 64,
        };
        assert_eq!(sounding_pitch(&note, tuning.strings()), None);
        note.string = 7;
        assert_eq!(sounding_pitch(&note, tuning.strings()), None);
    }
}
