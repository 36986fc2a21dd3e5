use std::error::Error;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam::channel::Sender;
use tabfret::output::list_output_ports;
use tabfret::settings::DEFAULT_SETTINGS_FILE;
use tabfret::timing::valid_bpm;
use tabfret::{
    EngineCommand, EngineUpdate, MidiSource, Settings, TabError, Tuning, export_tab, spawn_engine,
    write_tab,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Guitar tablature from MIDI files")]
struct Args {
    /// Settings file (RON)
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the tab of a MIDI file, one line per note
    Tab {
        midi: PathBuf,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        mapping: MappingArgs,
        /// Pair note events across track boundaries
        #[arg(long)]
        merge_tracks: bool,
    },
    /// Play a MIDI file, printing tab positions as they sound
    Play {
        midi: PathBuf,
        #[arg(long, value_parser = parse_bpm)]
        bpm: Option<f64>,
        #[arg(long)]
        metronome: bool,
        /// Send notes and clicks to the MIDI output whose name contains this
        #[arg(long)]
        midi_out: Option<String>,
        /// Start tick
        #[arg(long)]
        from: Option<u64>,
        #[command(flatten)]
        mapping: MappingArgs,
    },
    /// List MIDI output ports
    Ports,
    /// Change and save settings, then print them
    Config {
        #[command(flatten)]
        mapping: MappingArgs,
        #[arg(long, value_parser = parse_bpm)]
        bpm: Option<f64>,
        #[arg(long)]
        metronome: Option<Toggle>,
    },
}

#[derive(clap::Args, Debug)]
struct MappingArgs {
    /// Open-string MIDI notes, string 1 first, e.g. 64,59,55,50,45,40
    #[arg(long)]
    tuning: Option<Tuning>,
    #[arg(long, allow_hyphen_values = true)]
    transpose: Option<i32>,
    #[arg(long)]
    max_fret: Option<u8>,
}

impl MappingArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(tuning) = self.tuning {
            settings.tuning = tuning;
        }
        if let Some(transpose) = self.transpose {
            settings.transpose = transpose;
        }
        if let Some(max_fret) = self.max_fret {
            settings.max_fret = max_fret;
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

fn parse_bpm(arg: &str) -> Result<f64, String> {
    let bpm: f64 = arg.parse().map_err(|_| format!("'{arg}' is not a number"))?;
    if valid_bpm(bpm) {
        Ok(bpm)
    } else {
        Err(TabError::InvalidTempo(bpm).to_string())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = Settings::load(&args.settings).unwrap_or_else(|e| {
        tracing::warn!("Could not read settings, using defaults: {e}");
        Settings::default()
    });

    match args.command {
        Command::Tab {
            midi,
            output,
            mapping,
            merge_tracks,
        } => {
            mapping.apply(&mut settings);
            if merge_tracks {
                settings.per_track = false;
            }

            let source = MidiSource::open(&midi)?;
            let tab = tabfret::tablature(&source, &settings);
            match output {
                Some(path) => {
                    export_tab(&tab, &path)?;
                }
                None => {
                    write_tab(&tab, io::stdout().lock())?;
                }
            }
        }
        Command::Play {
            midi,
            bpm,
            metronome,
            midi_out,
            from,
            mapping,
        } => {
            mapping.apply(&mut settings);
            if let Some(bpm) = bpm {
                settings.bpm = bpm;
                settings.follow_file_tempo = false;
            }
            settings.metronome |= metronome;
            if midi_out.is_some() {
                settings.midi_out = midi_out;
            }
            play(settings, &args.settings, midi, from)?;
        }
        Command::Ports => {
            for name in list_output_ports()? {
                println!("{name}");
            }
        }
        Command::Config {
            mapping,
            bpm,
            metronome,
        } => {
            mapping.apply(&mut settings);
            if let Some(bpm) = bpm {
                settings.bpm = bpm;
            }
            if let Some(toggle) = metronome {
                settings.metronome = matches!(toggle, Toggle::On);
            }
            settings.save(&args.settings)?;
            println!(
                "{}",
                ron::ser::to_string_pretty(&settings, ron::ser::PrettyConfig::default())?
            );
        }
    }

    Ok(())
}

fn play(
    settings: Settings,
    settings_path: &Path,
    midi: PathBuf,
    from: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    let engine = spawn_engine(settings);
    engine.send(EngineCommand::LoadFile(midi));

    let mut last_tick = loop {
        match engine.update_rx.recv()? {
            EngineUpdate::FileLoaded {
                path,
                tab_notes,
                ticks_per_quarter,
                bpm,
                dropped,
            } => {
                println!(
                    "{}: {} notes ({} out of range), {} ticks/quarter at {} BPM",
                    path.display(),
                    tab_notes.len(),
                    dropped,
                    ticks_per_quarter,
                    bpm
                );
                if tab_notes.is_empty() {
                    engine.shutdown();
                    return Err("Nothing to play: no note fits on the fretboard".into());
                }
                break tab_notes.iter().map(|n| n.end_tick()).max().unwrap_or(0);
            }
            EngineUpdate::Error { message } => {
                engine.shutdown();
                return Err(message.into());
            }
            _ => {}
        }
    };

    if let Some(tick) = from {
        engine.send(EngineCommand::Seek(tick));
    }
    engine.send(EngineCommand::Play);
    println!(
        "Commands: p pause/resume, s <tick> seek, t <bpm> tempo, x <semitones> transpose, \
         m on|off metronome, q quit"
    );

    let command_tx = engine.command_tx.clone();
    std::thread::spawn(move || read_commands(command_tx));

    let mut position = 0;
    for update in engine.update_rx.iter() {
        match update {
            EngineUpdate::Position { tick, active } => {
                position = tick;
                for note in active.iter().filter(|n| n.start_tick == tick) {
                    println!(
                        "Tick {}: String {}, Fret {}",
                        note.start_tick, note.string, note.fret
                    );
                }
            }
            EngineUpdate::Metronome { .. } => println!("*click*"),
            EngineUpdate::PlaybackState { playing: false } if position >= last_tick => break,
            EngineUpdate::PlaybackState { playing } => {
                println!("{}", if playing { "Playing" } else { "Paused" });
            }
            EngineUpdate::FileLoaded { tab_notes, .. } => {
                last_tick = tab_notes.iter().map(|n| n.end_tick()).max().unwrap_or(0);
                println!("Remapped {} notes", tab_notes.len());
            }
            EngineUpdate::Exported { path, lines } => {
                println!("Wrote {lines} lines to {}", path.display());
            }
            EngineUpdate::Error { message } => eprintln!("{message}"),
        }
    }

    // Only the recent-files list outlives a play session.
    let recent_files = engine.shutdown().recent_files;
    let mut saved = Settings::load(settings_path).unwrap_or_default();
    saved.recent_files = recent_files;
    if let Err(e) = saved.save(settings_path) {
        tracing::warn!("Could not save settings: {e}");
    }

    Ok(())
}

fn read_commands(command_tx: Sender<EngineCommand>) {
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let mut parts = line.split_whitespace();
        let command = match (parts.next(), parts.next()) {
            (Some("p"), _) => EngineCommand::TogglePause,
            (Some("q"), _) => EngineCommand::Shutdown,
            (Some("s"), Some(tick)) => match tick.parse() {
                Ok(tick) => EngineCommand::Seek(tick),
                Err(_) => continue,
            },
            (Some("t"), Some(bpm)) => match bpm.parse() {
                Ok(bpm) => EngineCommand::SetTempo(bpm),
                Err(_) => continue,
            },
            (Some("x"), Some(semitones)) => match semitones.parse() {
                Ok(semitones) => EngineCommand::SetTranspose(semitones),
                Err(_) => continue,
            },
            (Some("m"), Some(toggle)) => EngineCommand::SetMetronome(toggle == "on"),
            _ => continue,
        };

        let quit = matches!(command, EngineCommand::Shutdown);
        if command_tx.send(command).is_err() || quit {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bpm_flag_rejects_non_positive_tempos() {
        assert_eq!(parse_bpm("90"), Ok(90.0));
        assert!(parse_bpm("0").is_err());
        assert!(parse_bpm("-5").is_err());
        assert!(parse_bpm("inf").is_err());
        assert!(parse_bpm("fast").is_err());
    }

    #[test]
    fn bpm_flags_are_validated_by_clap() {
        assert!(Args::try_parse_from(["tabfret", "config", "--bpm", "0"]).is_err());
        assert!(Args::try_parse_from(["tabfret", "play", "song.mid", "--bpm=-5"]).is_err());
        assert!(Args::try_parse_from(["tabfret", "play", "song.mid", "--bpm", "96"]).is_ok());
    }
}
