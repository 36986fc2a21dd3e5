use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabError {
    /// The byte stream is not a Standard MIDI File we can read ticks from.
    #[error("MIDI source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid tuning: {0}")]
    InvalidTuning(String),

    #[error("Invalid tempo: {0} BPM")]
    InvalidTempo(f64),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("MIDI output error: {0}")]
    MidiOutput(String),
}

impl From<midly::Error> for TabError {
    fn from(err: midly::Error) -> Self {
        TabError::SourceUnreadable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TabError>;
