/// A note message as read from a track, timed relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawMidiEvent {
    NoteOn {
        pitch: u8,
        velocity: u8,
        channel: u8,
        delta: u64,
    },
    NoteOff {
        pitch: u8,
        channel: u8,
        delta: u64,
    },
}

impl RawMidiEvent {
    pub fn delta(&self) -> u64 {
        match self {
            RawMidiEvent::NoteOn { delta, .. } | RawMidiEvent::NoteOff { delta, .. } => *delta,
        }
    }

    pub fn pitch(&self) -> u8 {
        match self {
            RawMidiEvent::NoteOn { pitch, .. } | RawMidiEvent::NoteOff { pitch, .. } => *pitch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Tick(u64),
    Metronome(u64),
    Stopped,
}
