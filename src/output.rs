//! Sounding tab notes and metronome clicks on a MIDI output port.

use midir::{MidiOutput, MidiOutputConnection};

use crate::error::{Result, TabError};

const CLIENT_NAME: &str = "tabfret";
const NOTE_CHANNEL: u8 = 0;
const NOTE_VELOCITY: u8 = 100;
/// General MIDI percussion channel (10).
const CLICK_CHANNEL: u8 = 9;
/// Hi wood block.
const CLICK_NOTE: u8 = 76;
const CLICK_VELOCITY: u8 = 90;

pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| TabError::MidiOutput(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|port| midi_out.port_name(port).unwrap_or_default())
        .collect())
}

pub struct MidiSink {
    conn: MidiOutputConnection,
    port_name: String,
    sounding: Vec<u8>,
}

impl MidiSink {
    /// Connects to the first port whose name contains `hint`, or to the
    /// first port at all when no hint is given.
    pub fn connect(hint: Option<&str>) -> Result<Self> {
        let midi_out =
            MidiOutput::new(CLIENT_NAME).map_err(|e| TabError::MidiOutput(e.to_string()))?;

        let ports = midi_out.ports();
        let port = match hint {
            Some(hint) => ports.iter().find(|p| {
                midi_out
                    .port_name(p)
                    .unwrap_or_default()
                    .contains(hint)
            }),
            None => ports.first(),
        }
        .ok_or_else(|| {
            TabError::MidiOutput(format!(
                "no MIDI output port matching '{}'",
                hint.unwrap_or("*")
            ))
        })?;

        let port_name = midi_out.port_name(port).unwrap_or_default();
        let conn = midi_out
            .connect(port, "tabfret-out")
            .map_err(|e| TabError::MidiOutput(e.to_string()))?;

        tracing::info!(port = %port_name, "Connected MIDI output");
        Ok(Self {
            conn,
            port_name,
            sounding: Vec::new(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn note_on(&mut self, pitch: u8) {
        self.send(&[0x90 | NOTE_CHANNEL, pitch & 0x7F, NOTE_VELOCITY]);
        self.sounding.push(pitch);
    }

    pub fn note_off(&mut self, pitch: u8) {
        if let Some(i) = self.sounding.iter().position(|&p| p == pitch) {
            self.sounding.swap_remove(i);
            self.send(&[0x80 | NOTE_CHANNEL, pitch & 0x7F, 0]);
        }
    }

    pub fn click(&mut self) {
        self.send(&[0x90 | CLICK_CHANNEL, CLICK_NOTE, CLICK_VELOCITY]);
        self.send(&[0x80 | CLICK_CHANNEL, CLICK_NOTE, 0]);
    }

    pub fn all_notes_off(&mut self) {
        for pitch in std::mem::take(&mut self.sounding) {
            self.send(&[0x80 | NOTE_CHANNEL, pitch & 0x7F, 0]);
        }
        // All Notes Off controller, for anything we lost track of.
        self.send(&[0xB0 | NOTE_CHANNEL, 123, 0]);
    }

    fn send(&mut self, message: &[u8]) {
        if let Err(e) = self.conn.send(message) {
            tracing::warn!(port = %self.port_name, "MIDI send failed: {e}");
        }
    }
}

impl Drop for MidiSink {
    fn drop(&mut self) {
        self.all_notes_off();
    }
}
