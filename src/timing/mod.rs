mod scheduler;
mod state;

pub use scheduler::PlaybackScheduler;
pub use state::{DEFAULT_BPM, PlaybackState, valid_bpm};
