use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use super::state::{Clock, DEFAULT_BPM, PlaybackState, valid_bpm};
use crate::error::{Result, TabError};
use crate::events::PlaybackEvent;
use crate::tab::TabNote;

/// Drives a virtual tick clock over a set of tab notes on its own thread.
///
/// Every subscriber sees `Tick`, `Metronome` and `Stopped` events in the
/// order they were emitted. Only one timing thread runs at a time, and each
/// `play()` that starts one ends with exactly one `Stopped`.
pub struct PlaybackScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    /// Dropping the sender wakes the timing thread out of its wait.
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

struct Shared {
    notes: ArcSwap<Vec<TabNote>>,
    clock: Mutex<Clock>,
    running: AtomicBool,
    subscribers: Mutex<Vec<Sender<PlaybackEvent>>>,
}

impl Shared {
    fn emit(&self, event: PlaybackEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

enum Finish {
    Ended,
    Cancelled,
    Faulted,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                notes: ArcSwap::from_pointee(Vec::new()),
                clock: Mutex::new(Clock::new()),
                running: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        let (tx, rx) = channel::unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    /// Replaces the note set and rewinds to tick 0, stopping any playback.
    pub fn load(&self, notes: Vec<TabNote>, ticks_per_quarter: u16, bpm: f64) {
        let mut worker = self.worker.lock();
        halt(&mut worker);

        let bpm = if valid_bpm(bpm) {
            bpm
        } else {
            tracing::warn!(bpm, "Ignoring invalid tempo, using {DEFAULT_BPM} BPM");
            DEFAULT_BPM
        };
        if ticks_per_quarter == 0 {
            tracing::warn!("Resolution of 0 ticks per quarter note, using 1");
        }

        let mut clock = self.shared.clock.lock();
        clock.current_tick = 0;
        clock.bpm = bpm;
        clock.ticks_per_quarter = ticks_per_quarter.max(1);
        clock.max_tick = notes.iter().map(TabNote::end_tick).max().unwrap_or(0);

        tracing::debug!(
            notes = notes.len(),
            max_tick = clock.max_tick,
            ticks_per_quarter = clock.ticks_per_quarter,
            bpm,
            "Loaded playback notes"
        );
        self.shared.notes.store(Arc::new(notes));
    }

    /// Starts or resumes playback from the current tick.
    ///
    /// Returns `false` without doing anything when already playing or when
    /// there is nothing loaded.
    pub fn play(&self) -> bool {
        let mut worker = self.worker.lock();

        if self.shared.notes.load().is_empty() {
            tracing::debug!("Nothing loaded, not starting playback");
            return false;
        }
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // A run that ended by itself leaves a finished thread behind.
        if let Some(previous) = worker.take() {
            let _ = previous.handle.join();
        }

        let (cancel_tx, cancel_rx) = channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("tabfret-playback".to_string())
            .spawn(move || run(&shared, &cancel_rx));

        match spawned {
            Ok(handle) => {
                tracing::info!(from_tick = self.current_tick(), "Playback started");
                *worker = Some(Worker {
                    cancel: cancel_tx,
                    handle,
                });
                true
            }
            Err(e) => {
                tracing::error!("Failed to spawn playback thread: {e}");
                self.shared.running.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Cancels playback and waits for the timing thread to exit. The
    /// position is kept so `play()` resumes from it.
    pub fn stop(&self) {
        halt(&mut self.worker.lock());
    }

    /// Jumps to `tick` and reports it immediately, without starting or
    /// stopping playback.
    pub fn seek(&self, tick: u64) {
        let mut clock = self.shared.clock.lock();
        clock.current_tick = tick;
        self.shared.emit(PlaybackEvent::Tick(tick));
        tracing::debug!(tick, "Seek");
    }

    /// Takes effect from the next tick interval.
    pub fn set_tempo(&self, bpm: f64) -> Result<()> {
        if !valid_bpm(bpm) {
            return Err(TabError::InvalidTempo(bpm));
        }
        self.shared.clock.lock().bpm = bpm;
        tracing::debug!(bpm, "Tempo changed");
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn current_tick(&self) -> u64 {
        self.shared.clock.lock().current_tick
    }

    pub fn max_tick(&self) -> u64 {
        self.shared.clock.lock().max_tick
    }

    pub fn state(&self) -> PlaybackState {
        let clock = self.shared.clock.lock();
        PlaybackState {
            current_tick: clock.current_tick,
            is_playing: self.is_playing(),
            tempo_bpm: clock.bpm,
            ticks_per_quarter: clock.ticks_per_quarter,
        }
    }

    pub fn notes(&self) -> Arc<Vec<TabNote>> {
        self.shared.notes.load_full()
    }

    /// Notes sounding at `tick`, for highlighting.
    pub fn active_notes(&self, tick: u64) -> Vec<TabNote> {
        self.shared
            .notes
            .load()
            .iter()
            .filter(|note| note.sounds_at(tick))
            .copied()
            .collect()
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        halt(self.worker.get_mut());
    }
}

fn halt(worker: &mut Option<Worker>) {
    if let Some(Worker { cancel, handle }) = worker.take() {
        drop(cancel);
        if handle.join().is_err() {
            tracing::warn!("Playback thread exited abnormally");
        }
    }
}

fn run(shared: &Shared, cancel: &Receiver<()>) {
    let finish = match panic::catch_unwind(AssertUnwindSafe(|| tick_loop(shared, cancel))) {
        Ok(finish) => finish,
        Err(payload) => {
            tracing::error!("Playback fault: {}", panic_message(payload.as_ref()));
            Finish::Faulted
        }
    };

    let mut clock = shared.clock.lock();
    match finish {
        Finish::Ended => {
            tracing::info!(last_tick = clock.max_tick, "Playback finished");
            clock.current_tick = 0;
        }
        Finish::Cancelled => {
            tracing::info!(tick = clock.current_tick, "Playback stopped");
        }
        Finish::Faulted => {}
    }
    shared.running.store(false, Ordering::Release);
    shared.emit(PlaybackEvent::Stopped);
}

fn tick_loop(shared: &Shared, cancel: &Receiver<()>) -> Finish {
    loop {
        if !matches!(cancel.try_recv(), Err(TryRecvError::Empty)) {
            return Finish::Cancelled;
        }

        let interval = {
            let clock = shared.clock.lock();
            if clock.current_tick > clock.max_tick {
                return Finish::Ended;
            }
            shared.emit(PlaybackEvent::Tick(clock.current_tick));
            if clock.on_beat() {
                shared.emit(PlaybackEvent::Metronome(clock.current_tick));
            }
            tracing::trace!(tick = clock.current_tick, "Tick");
            clock.tick_interval()
        };

        match cancel.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Finish::Cancelled,
        }

        shared.clock.lock().current_tick += 1;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
