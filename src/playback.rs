//! Serialized audio playback.
//!
//! Requests form a strict queue: starting a playback while one is in flight
//! queues it instead of interrupting. Shutdown drains the queue, delivering a
//! distinct cancellation outcome to every not-yet-started item, lets the
//! active item finish naturally, then refuses new requests.

use crate::error::AppError;
use log::{debug, warn};
use rodio::{Decoder, OutputStream, Sink};
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Played,
    Failed(String),
    Canceled,
}

struct Job {
    path: PathBuf,
    volume: f32,
    done: Sender<PlaybackOutcome>,
}

#[derive(Default)]
struct QueueState {
    jobs: Mutex<VecDeque<Job>>,
    wake: Condvar,
    shutting_down: AtomicBool,
}

pub type PlayFn = Box<dyn Fn(&Path, f32) -> Result<(), String> + Send + Sync>;

pub struct PlaybackQueue {
    state: Arc<QueueState>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::with_player(Box::new(play_audio_file))
    }

    /// Queue with a custom playback function; the production constructor uses
    /// the rodio-backed player.
    pub fn with_player(player: PlayFn) -> Self {
        let state = Arc::new(QueueState::default());
        let worker_state = state.clone();
        let handle = thread::spawn(move || worker_loop(worker_state, player));
        Self {
            state,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a file for playback. The receiver resolves once the item was
    /// played, failed, or canceled by shutdown.
    pub fn enqueue(&self, path: PathBuf, volume: f32) -> Result<Receiver<PlaybackOutcome>, AppError> {
        if self.state.shutting_down.load(Ordering::SeqCst) {
            return Err(AppError::ShuttingDown);
        }
        let (done, outcome) = channel();
        {
            let mut jobs = self.state.jobs.lock().unwrap();
            // Re-check under the lock so a racing shutdown cannot strand a job.
            if self.state.shutting_down.load(Ordering::SeqCst) {
                return Err(AppError::ShuttingDown);
            }
            jobs.push_back(Job { path, volume, done });
        }
        self.state.wake.notify_one();
        Ok(outcome)
    }

    pub fn queued_len(&self) -> usize {
        self.state.jobs.lock().unwrap().len()
    }

    /// Drain the queue: queued items get a cancellation outcome each, the
    /// active item finishes naturally, then the worker exits.
    pub fn shutdown(&self) {
        self.state.shutting_down.store(true, Ordering::SeqCst);
        {
            let mut jobs = self.state.jobs.lock().unwrap();
            while let Some(job) = jobs.pop_front() {
                debug!("canceling queued playback of {:?}", job.path);
                let _ = job.done.send(PlaybackOutcome::Canceled);
            }
        }
        self.state.wake.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                warn!("playback worker panicked");
            }
        }
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PlaybackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(state: Arc<QueueState>, player: PlayFn) {
    loop {
        let job = {
            let mut jobs = state.jobs.lock().unwrap();
            loop {
                if let Some(job) = jobs.pop_front() {
                    break job;
                }
                if state.shutting_down.load(Ordering::SeqCst) {
                    return;
                }
                jobs = state.wake.wait(jobs).unwrap();
            }
        };
        let outcome = match player(&job.path, job.volume) {
            Ok(()) => PlaybackOutcome::Played,
            Err(e) => {
                warn!("playback of {:?} failed: {}", job.path, e);
                PlaybackOutcome::Failed(e)
            }
        };
        let _ = job.done.send(outcome);
    }
}

/// Blocking rodio playback on the default output device.
fn play_audio_file(path: &Path, volume: f32) -> Result<(), String> {
    let (_stream, handle) =
        OutputStream::try_default().map_err(|e| format!("no output device: {}", e))?;
    let sink = Sink::try_new(&handle).map_err(|e| format!("could not open sink: {}", e))?;

    let file = File::open(path).map_err(|e| format!("could not open {:?}: {}", path, e))?;
    let source =
        Decoder::new(BufReader::new(file)).map_err(|e| format!("could not decode audio: {}", e))?;

    sink.set_volume(volume);
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}
