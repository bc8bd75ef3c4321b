//! Timeline insertion client.
//!
//! Keeps a background connection monitor so availability reads never block,
//! and drives the insertion procedure: import the audio file, place it on the
//! configured audio track at the playhead, and optionally copy a caption
//! template clip onto the overlay track with its text tool re-textualized.
//! Every attempt is appended to a dedicated log file, since the editor's host
//! may not show a console.

use crate::error::AppError;
use crate::resolve::bridge::{BinRef, ClipInsertion, EditorScripting, MediaItem, TrackKind};
use crate::resolve::timecode::{normalize_fps, timecode_to_frames};
use crate::settings::SettingsStore;
use chrono::Local;
use log::{info, warn};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const INSERT_LOG_FILE: &str = "resolve_insert.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            2 => ConnectionStatus::Connected,
            1 => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub audio_appended: bool,
    pub overlay_appended: bool,
}

struct MonitorWorker {
    shutdown: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

pub struct ResolveClient {
    scripting: Arc<dyn EditorScripting>,
    settings: Arc<SettingsStore>,
    status: Arc<AtomicU8>,
    monitor: Mutex<Option<MonitorWorker>>,
}

impl ResolveClient {
    pub fn new(scripting: Arc<dyn EditorScripting>, settings: Arc<SettingsStore>) -> Self {
        Self {
            scripting,
            settings,
            status: Arc::new(AtomicU8::new(ConnectionStatus::Disconnected as u8)),
            monitor: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Start the periodic background probe. Readers only ever see the
    /// last-known status; nothing waits on this schedule.
    pub fn start_monitor(&self) {
        let mut guard = self.monitor.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let scripting = self.scripting.clone();
        let settings = self.settings.clone();
        let status = self.status.clone();

        let handle = thread::spawn(move || {
            while !shutdown_flag.load(Ordering::SeqCst) {
                status.store(ConnectionStatus::Connecting as u8, Ordering::SeqCst);
                let next = match scripting.probe() {
                    Ok(()) => ConnectionStatus::Connected,
                    Err(_) => ConnectionStatus::Disconnected,
                };
                status.store(next as u8, Ordering::SeqCst);

                let interval = settings.get().resolve.connect_interval_secs.max(1);
                // Sleep in short steps so shutdown is honored promptly.
                let mut slept = 0u64;
                while slept < interval * 1000 && !shutdown_flag.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(250));
                    slept += 250;
                }
            }
        });
        *guard = Some(MonitorWorker { shutdown, handle });
    }

    pub fn stop_monitor(&self) {
        if let Some(worker) = self.monitor.lock().unwrap().take() {
            worker.shutdown.store(true, Ordering::SeqCst);
            if worker.handle.join().is_err() {
                warn!("connection monitor thread panicked");
            }
        }
    }

    /// Last-known status, with a direct out-of-band probe when it says we are
    /// not connected. Insertion never waits for the monitor's schedule.
    fn ensure_connected(&self) -> Result<(), AppError> {
        if self.status() == ConnectionStatus::Connected {
            return Ok(());
        }
        match self.scripting.probe() {
            Ok(()) => {
                self.status
                    .store(ConnectionStatus::Connected as u8, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.status
                    .store(ConnectionStatus::Disconnected as u8, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Insert a synthesized audio file at the playhead, with an optional
    /// caption template overlay. The insertion succeeds if the audio append
    /// succeeded; overlay problems are logged and non-fatal.
    pub fn insert(&self, file_path: &str, text: &str) -> Result<InsertOutcome, AppError> {
        let resolve = self.settings.get().resolve;
        self.log_attempt(&format!(
            "insert file={} text={:?} audio_track={} video_track={}",
            file_path, text, resolve.audio_track, resolve.video_track
        ));

        let result = self.insert_inner(file_path, text, &resolve);
        match &result {
            Ok(outcome) => self.log_attempt(&format!(
                "result ok audio={} overlay={}",
                outcome.audio_appended, outcome.overlay_appended
            )),
            Err(e) => self.log_attempt(&format!("result error: {}", e)),
        }
        result
    }

    fn insert_inner(
        &self,
        file_path: &str,
        text: &str,
        resolve: &crate::settings::ResolveSettings,
    ) -> Result<InsertOutcome, AppError> {
        self.ensure_connected()?;

        let item = self
            .scripting
            .import_media(file_path)?
            .ok_or_else(|| AppError::Editor("media import returned no item".to_string()))?;

        let timeline = self.scripting.timeline_info()?;
        let fps = normalize_fps(&timeline.frame_rate);
        if fps == 0 {
            return Err(AppError::FrameResolution(format!(
                "unusable timeline frame rate {:?}",
                timeline.frame_rate
            )));
        }
        let record_frame = timecode_to_frames(&timeline.playhead, fps).ok_or_else(|| {
            AppError::FrameResolution(format!("unparseable playhead {:?}", timeline.playhead))
        })?;

        let duration = self.clip_duration_frames(&item, fps)?;

        let audio_insertion = ClipInsertion {
            media_id: item.id.clone(),
            start_frame: 0,
            end_frame: duration - 1,
            track_index: resolve.audio_track,
            record_frame,
            kind: TrackKind::Audio,
        };
        self.scripting
            .append_clip(&audio_insertion)?
            .ok_or_else(|| AppError::Editor("audio append was refused".to_string()))?;
        info!(
            "appended {} to audio track {} at frame {}",
            item.name, resolve.audio_track, record_frame
        );

        let overlay_appended = match (&resolve.caption_bin, &resolve.template_clip) {
            (Some(bin_name), Some(template_name)) => {
                match self.insert_overlay(
                    bin_name,
                    template_name,
                    text,
                    resolve.video_track,
                    record_frame,
                    duration,
                ) {
                    Ok(appended) => appended,
                    Err(e) => {
                        warn!("caption overlay failed (audio append stands): {}", e);
                        self.log_attempt(&format!("overlay error: {}", e));
                        false
                    }
                }
            }
            _ => false,
        };

        Ok(InsertOutcome {
            audio_appended: true,
            overlay_appended,
        })
    }

    /// Clip length in frames: the imported item's frame-count property, or
    /// its duration timecode when the editor leaves the count blank.
    fn clip_duration_frames(&self, item: &MediaItem, fps: u32) -> Result<i64, AppError> {
        let frames = self
            .scripting
            .clip_property(item, "Frames")?
            .filter(|v| !v.trim().is_empty())
            .and_then(|v| v.trim().parse::<i64>().ok());

        let duration = match frames {
            Some(frames) => frames,
            None => self
                .scripting
                .clip_property(item, "Duration")?
                .and_then(|tc| timecode_to_frames(&tc, fps))
                .ok_or_else(|| {
                    AppError::FrameResolution(format!("no usable duration for {}", item.name))
                })?,
        };
        if duration <= 0 {
            return Err(AppError::FrameResolution(format!(
                "non-positive clip duration {} for {}",
                duration, item.name
            )));
        }
        Ok(duration)
    }

    fn insert_overlay(
        &self,
        bin_name: &str,
        template_name: &str,
        text: &str,
        track_index: u32,
        record_frame: i64,
        duration: i64,
    ) -> Result<bool, AppError> {
        let bin = self.find_or_create_bin(bin_name)?;
        let Some(template) = self.find_template(&bin, template_name)? else {
            info!(
                "caption template '{}' not found in bin '{}', skipping overlay",
                template_name, bin_name
            );
            return Ok(false);
        };

        let insertion = ClipInsertion {
            media_id: template.id.clone(),
            start_frame: 0,
            end_frame: duration - 1,
            track_index,
            record_frame,
            kind: TrackKind::Video,
        };
        let Some(timeline_item) = self.scripting.append_clip(&insertion)? else {
            return Err(AppError::Editor("overlay append was refused".to_string()));
        };

        if !self.scripting.set_clip_text(&timeline_item, text)? {
            warn!("text tool not found in inserted caption clip");
        }
        Ok(true)
    }

    fn find_or_create_bin(&self, name: &str) -> Result<BinRef, AppError> {
        if let Some(bin) = self.scripting.root_bins()?.into_iter().find(|b| b.name == name) {
            return Ok(bin);
        }
        self.scripting.create_bin(name)
    }

    /// Depth-first search for the template clip, descending into subfolders.
    fn find_template(&self, bin: &BinRef, name: &str) -> Result<Option<MediaItem>, AppError> {
        if let Some(clip) = self
            .scripting
            .bin_clips(bin)?
            .into_iter()
            .find(|c| c.name == name)
        {
            return Ok(Some(clip));
        }
        for sub in self.scripting.sub_bins(bin)? {
            if let Some(clip) = self.find_template(&sub, name)? {
                return Ok(Some(clip));
            }
        }
        Ok(None)
    }

    fn log_attempt(&self, line: &str) {
        let Some(dir) = self.settings.output_dir() else {
            return;
        };
        let path = dir.join(INSERT_LOG_FILE);
        let stamped = format!("[{}] {}\n", Local::now().format("%Y-%m-%d %H:%M:%S"), line);
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(stamped.as_bytes()));
        if let Err(e) = written {
            warn!("could not write insert log {:?}: {}", path, e);
        }
    }
}

impl Drop for ResolveClient {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}
