//! Synthesis orchestrator: turns incoming transcription segments into store
//! records, synthesizes audio for them (immediately or on demand), and keeps
//! the in-memory log mirror that the UI reads.
//!
//! The store stays authoritative; the mirror is a bounded display cache that
//! is rebuilt from the store on startup and patched on every mutation.

use crate::audio_naming::generate_filename;
use crate::error::AppError;
use crate::events::{EventBroadcaster, EVENT_LOG_UPDATE};
use crate::managers::history::{HistoryManager, TranscriptionRecord};
use crate::settings::{SettingsStore, SynthesisTiming};
use crate::voicevox::{AudioQuery, SynthesisApi};
use chrono::Local;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Display cap for the in-memory log mirror.
pub const MIRROR_CAP: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionEvent {
    pub text: String,
    /// Segment start in milliseconds, fallback duration estimate only.
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub end: Option<f64>,
}

impl TranscriptionEvent {
    fn duration_estimate(&self) -> Option<f64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => Some((end - start) / 1000.0),
            _ => None,
        }
    }
}

/// Lightweight projection of a record, kept for live display.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub time: String,
    pub text: String,
    pub speaker: String,
    pub filename: Option<String>,
    pub duration: f64,
    pub pending: bool,
}

/// One phoneme onset on the synthesized clip's local timeline, seconds
/// rounded to millisecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeTiming {
    pub time: f64,
    pub phoneme: String,
}

pub struct SynthesisOrchestrator {
    settings: Arc<SettingsStore>,
    history: Arc<HistoryManager>,
    gateway: Arc<dyn SynthesisApi>,
    events: Arc<EventBroadcaster>,
    mirror: Mutex<Vec<LogEntry>>,
    /// Per-record guards serializing check-then-synthesize-then-store and the
    /// mutations that can race it, so a record is synthesized at most once
    /// and never completed with audio for text it no longer has.
    record_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl SynthesisOrchestrator {
    pub fn new(
        settings: Arc<SettingsStore>,
        history: Arc<HistoryManager>,
        gateway: Arc<dyn SynthesisApi>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        let orchestrator = Self {
            settings,
            history,
            gateway,
            events,
            mirror: Mutex::new(Vec::new()),
            record_locks: Mutex::new(HashMap::new()),
        };
        orchestrator.reload_history();
        orchestrator
    }

    /// Entry point for the transcription stream. Returns the new record id,
    /// or None when synthesis is globally disabled (log only, no record).
    pub async fn on_transcription(
        &self,
        event: TranscriptionEvent,
    ) -> Result<Option<i64>, AppError> {
        let text = event.text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::Validation("text must not be empty".to_string()));
        }

        let settings = self.settings.get();
        if !settings.synthesis_enabled {
            info!("synthesis disabled, segment logged only: {}", text);
            return Ok(None);
        }

        // Snapshot the current parameters and speaker display now; later
        // settings changes must not touch this record.
        let style_id = settings.speaker_style_id;
        let style = self.gateway.style_info(style_id).await;
        let (speaker_name, style_name) = match style {
            Some(info) => (info.speaker_name, info.style_name),
            None => ("unknown".to_string(), String::new()),
        };

        let Some(id) = self.history.create(
            &text,
            style_id,
            &speaker_name,
            &style_name,
            &settings.params,
        ) else {
            warn!("record store unavailable, segment dropped: {}", text);
            return Ok(None);
        };

        self.mirror_push(LogEntry {
            id,
            time: Local::now().format("%H:%M:%S").to_string(),
            text: text.clone(),
            speaker: display_speaker(&speaker_name, &style_name),
            filename: None,
            duration: -1.0,
            pending: true,
        });
        self.publish_log_update();

        if settings.synthesis_timing == SynthesisTiming::Immediate {
            self.synthesize_record(id, event.duration_estimate()).await?;
        }
        Ok(Some(id))
    }

    /// Explicit trigger for a pending record.
    pub async fn synthesize_now(&self, id: i64) -> Result<(String, f64), AppError> {
        self.synthesize_record(id, None).await
    }

    async fn synthesize_record(
        &self,
        id: i64,
        duration_estimate: Option<f64>,
    ) -> Result<(String, f64), AppError> {
        let guard = self.record_lock(id);
        let _held = guard.lock().await;

        let record = self.history.get(id).ok_or(AppError::NotFound(id))?;

        // Idempotent per record: a completed record returns the stored result
        // without touching the engine again.
        if record.duration > 0.0 {
            if let Some(path) = record.output_path.clone() {
                debug!("record {} already synthesized, reusing {}", id, path);
                return Ok((path, record.duration));
            }
        }

        let mut query = self
            .gateway
            .audio_query(&record.text, record.speaker_style_id)
            .await?;
        query.apply_params(&record.params);

        // Extract timing before synthesis; the engine call consumes the query
        // semantically (scales are final at this point).
        let phonemes = extract_phonemes(&query);
        let kana = query.kana.clone();

        let audio = self
            .gateway
            .synthesize(&query, record.speaker_style_id)
            .await?;

        let filename = generate_filename(id, &record.text, record.speaker_style_id, &record.params);
        let out_dir = self.settings.output_dir().ok_or(AppError::OutputDirUnset)?;
        let path = out_dir.join(&filename);
        std::fs::write(&path, &audio)?;

        // Measured from the written audio; the transcript's end-start delta is
        // only an estimate and a WAV we just wrote is the ground truth.
        let duration = wav_duration_secs(&audio)
            .or(duration_estimate)
            .unwrap_or(0.0);

        let phonemes_json = serde_json::to_string(&phonemes).ok();
        let path_str = path.to_string_lossy().to_string();

        // Store update is deliberately the last effectful step: a crash before
        // this line leaves an orphan file, never an inconsistent record.
        self.history.update_audio_info(
            id,
            &path_str,
            duration,
            kana.as_deref(),
            phonemes_json.as_deref(),
        );

        self.mirror_patch(id, |entry| {
            entry.filename = Some(filename.clone());
            entry.duration = duration;
            entry.pending = false;
        });
        self.publish_log_update();

        info!("synthesized record {} ({:.2}s) -> {}", id, duration, path_str);
        Ok((path_str, duration))
    }

    /// Replace a record's text: the store resets it to pending and the old
    /// audio artifact (if it was a real file) is removed from disk.
    pub async fn update_text(&self, id: i64, new_text: &str) -> Result<(), AppError> {
        let text = new_text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("text must not be empty".to_string()));
        }

        // Wait out any in-flight synthesis of this record before resetting it.
        let guard = self.record_lock(id);
        let _held = guard.lock().await;

        let record = self.history.get(id).ok_or(AppError::NotFound(id))?;
        let old_path = record.output_path.clone();

        if !self.history.update_text(id, text) {
            return Err(AppError::NotFound(id));
        }

        if let Some(old) = old_path {
            remove_artifact(&old);
        }

        let text = text.to_string();
        self.mirror_patch(id, |entry| {
            entry.text = text.clone();
            entry.filename = None;
            entry.duration = -1.0;
            entry.pending = true;
        });
        self.publish_log_update();
        Ok(())
    }

    /// Remove a record, its mirror entry and its audio artifact. Returns the
    /// filename that disappeared from the mirror, if there was one.
    pub async fn delete(&self, id: i64) -> Result<Option<String>, AppError> {
        let guard = self.record_lock(id);
        let _held = guard.lock().await;

        let record = self.history.get(id).ok_or(AppError::NotFound(id))?;

        let removed_filename = {
            let mirror = self.mirror.lock().unwrap();
            mirror
                .iter()
                .find(|e| e.id == id)
                .and_then(|e| e.filename.clone())
        };

        if let Some(path) = &record.output_path {
            remove_artifact(path);
        }
        self.history.delete(id);

        self.mirror.lock().unwrap().retain(|e| e.id != id);
        self.record_locks.lock().unwrap().remove(&id);
        self.publish_log_update();
        Ok(removed_filename)
    }

    /// Rebuild the mirror from the store's newest records, oldest first. A
    /// record claiming an audio file that no longer exists is reset to
    /// pending in the store, healing out-of-band deletions.
    pub fn reload_history(&self) {
        let mut records = self.history.recent(MIRROR_CAP);
        records.reverse();

        let mut entries = Vec::with_capacity(records.len());
        for mut record in records {
            if record.is_complete() {
                let exists = record
                    .output_path
                    .as_deref()
                    .map(|p| Path::new(p).exists())
                    .unwrap_or(false);
                if !exists {
                    warn!(
                        "record {} claims an audio file that is missing, resetting to pending",
                        record.id
                    );
                    self.history.reset_pending(record.id);
                    record.output_path = None;
                    record.duration = -1.0;
                }
            }
            entries.push(record_to_entry(&record));
        }

        *self.mirror.lock().unwrap() = entries;
        self.publish_log_update();
    }

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.mirror.lock().unwrap().clone()
    }

    fn record_lock(&self, id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.record_locks
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .clone()
    }

    fn mirror_push(&self, entry: LogEntry) {
        let mut mirror = self.mirror.lock().unwrap();
        mirror.push(entry);
        while mirror.len() > MIRROR_CAP {
            mirror.remove(0);
        }
    }

    fn mirror_patch(&self, id: i64, apply: impl FnMut(&mut LogEntry)) {
        let mut apply = apply;
        let mut mirror = self.mirror.lock().unwrap();
        if let Some(entry) = mirror.iter_mut().find(|e| e.id == id) {
            apply(entry);
        }
    }

    fn publish_log_update(&self) {
        let entries = self.log_entries();
        self.events
            .publish(EVENT_LOG_UPDATE, json!({ "entries": entries }));
    }
}

fn display_speaker(speaker_name: &str, style_name: &str) -> String {
    if style_name.is_empty() {
        speaker_name.to_string()
    } else {
        format!("{} ({})", speaker_name, style_name)
    }
}

fn record_to_entry(record: &TranscriptionRecord) -> LogEntry {
    let filename = record
        .output_path
        .as_deref()
        .and_then(|p| Path::new(p).file_name().map(|f| f.to_string_lossy().to_string()));
    LogEntry {
        id: record.id,
        time: record
            .created_at
            .get(11..19)
            .unwrap_or(&record.created_at)
            .to_string(),
        text: record.text.clone(),
        speaker: display_speaker(&record.speaker_name, &record.style_name),
        filename,
        duration: record.duration,
        pending: !record.is_complete(),
    }
}

/// A path is only deleted if it points at a real file; placeholder markers
/// from older stores are left alone.
fn remove_artifact(path: &str) {
    if path.is_empty() || path == "-" {
        return;
    }
    let p = Path::new(path);
    if p.is_file() {
        if let Err(e) = std::fs::remove_file(p) {
            warn!("could not remove audio artifact {}: {}", path, e);
        }
    }
}

fn wav_duration_secs(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Walk the accent-phrase tree and reconstruct the phoneme onset timeline.
/// The clock starts at the pre-phoneme padding; every segment advances it by
/// its length divided by the speed scale, and each phrase's pause mora
/// additionally scales by the pause-length scale. A structurally anomalous
/// query yields an empty timeline rather than an error.
pub fn extract_phonemes(query: &AudioQuery) -> Vec<PhonemeTiming> {
    fn walk(query: &AudioQuery) -> Option<Vec<PhonemeTiming>> {
        let speed = query.speed_scale;
        if !(speed > 0.0) {
            return None;
        }

        let mut clock = query.pre_phoneme_length;
        let mut timeline = Vec::new();
        for phrase in &query.accent_phrases {
            for mora in &phrase.moras {
                if let Some(consonant) = &mora.consonant {
                    let length = mora.consonant_length?;
                    timeline.push(PhonemeTiming {
                        time: round_ms(clock),
                        phoneme: consonant.clone(),
                    });
                    clock += length / speed;
                }
                if let Some(vowel) = &mora.vowel {
                    let length = mora.vowel_length?;
                    timeline.push(PhonemeTiming {
                        time: round_ms(clock),
                        phoneme: vowel.clone(),
                    });
                    clock += length / speed;
                }
            }
            if let Some(pause) = &phrase.pause_mora {
                let length = pause.vowel_length?;
                clock += length / speed * query.pause_length_scale;
            }
        }
        Some(timeline)
    }

    walk(query).unwrap_or_default()
}

fn round_ms(t: f64) -> f64 {
    (t * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{AppSettings, SynthesisParams};
    use crate::voicevox::{SpeakerInfo, SpeakerStyle, StyleInfo};
    use async_trait::async_trait;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn wav_bytes(samples: usize) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut buffer, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        buffer.into_inner()
    }

    fn test_query(json: &str) -> AudioQuery {
        serde_json::from_str(json).unwrap()
    }

    fn simple_query() -> AudioQuery {
        test_query(
            r#"{
                "accent_phrases": [{
                    "moras": [
                        {"text": "カ", "consonant": "k", "consonant_length": 0.1,
                         "vowel": "a", "vowel_length": 0.2, "pitch": 5.0},
                        {"text": "ア", "consonant": null, "consonant_length": null,
                         "vowel": "a", "vowel_length": 0.3, "pitch": 5.0}
                    ],
                    "accent": 1,
                    "pause_mora": {"text": "、", "consonant": null, "consonant_length": null,
                                   "vowel": "pau", "vowel_length": 0.4, "pitch": 0.0},
                    "is_interrogative": false
                }],
                "speedScale": 2.0, "pitchScale": 0.0, "intonationScale": 1.0,
                "volumeScale": 1.0, "prePhonemeLength": 0.1, "postPhonemeLength": 0.1,
                "pauseLengthScale": 0.5,
                "outputSamplingRate": 24000, "outputStereo": false, "kana": "カア"
            }"#,
        )
    }

    /// Scripted engine that counts remote calls.
    struct MockEngine {
        query_calls: AtomicUsize,
        synth_calls: AtomicUsize,
        audio: Vec<u8>,
        fail_synthesis: bool,
    }

    impl MockEngine {
        fn new() -> Self {
            // 24000 samples at 48 kHz = 0.5 s of audio.
            Self {
                query_calls: AtomicUsize::new(0),
                synth_calls: AtomicUsize::new(0),
                audio: wav_bytes(24_000),
                fail_synthesis: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_synthesis: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl SynthesisApi for MockEngine {
        async fn is_available(&self) -> bool {
            true
        }

        async fn speakers(&self, _force_refresh: bool) -> Vec<SpeakerInfo> {
            vec![SpeakerInfo {
                name: "Zundamon".to_string(),
                styles: vec![SpeakerStyle {
                    name: "Normal".to_string(),
                    id: 3,
                }],
            }]
        }

        async fn style_info(&self, style_id: u32) -> Option<StyleInfo> {
            (style_id == 3).then(|| StyleInfo {
                speaker_name: "Zundamon".to_string(),
                style_name: "Normal".to_string(),
            })
        }

        async fn audio_query(&self, _text: &str, _style_id: u32) -> Result<AudioQuery, AppError> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(simple_query())
        }

        async fn synthesize(
            &self,
            _query: &AudioQuery,
            _style_id: u32,
        ) -> Result<Vec<u8>, AppError> {
            if self.fail_synthesis {
                return Err(AppError::UpstreamUnavailable("engine down".to_string()));
            }
            self.synth_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.audio.clone())
        }
    }

    struct Fixture {
        _dir: TempDir,
        orchestrator: SynthesisOrchestrator,
        engine: Arc<MockEngine>,
        history: Arc<HistoryManager>,
        settings: Arc<SettingsStore>,
    }

    fn fixture_with(engine: MockEngine, timing: SynthesisTiming) -> Fixture {
        let dir = TempDir::new().unwrap();
        let settings = Arc::new(SettingsStore::with_settings(
            dir.path().join("settings.json"),
            AppSettings {
                output_dir: Some(dir.path().to_path_buf()),
                speaker_style_id: 3,
                synthesis_timing: timing,
                ..AppSettings::default()
            },
        ));
        let history = Arc::new(HistoryManager::new(settings.clone()));
        let engine = Arc::new(engine);
        let orchestrator = SynthesisOrchestrator::new(
            settings.clone(),
            history.clone(),
            engine.clone() as Arc<dyn SynthesisApi>,
            Arc::new(EventBroadcaster::new()),
        );
        Fixture {
            _dir: dir,
            orchestrator,
            engine,
            history,
            settings,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockEngine::new(), SynthesisTiming::OnDemand)
    }

    #[tokio::test]
    async fn transcription_creates_pending_record() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "こんにちは".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();

        let record = fx.history.get(id).unwrap();
        assert!(!record.is_complete());
        assert_eq!(record.speaker_name, "Zundamon");
        assert_eq!(record.style_name, "Normal");

        let entries = fx.orchestrator.log_entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].pending);
        assert_eq!(fx.engine.synth_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn synthesis_disabled_creates_no_record() {
        let fx = fixture();
        fx.settings.update(|s| s.synthesis_enabled = false);
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "ignored".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap();
        assert!(id.is_none());
        assert!(fx.history.recent(10).is_empty());
    }

    #[tokio::test]
    async fn immediate_mode_synthesizes_synchronously() {
        let fx = fixture_with(MockEngine::new(), SynthesisTiming::Immediate);
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "hello".to_string(),
                start: Some(0.0),
                end: Some(1200.0),
            })
            .await
            .unwrap()
            .unwrap();

        let record = fx.history.get(id).unwrap();
        assert!(record.is_complete());
        assert!((record.duration - 0.5).abs() < 1e-9);
        assert!(Path::new(record.output_path.as_deref().unwrap()).exists());
        assert_eq!(fx.engine.synth_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn synthesize_now_is_at_most_once_per_record() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "Hello".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();

        let first = fx.orchestrator.synthesize_now(id).await.unwrap();
        assert!(first.1 > 0.0);
        assert!(Path::new(&first.0).exists());

        let second = fx.orchestrator.synthesize_now(id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.engine.synth_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.engine.query_calls.load(Ordering::SeqCst), 1);
    }

    /// Engine whose synthesize call parks until the test releases it, for
    /// exercising what happens while a synthesis is in flight.
    struct GatedEngine {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        audio: Vec<u8>,
    }

    impl GatedEngine {
        fn new() -> Self {
            Self {
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
                audio: wav_bytes(24_000),
            }
        }
    }

    #[async_trait]
    impl SynthesisApi for GatedEngine {
        async fn is_available(&self) -> bool {
            true
        }

        async fn speakers(&self, _force_refresh: bool) -> Vec<SpeakerInfo> {
            Vec::new()
        }

        async fn style_info(&self, _style_id: u32) -> Option<StyleInfo> {
            None
        }

        async fn audio_query(&self, _text: &str, _style_id: u32) -> Result<AudioQuery, AppError> {
            Ok(simple_query())
        }

        async fn synthesize(
            &self,
            _query: &AudioQuery,
            _style_id: u32,
        ) -> Result<Vec<u8>, AppError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(self.audio.clone())
        }
    }

    #[tokio::test]
    async fn text_edit_waits_for_in_flight_synthesis() {
        let dir = TempDir::new().unwrap();
        let settings = Arc::new(SettingsStore::with_settings(
            dir.path().join("settings.json"),
            AppSettings {
                output_dir: Some(dir.path().to_path_buf()),
                ..AppSettings::default()
            },
        ));
        let history = Arc::new(HistoryManager::new(settings.clone()));
        let engine = Arc::new(GatedEngine::new());
        let orchestrator = Arc::new(SynthesisOrchestrator::new(
            settings,
            history.clone(),
            engine.clone() as Arc<dyn SynthesisApi>,
            Arc::new(EventBroadcaster::new()),
        ));

        let id = orchestrator
            .on_transcription(TranscriptionEvent {
                text: "before".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();

        let synth = {
            let orch = orchestrator.clone();
            tokio::spawn(async move { orch.synthesize_now(id).await })
        };
        engine.entered.notified().await;

        let edit = {
            let orch = orchestrator.clone();
            tokio::spawn(async move { orch.update_text(id, "after").await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // The edit is parked behind the record lock while synthesis runs, so
        // the store still holds the pre-edit text.
        assert_eq!(history.get(id).unwrap().text, "before");

        engine.release.notify_one();
        let (path, _) = synth.await.unwrap().unwrap();
        edit.await.unwrap().unwrap();

        // Synthesis completed first with the old text, then the edit reset
        // the record and unlinked that audio file.
        let record = history.get(id).unwrap();
        assert_eq!(record.text, "after");
        assert!(!record.is_complete());
        assert!(record.output_path.is_none());
        assert!(!Path::new(&path).exists());
    }

    #[tokio::test]
    async fn failed_synthesis_leaves_record_pending() {
        let fx = fixture_with(MockEngine::failing(), SynthesisTiming::OnDemand);
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "boom".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();

        let err = fx.orchestrator.synthesize_now(id).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));

        let record = fx.history.get(id).unwrap();
        assert!(!record.is_complete());
        assert!(record.output_path.is_none());
        assert!(record.kana.is_none());
    }

    #[tokio::test]
    async fn synthesize_unknown_record_is_not_found() {
        let fx = fixture();
        let err = fx.orchestrator.synthesize_now(999).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(999)));
    }

    #[tokio::test]
    async fn update_text_resets_record_and_removes_file() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "before".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();
        let (path, _) = fx.orchestrator.synthesize_now(id).await.unwrap();
        assert!(Path::new(&path).exists());

        fx.orchestrator.update_text(id, "after").await.unwrap();

        let record = fx.history.get(id).unwrap();
        assert_eq!(record.text, "after");
        assert!(!record.is_complete());
        assert!(!Path::new(&path).exists());

        let entries = fx.orchestrator.log_entries();
        assert!(entries[0].pending);
        assert_eq!(entries[0].text, "after");
    }

    #[tokio::test]
    async fn delete_returns_filename_and_removes_artifact() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "bye".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();
        let (path, _) = fx.orchestrator.synthesize_now(id).await.unwrap();

        let removed = fx.orchestrator.delete(id).await.unwrap();
        assert!(removed.is_some());
        assert!(!Path::new(&path).exists());
        assert!(fx.history.get(id).is_none());
        assert!(fx.orchestrator.log_entries().is_empty());

        let err = fx.orchestrator.delete(id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn reload_resets_missing_files() {
        let fx = fixture();
        let id = fx
            .orchestrator
            .on_transcription(TranscriptionEvent {
                text: "vanishing".to_string(),
                start: None,
                end: None,
            })
            .await
            .unwrap()
            .unwrap();
        let (path, _) = fx.orchestrator.synthesize_now(id).await.unwrap();

        // Out-of-band deletion of the audio artifact.
        std::fs::remove_file(&path).unwrap();
        fx.orchestrator.reload_history();

        let record = fx.history.get(id).unwrap();
        assert!(!record.is_complete());
        let entries = fx.orchestrator.log_entries();
        assert!(entries[0].pending);
    }

    #[tokio::test]
    async fn mirror_evicts_oldest_beyond_cap() {
        let fx = fixture();
        for i in 0..(MIRROR_CAP + 3) {
            fx.orchestrator
                .on_transcription(TranscriptionEvent {
                    text: format!("segment {}", i),
                    start: None,
                    end: None,
                })
                .await
                .unwrap();
        }

        let entries = fx.orchestrator.log_entries();
        assert_eq!(entries.len(), MIRROR_CAP);
        assert_eq!(entries[0].text, "segment 3");
        assert_eq!(entries[MIRROR_CAP - 1].text, format!("segment {}", MIRROR_CAP + 2));

        // The store keeps everything; only the display mirror is bounded.
        assert_eq!(fx.history.recent(100).len(), MIRROR_CAP + 3);
    }

    #[tokio::test]
    async fn reload_is_oldest_first() {
        let fx = fixture();
        for text in ["one", "two", "three"] {
            fx.orchestrator
                .on_transcription(TranscriptionEvent {
                    text: text.to_string(),
                    start: None,
                    end: None,
                })
                .await
                .unwrap();
        }
        fx.orchestrator.reload_history();
        let entries = fx.orchestrator.log_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "one");
        assert_eq!(entries[2].text, "three");
    }

    #[test]
    fn phoneme_timeline_math() {
        let timeline = extract_phonemes(&simple_query());
        // speed 2.0: clock starts at 0.1 (pre-phoneme); k at 0.1 then +0.05,
        // a at 0.15 then +0.1, second a at 0.25.
        assert_eq!(
            timeline,
            vec![
                PhonemeTiming {
                    time: 0.1,
                    phoneme: "k".to_string()
                },
                PhonemeTiming {
                    time: 0.15,
                    phoneme: "a".to_string()
                },
                PhonemeTiming {
                    time: 0.25,
                    phoneme: "a".to_string()
                },
            ]
        );
    }

    #[test]
    fn pause_mora_advances_scaled_clock() {
        let mut query = simple_query();
        let phrase = query.accent_phrases[0].clone();
        query.accent_phrases.push(phrase);
        let timeline = extract_phonemes(&query);
        // After phrase 1 the clock is 0.25 + 0.3/2 = 0.4, plus the pause
        // 0.4/2 * 0.5 = 0.1, so phrase 2 opens at 0.5.
        assert_eq!(timeline[3].time, 0.5);
        assert_eq!(timeline[3].phoneme, "k");
    }

    #[test]
    fn malformed_query_yields_empty_timeline() {
        let mut query = simple_query();
        query.accent_phrases[0].moras[0].consonant_length = None;
        assert!(extract_phonemes(&query).is_empty());

        let mut query = simple_query();
        query.speed_scale = 0.0;
        assert!(extract_phonemes(&query).is_empty());
    }
}
