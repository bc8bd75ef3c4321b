//! Client for a VOICEVOX-compatible synthesis engine.
//!
//! Stateless apart from the speaker-list cache. No retry logic lives here;
//! callers decide what a failed query or synthesis means for them.

use crate::error::AppError;
use crate::settings::{SettingsStore, SynthesisParams};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sample rate forced onto every synthesis request, editor-friendly.
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mora {
    pub text: String,
    #[serde(default)]
    pub consonant: Option<String>,
    #[serde(default)]
    pub consonant_length: Option<f64>,
    #[serde(default)]
    pub vowel: Option<String>,
    #[serde(default)]
    pub vowel_length: Option<f64>,
    #[serde(default)]
    pub pitch: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccentPhrase {
    pub moras: Vec<Mora>,
    #[serde(default)]
    pub accent: i64,
    #[serde(default)]
    pub pause_mora: Option<Mora>,
    #[serde(default)]
    pub is_interrogative: bool,
}

/// Intermediate synthesis-parameter document returned by `/audio_query`.
/// The scale fields are overwritten with a record's snapshotted parameters
/// before the query is posted back to `/synthesis`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioQuery {
    pub accent_phrases: Vec<AccentPhrase>,
    #[serde(rename = "speedScale")]
    pub speed_scale: f64,
    #[serde(rename = "pitchScale")]
    pub pitch_scale: f64,
    #[serde(rename = "intonationScale")]
    pub intonation_scale: f64,
    #[serde(rename = "volumeScale")]
    pub volume_scale: f64,
    #[serde(rename = "prePhonemeLength")]
    pub pre_phoneme_length: f64,
    #[serde(rename = "postPhonemeLength")]
    pub post_phoneme_length: f64,
    #[serde(rename = "pauseLength", default)]
    pub pause_length: Option<f64>,
    #[serde(rename = "pauseLengthScale", default = "default_pause_length_scale")]
    pub pause_length_scale: f64,
    #[serde(rename = "outputSamplingRate")]
    pub output_sampling_rate: u32,
    #[serde(rename = "outputStereo")]
    pub output_stereo: bool,
    #[serde(default)]
    pub kana: Option<String>,
}

fn default_pause_length_scale() -> f64 {
    1.0
}

impl AudioQuery {
    /// Overwrite the mutable scale fields with a record's snapshot.
    pub fn apply_params(&mut self, params: &SynthesisParams) {
        self.speed_scale = params.speed_scale;
        self.pitch_scale = params.pitch_scale;
        self.intonation_scale = params.intonation_scale;
        self.volume_scale = params.volume_scale;
        self.pre_phoneme_length = params.pre_phoneme_length;
        self.post_phoneme_length = params.post_phoneme_length;
        self.pause_length_scale = params.pause_length_scale;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerStyle {
    pub name: String,
    pub id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerInfo {
    pub name: String,
    pub styles: Vec<SpeakerStyle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleInfo {
    pub speaker_name: String,
    pub style_name: String,
}

/// The gateway seam. The orchestrator only sees this trait, which keeps it
/// testable against a scripted engine.
#[async_trait]
pub trait SynthesisApi: Send + Sync {
    /// Advisory liveness probe with a short timeout. Never errors.
    async fn is_available(&self) -> bool;

    /// Speaker metadata, cached after the first successful fetch. Empty when
    /// the engine is unreachable.
    async fn speakers(&self, force_refresh: bool) -> Vec<SpeakerInfo>;

    /// Resolve a style id to its speaker/style display names, fetching the
    /// speaker list if the cache is cold.
    async fn style_info(&self, style_id: u32) -> Option<StyleInfo>;

    async fn audio_query(&self, text: &str, style_id: u32) -> Result<AudioQuery, AppError>;

    /// Raw WAV bytes for a query. The output sample rate and stereo flag are
    /// forced before the request goes out.
    async fn synthesize(&self, query: &AudioQuery, style_id: u32) -> Result<Vec<u8>, AppError>;
}

pub struct VoicevoxClient {
    settings: Arc<SettingsStore>,
    http: reqwest::Client,
    speaker_cache: Mutex<Option<Vec<SpeakerInfo>>>,
}

impl VoicevoxClient {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            speaker_cache: Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        self.settings.get().engine_url.trim_end_matches('/').to_string()
    }

    async fn fetch_speakers(&self) -> Result<Vec<SpeakerInfo>, AppError> {
        let url = format!("{}/speakers", self.base_url());
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "GET /speakers returned {}",
                response.status()
            )));
        }
        response
            .json::<Vec<SpeakerInfo>>()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))
    }
}

#[async_trait]
impl SynthesisApi for VoicevoxClient {
    async fn is_available(&self) -> bool {
        let url = format!("{}/version", self.base_url());
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("engine liveness probe failed: {}", e);
                false
            }
        }
    }

    async fn speakers(&self, force_refresh: bool) -> Vec<SpeakerInfo> {
        if !force_refresh {
            if let Some(cached) = self.speaker_cache.lock().unwrap().clone() {
                return cached;
            }
        }
        match self.fetch_speakers().await {
            Ok(speakers) => {
                *self.speaker_cache.lock().unwrap() = Some(speakers.clone());
                speakers
            }
            Err(e) => {
                warn!("could not fetch speaker list: {}", e);
                Vec::new()
            }
        }
    }

    async fn style_info(&self, style_id: u32) -> Option<StyleInfo> {
        let speakers = self.speakers(false).await;
        for speaker in &speakers {
            for style in &speaker.styles {
                if style.id == style_id {
                    return Some(StyleInfo {
                        speaker_name: speaker.name.clone(),
                        style_name: style.name.clone(),
                    });
                }
            }
        }
        None
    }

    async fn audio_query(&self, text: &str, style_id: u32) -> Result<AudioQuery, AppError> {
        let url = format!("{}/audio_query", self.base_url());
        let response = self
            .http
            .post(&url)
            .query(&[("text", text), ("speaker", &style_id.to_string())])
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::Synthesis(format!(
                "audio_query returned {}",
                response.status()
            )));
        }
        response
            .json::<AudioQuery>()
            .await
            .map_err(|e| AppError::Synthesis(format!("bad audio_query response: {}", e)))
    }

    async fn synthesize(&self, query: &AudioQuery, style_id: u32) -> Result<Vec<u8>, AppError> {
        let mut query = query.clone();
        query.output_sampling_rate = OUTPUT_SAMPLE_RATE;
        query.output_stereo = true;

        let url = format!("{}/synthesis", self.base_url());
        let response = self
            .http
            .post(&url)
            .query(&[("speaker", style_id.to_string())])
            .json(&query)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::Synthesis(format!(
                "synthesis returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Synthesis(format!("could not read audio body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}
