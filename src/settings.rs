use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

/// The seven synthesis scale values. Snapshotted onto every record at creation
/// time, so changing them later never rewrites history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    #[serde(default = "default_unit_scale")]
    pub speed_scale: f64,
    #[serde(default)]
    pub pitch_scale: f64,
    #[serde(default = "default_unit_scale")]
    pub intonation_scale: f64,
    #[serde(default = "default_unit_scale")]
    pub volume_scale: f64,
    #[serde(default = "default_phoneme_length")]
    pub pre_phoneme_length: f64,
    #[serde(default = "default_phoneme_length")]
    pub post_phoneme_length: f64,
    #[serde(default = "default_unit_scale")]
    pub pause_length_scale: f64,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            speed_scale: 1.0,
            pitch_scale: 0.0,
            intonation_scale: 1.0,
            volume_scale: 1.0,
            pre_phoneme_length: 0.1,
            post_phoneme_length: 0.1,
            pause_length_scale: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisTiming {
    /// Synthesize as soon as the transcription segment arrives.
    Immediate,
    /// Create the pending record only; synthesis waits for an explicit trigger.
    OnDemand,
}

impl Default for SynthesisTiming {
    fn default() -> Self {
        SynthesisTiming::OnDemand
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResolveSettings {
    /// Command used to launch the editor scripting bridge process.
    #[serde(default)]
    pub bridge_command: Option<String>,
    #[serde(default = "default_audio_track")]
    pub audio_track: u32,
    #[serde(default = "default_video_track")]
    pub video_track: u32,
    /// Bin searched (and created if absent) for the caption template clip.
    #[serde(default)]
    pub caption_bin: Option<String>,
    /// Name of the template clip copied onto the overlay track per insertion.
    #[serde(default)]
    pub template_clip: Option<String>,
    #[serde(default = "default_connect_interval")]
    pub connect_interval_secs: u64,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            bridge_command: None,
            audio_track: default_audio_track(),
            video_track: default_video_track(),
            caption_bin: None,
            template_clip: None,
            connect_interval_secs: default_connect_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// Where audio artifacts and the record database live. Unset means the
    /// app runs in a not-yet-configured state where store operations no-op.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_engine_url")]
    pub engine_url: String,
    #[serde(default = "default_speaker_style_id")]
    pub speaker_style_id: u32,
    #[serde(default = "default_synthesis_enabled")]
    pub synthesis_enabled: bool,
    #[serde(default)]
    pub synthesis_timing: SynthesisTiming,
    #[serde(default)]
    pub params: SynthesisParams,
    #[serde(default = "default_playback_volume")]
    pub playback_volume: f32,
    #[serde(default)]
    pub resolve: ResolveSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_dir: None,
            engine_url: default_engine_url(),
            speaker_style_id: default_speaker_style_id(),
            synthesis_enabled: default_synthesis_enabled(),
            synthesis_timing: SynthesisTiming::default(),
            params: SynthesisParams::default(),
            playback_volume: default_playback_volume(),
            resolve: ResolveSettings::default(),
        }
    }
}

fn default_unit_scale() -> f64 {
    1.0
}

fn default_phoneme_length() -> f64 {
    0.1
}

fn default_engine_url() -> String {
    "http://127.0.0.1:50021".to_string()
}

fn default_speaker_style_id() -> u32 {
    1
}

fn default_synthesis_enabled() -> bool {
    true
}

fn default_playback_volume() -> f32 {
    1.0
}

fn default_audio_track() -> u32 {
    2
}

fn default_video_track() -> u32 {
    2
}

fn default_connect_interval() -> u64 {
    3
}

pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxtelop")
        .join(SETTINGS_FILE_NAME)
}

/// Settings provider handed to every component. Consumers call `get()` at the
/// point of use instead of caching fields, so a live settings change (output
/// directory in particular) takes effect on the very next operation.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn load(path: PathBuf) -> Self {
        let settings = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => {
                    let (settings, repaired) = repair_settings(value);
                    if repaired {
                        warn!("settings file had invalid fields, repaired with defaults");
                    }
                    settings
                }
                Err(e) => {
                    warn!("settings file is not valid JSON ({}), using defaults", e);
                    AppSettings::default()
                }
            },
            Err(_) => {
                info!("no settings file at {:?}, using defaults", path);
                AppSettings::default()
            }
        };

        let store = Self {
            path,
            current: RwLock::new(settings),
        };
        store.persist();
        store
    }

    #[cfg(test)]
    pub fn with_settings(path: PathBuf, settings: AppSettings) -> Self {
        Self {
            path,
            current: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> AppSettings {
        self.current.read().unwrap().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut AppSettings)) {
        {
            let mut guard = self.current.write().unwrap();
            apply(&mut guard);
        }
        self.persist();
    }

    pub fn replace(&self, settings: AppSettings) {
        *self.current.write().unwrap() = settings;
        self.persist();
    }

    /// Output directory, resolved fresh on every call. Returns None when the
    /// directory is unset or cannot be created.
    pub fn output_dir(&self) -> Option<PathBuf> {
        let dir = self.get().output_dir?;
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("output directory {:?} is unusable: {}", dir, e);
            return None;
        }
        Some(dir)
    }

    fn persist(&self) {
        let settings = self.current.read().unwrap().clone();
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("could not create settings directory {:?}: {}", parent, e);
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.path, json) {
                    warn!("could not write settings file {:?}: {}", self.path, e);
                }
            }
            Err(e) => warn!("could not serialize settings: {}", e),
        }
    }
}

/// Per-field repair: a settings file written by an older version, or edited by
/// hand, keeps every field that still validates; only the broken fields fall
/// back to their defaults.
fn repair_settings(raw: Value) -> (AppSettings, bool) {
    if let Ok(settings) = serde_json::from_value::<AppSettings>(raw.clone()) {
        return (settings, false);
    }

    let mut base = serde_json::to_value(AppSettings::default()).unwrap_or(Value::Null);
    let mut repaired = false;
    if let (Value::Object(base_map), Value::Object(loaded)) = (&mut base, raw) {
        for (key, value) in loaded {
            if !base_map.contains_key(&key) {
                continue;
            }
            let previous = base_map.insert(key.clone(), value);
            if serde_json::from_value::<AppSettings>(Value::Object(base_map.clone())).is_err() {
                if let Some(previous) = previous {
                    base_map.insert(key, previous);
                }
                repaired = true;
            }
        }
    }
    (serde_json::from_value(base).unwrap_or_default(), repaired)
}
