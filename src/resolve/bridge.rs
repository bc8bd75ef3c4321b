//! Editor scripting bridge.
//!
//! The editor's scripting interface is an untyped remote object model living
//! in another process. Everything this app needs from it is pinned down to
//! the narrow [`EditorScripting`] trait; the JSON-over-stdio bridge process
//! behind [`BridgeEditorApi`] is the only place the untyped API leaks in.

use crate::error::AppError;
use crate::settings::SettingsStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};

/// A media pool item, by bridge-side handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub name: String,
}

/// A media pool bin (folder), by bridge-side handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineInfo {
    /// Raw frame-rate value as the editor reports it ("29.97", "25", ...).
    pub frame_rate: String,
    /// Current playhead timecode.
    pub playhead: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One timeline append: which media, which source frame span, where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipInsertion {
    pub media_id: String,
    pub start_frame: i64,
    pub end_frame: i64,
    pub track_index: u32,
    /// Destination frame on the timeline (the playhead at insertion time).
    pub record_frame: i64,
    pub kind: TrackKind,
}

/// The operations this app needs from the editor, nothing more.
pub trait EditorScripting: Send + Sync {
    /// Editor process + scripting module reachable, project and timeline open.
    fn probe(&self) -> Result<(), AppError>;

    /// Import a media file into the pool; None when the import yields no item.
    fn import_media(&self, path: &str) -> Result<Option<MediaItem>, AppError>;

    fn timeline_info(&self) -> Result<TimelineInfo, AppError>;

    /// A named property of a pool item ("Frames", "Duration", ...); None or
    /// empty string when the editor leaves it blank.
    fn clip_property(&self, item: &MediaItem, key: &str) -> Result<Option<String>, AppError>;

    /// Append a clip; returns the new timeline item's handle, or None when
    /// the editor refused the append.
    fn append_clip(&self, insertion: &ClipInsertion) -> Result<Option<String>, AppError>;

    fn root_bins(&self) -> Result<Vec<BinRef>, AppError>;

    fn create_bin(&self, name: &str) -> Result<BinRef, AppError>;

    fn sub_bins(&self, bin: &BinRef) -> Result<Vec<BinRef>, AppError>;

    fn bin_clips(&self, bin: &BinRef) -> Result<Vec<MediaItem>, AppError>;

    /// Set the text content of the text tool inside an inserted clip's
    /// composition.
    fn set_clip_text(&self, timeline_item: &str, text: &str) -> Result<bool, AppError>;
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest<'a> {
    Probe,
    ImportMedia { path: &'a str },
    TimelineInfo,
    ClipProperty { item: &'a str, key: &'a str },
    AppendClip { insertion: &'a ClipInsertion },
    RootBins,
    CreateBin { name: &'a str },
    SubBins { bin: &'a str },
    BinClips { bin: &'a str },
    SetClipText { item: &'a str, text: &'a str },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeResponse {
    Ok,
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    Item {
        item: Option<MediaItem>,
    },
    Timeline {
        frame_rate: String,
        playhead: String,
    },
    Property {
        value: Option<String>,
    },
    Appended {
        item: Option<String>,
    },
    Bins {
        bins: Vec<BinRef>,
    },
    Bin {
        bin: BinRef,
    },
    Clips {
        clips: Vec<MediaItem>,
    },
    Set {
        ok: bool,
    },
}

struct BridgeProcess {
    child: Child,
}

impl BridgeProcess {
    fn spawn(command: &str) -> Result<Self, String> {
        info!("spawning editor bridge: {}", command);
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or_else(|| "empty bridge command".to_string())?;
        let child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| format!("failed to spawn editor bridge: {}", e))?;
        Ok(Self { child })
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn send(&mut self, request: &BridgeRequest) -> Result<BridgeResponse, String> {
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| "bridge stdin not available".to_string())?;
        let json = serde_json::to_string(request)
            .map_err(|e| format!("failed to serialize bridge request: {}", e))?;
        writeln!(stdin, "{}", json).map_err(|e| format!("failed to write to bridge: {}", e))?;
        stdin
            .flush()
            .map_err(|e| format!("failed to flush bridge stdin: {}", e))?;

        let stdout = self
            .child
            .stdout
            .as_mut()
            .ok_or_else(|| "bridge stdout not available".to_string())?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|e| format!("failed to read bridge response: {}", e))?;
        if line.trim().is_empty() {
            return Err("bridge returned empty response (may have crashed)".to_string());
        }
        serde_json::from_str(&line).map_err(|e| format!("invalid bridge response: {}", e))
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("error stopping editor bridge: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for BridgeProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The real bridge-backed implementation. The process is spawned lazily from
/// the configured command and respawned when a call finds it dead.
pub struct BridgeEditorApi {
    settings: Arc<SettingsStore>,
    process: Mutex<Option<BridgeProcess>>,
}

impl BridgeEditorApi {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            process: Mutex::new(None),
        }
    }

    fn call(&self, request: BridgeRequest) -> Result<BridgeResponse, AppError> {
        let mut guard = self.process.lock().unwrap();

        let needs_spawn = match guard.as_mut() {
            Some(process) => !process.is_alive(),
            None => true,
        };
        if needs_spawn {
            if guard.take().is_some() {
                warn!("editor bridge exited, respawning");
            }
            let command = self
                .settings
                .get()
                .resolve
                .bridge_command
                .ok_or(AppError::EditorNotConnected)?;
            match BridgeProcess::spawn(&command) {
                Ok(process) => *guard = Some(process),
                Err(e) => {
                    warn!("{}", e);
                    return Err(AppError::EditorNotConnected);
                }
            }
        }

        let process = guard.as_mut().ok_or(AppError::EditorNotConnected)?;
        let response = process.send(&request).map_err(|e| {
            warn!("bridge call failed: {}", e);
            AppError::EditorNotConnected
        })?;
        match response {
            BridgeResponse::Error { message, code } => Err(bridge_error(message, code)),
            other => Ok(other),
        }
    }
}

fn bridge_error(message: String, code: Option<String>) -> AppError {
    match code.as_deref() {
        Some("no_project") | Some("no_timeline") => AppError::EditorNoProjectOrTimeline,
        Some("not_connected") => AppError::EditorNotConnected,
        _ => AppError::Editor(message),
    }
}

fn unexpected(what: &str) -> AppError {
    AppError::Editor(format!("unexpected bridge response to {}", what))
}

impl EditorScripting for BridgeEditorApi {
    fn probe(&self) -> Result<(), AppError> {
        match self.call(BridgeRequest::Probe)? {
            BridgeResponse::Ok => Ok(()),
            _ => Err(unexpected("probe")),
        }
    }

    fn import_media(&self, path: &str) -> Result<Option<MediaItem>, AppError> {
        match self.call(BridgeRequest::ImportMedia { path })? {
            BridgeResponse::Item { item } => Ok(item),
            _ => Err(unexpected("import_media")),
        }
    }

    fn timeline_info(&self) -> Result<TimelineInfo, AppError> {
        match self.call(BridgeRequest::TimelineInfo)? {
            BridgeResponse::Timeline {
                frame_rate,
                playhead,
            } => Ok(TimelineInfo {
                frame_rate,
                playhead,
            }),
            _ => Err(unexpected("timeline_info")),
        }
    }

    fn clip_property(&self, item: &MediaItem, key: &str) -> Result<Option<String>, AppError> {
        match self.call(BridgeRequest::ClipProperty { item: &item.id, key })? {
            BridgeResponse::Property { value } => Ok(value),
            _ => Err(unexpected("clip_property")),
        }
    }

    fn append_clip(&self, insertion: &ClipInsertion) -> Result<Option<String>, AppError> {
        match self.call(BridgeRequest::AppendClip { insertion })? {
            BridgeResponse::Appended { item } => Ok(item),
            _ => Err(unexpected("append_clip")),
        }
    }

    fn root_bins(&self) -> Result<Vec<BinRef>, AppError> {
        match self.call(BridgeRequest::RootBins)? {
            BridgeResponse::Bins { bins } => Ok(bins),
            _ => Err(unexpected("root_bins")),
        }
    }

    fn create_bin(&self, name: &str) -> Result<BinRef, AppError> {
        match self.call(BridgeRequest::CreateBin { name })? {
            BridgeResponse::Bin { bin } => Ok(bin),
            _ => Err(unexpected("create_bin")),
        }
    }

    fn sub_bins(&self, bin: &BinRef) -> Result<Vec<BinRef>, AppError> {
        match self.call(BridgeRequest::SubBins { bin: &bin.id })? {
            BridgeResponse::Bins { bins } => Ok(bins),
            _ => Err(unexpected("sub_bins")),
        }
    }

    fn bin_clips(&self, bin: &BinRef) -> Result<Vec<MediaItem>, AppError> {
        match self.call(BridgeRequest::BinClips { bin: &bin.id })? {
            BridgeResponse::Clips { clips } => Ok(clips),
            _ => Err(unexpected("bin_clips")),
        }
    }

    fn set_clip_text(&self, timeline_item: &str, text: &str) -> Result<bool, AppError> {
        match self.call(BridgeRequest::SetClipText {
            item: timeline_item,
            text,
        })? {
            BridgeResponse::Set { ok } => Ok(ok),
            _ => Err(unexpected("set_clip_text")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_serialize_with_op_tags() {
        let json = serde_json::to_value(BridgeRequest::ImportMedia { path: "/tmp/a.wav" }).unwrap();
        assert_eq!(json["op"], "import_media");
        assert_eq!(json["path"], "/tmp/a.wav");

        let insertion = ClipInsertion {
            media_id: "m1".to_string(),
            start_frame: 0,
            end_frame: 47,
            track_index: 2,
            record_frame: 1800,
            kind: TrackKind::Audio,
        };
        let json = serde_json::to_value(BridgeRequest::AppendClip {
            insertion: &insertion,
        })
        .unwrap();
        assert_eq!(json["op"], "append_clip");
        assert_eq!(json["insertion"]["kind"], "audio");
        assert_eq!(json["insertion"]["record_frame"], 1800);
    }

    #[test]
    fn error_codes_map_to_typed_failures() {
        assert!(matches!(
            bridge_error("x".into(), Some("no_project".into())),
            AppError::EditorNoProjectOrTimeline
        ));
        assert!(matches!(
            bridge_error("x".into(), Some("not_connected".into())),
            AppError::EditorNotConnected
        ));
        assert!(matches!(
            bridge_error("boom".into(), None),
            AppError::Editor(_)
        ));
    }

    #[test]
    fn responses_deserialize_from_tagged_json() {
        let r: BridgeResponse =
            serde_json::from_str(r#"{"type":"timeline","frame_rate":"29.97","playhead":"01:00:00;00"}"#)
                .unwrap();
        assert!(matches!(r, BridgeResponse::Timeline { .. }));

        let r: BridgeResponse =
            serde_json::from_str(r#"{"type":"error","message":"no project","code":"no_project"}"#)
                .unwrap();
        assert!(matches!(r, BridgeResponse::Error { .. }));

        let r: BridgeResponse = serde_json::from_str(r#"{"type":"item","item":null}"#).unwrap();
        assert!(matches!(r, BridgeResponse::Item { item: None }));
    }
}
