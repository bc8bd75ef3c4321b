//! Durable transcription-record store.
//!
//! One SQLite database per output directory; switching the output directory
//! switches to a separate store with its own id sequence. Every operation
//! opens, works, and closes, so lock contention on the backing file never
//! spans more than one logical operation. When no output directory is
//! configured, reads return empty and writes no-op, which lets the rest of
//! the app run in a not-yet-configured state.

use crate::settings::{SettingsStore, SynthesisParams};
use chrono::Utc;
use log::{error, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;

pub const DB_FILE_NAME: &str = "transcriptions.db";

/// Sentinel for "not yet synthesized". The store invariant is
/// `(output_path IS NOT NULL) == (duration >= 0)`.
pub const PENDING_DURATION: f64 = -1.0;

#[derive(Debug, Clone)]
pub struct TranscriptionRecord {
    pub id: i64,
    pub created_at: String,
    pub text: String,
    pub speaker_style_id: u32,
    pub speaker_name: String,
    pub style_name: String,
    pub params: SynthesisParams,
    pub output_path: Option<String>,
    pub duration: f64,
    pub kana: Option<String>,
    /// JSON-encoded `[{time, phoneme}]` timeline, present only after synthesis.
    pub phonemes: Option<String>,
}

impl TranscriptionRecord {
    pub fn is_complete(&self) -> bool {
        self.duration >= 0.0
    }
}

pub struct HistoryManager {
    settings: Arc<SettingsStore>,
}

impl HistoryManager {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self { settings }
    }

    fn db_path(&self) -> Option<PathBuf> {
        Some(self.settings.output_dir()?.join(DB_FILE_NAME))
    }

    /// Open the store for the currently configured output directory, ensuring
    /// the schema. An unreadable database file is moved aside and a fresh one
    /// is created rather than failing every subsequent operation.
    fn open(&self) -> Option<Connection> {
        let path = self.db_path()?;
        let conn = match Connection::open(&path).and_then(|c| {
            // A truncated or overwritten file surfaces here, not at open().
            c.query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))?;
            Ok(c)
        }) {
            Ok(conn) => conn,
            Err(e) => {
                error!("record store at {:?} is unreadable: {}", path, e);
                let backup = path.with_extension(format!(
                    "db.corrupt-{}",
                    Utc::now().format("%Y%m%d%H%M%S")
                ));
                if let Err(e) = std::fs::rename(&path, &backup) {
                    error!("could not move corrupt store aside: {}", e);
                    return None;
                }
                warn!("moved corrupt store to {:?}, starting fresh", backup);
                Connection::open(&path).ok()?
            }
        };
        if let Err(e) = ensure_schema(&conn) {
            error!("could not ensure record store schema: {}", e);
            return None;
        }
        Some(conn)
    }

    /// Insert a pending record and return its id. Returns None when the store
    /// is unavailable.
    pub fn create(
        &self,
        text: &str,
        speaker_style_id: u32,
        speaker_name: &str,
        style_name: &str,
        params: &SynthesisParams,
    ) -> Option<i64> {
        let conn = self.open()?;
        let result = conn.execute(
            "INSERT INTO transcriptions (
                created_at, text, speaker_style_id, speaker_name, style_name,
                speed_scale, pitch_scale, intonation_scale, volume_scale,
                pre_phoneme_length, post_phoneme_length, pause_length_scale,
                output_path, duration, kana, phonemes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13, NULL, NULL)",
            params![
                Utc::now().to_rfc3339(),
                text,
                speaker_style_id,
                speaker_name,
                style_name,
                params.speed_scale,
                params.pitch_scale,
                params.intonation_scale,
                params.volume_scale,
                params.pre_phoneme_length,
                params.post_phoneme_length,
                params.pause_length_scale,
                PENDING_DURATION,
            ],
        );
        match result {
            Ok(_) => Some(conn.last_insert_rowid()),
            Err(e) => {
                error!("could not insert record: {}", e);
                None
            }
        }
    }

    pub fn get(&self, id: i64) -> Option<TranscriptionRecord> {
        let conn = self.open()?;
        conn.query_row(
            &format!("SELECT {} FROM transcriptions WHERE id = ?1", COLUMNS),
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(|e| error!("could not read record {}: {}", id, e))
        .ok()
        .flatten()
    }

    /// Complete a record: path and duration move together, keeping the store
    /// invariant intact.
    pub fn update_audio_info(
        &self,
        id: i64,
        output_path: &str,
        duration: f64,
        kana: Option<&str>,
        phonemes: Option<&str>,
    ) -> bool {
        let Some(conn) = self.open() else {
            return false;
        };
        match conn.execute(
            "UPDATE transcriptions
             SET output_path = ?2, duration = ?3, kana = ?4, phonemes = ?5
             WHERE id = ?1",
            params![id, output_path, duration.max(0.0), kana, phonemes],
        ) {
            Ok(n) => n > 0,
            Err(e) => {
                error!("could not complete record {}: {}", id, e);
                false
            }
        }
    }

    /// Replace the text and atomically reset the record to pending,
    /// discarding the audio metadata in the same statement.
    pub fn update_text(&self, id: i64, new_text: &str) -> bool {
        let Some(conn) = self.open() else {
            return false;
        };
        match conn.execute(
            "UPDATE transcriptions
             SET text = ?2, output_path = NULL, duration = ?3, kana = NULL, phonemes = NULL
             WHERE id = ?1",
            params![id, new_text, PENDING_DURATION],
        ) {
            Ok(n) => n > 0,
            Err(e) => {
                error!("could not update text of record {}: {}", id, e);
                false
            }
        }
    }

    /// Reset a record to pending without touching its text. Used by the
    /// history reload when a claimed audio file is missing on disk.
    pub fn reset_pending(&self, id: i64) -> bool {
        let Some(conn) = self.open() else {
            return false;
        };
        match conn.execute(
            "UPDATE transcriptions
             SET output_path = NULL, duration = ?2, kana = NULL, phonemes = NULL
             WHERE id = ?1",
            params![id, PENDING_DURATION],
        ) {
            Ok(n) => n > 0,
            Err(e) => {
                error!("could not reset record {}: {}", id, e);
                false
            }
        }
    }

    pub fn delete(&self, id: i64) -> bool {
        let Some(conn) = self.open() else {
            return false;
        };
        match conn.execute("DELETE FROM transcriptions WHERE id = ?1", params![id]) {
            Ok(n) => n > 0,
            Err(e) => {
                error!("could not delete record {}: {}", id, e);
                false
            }
        }
    }

    /// Most-recent-first listing.
    pub fn recent(&self, limit: usize) -> Vec<TranscriptionRecord> {
        let Some(conn) = self.open() else {
            return Vec::new();
        };
        let sql = format!(
            "SELECT {} FROM transcriptions ORDER BY id DESC LIMIT ?1",
            COLUMNS
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("could not list records: {}", e);
                return Vec::new();
            }
        };
        let records = match stmt.query_map(params![limit as i64], row_to_record) {
            Ok(rows) => rows.filter_map(|r| r.ok()).collect(),
            Err(e) => {
                error!("could not list records: {}", e);
                Vec::new()
            }
        };
        records
    }
}

const COLUMNS: &str = "id, created_at, text, speaker_style_id, speaker_name, style_name, \
     speed_scale, pitch_scale, intonation_scale, volume_scale, \
     pre_phoneme_length, post_phoneme_length, pause_length_scale, \
     output_path, duration, kana, phonemes";

fn row_to_record(row: &Row) -> rusqlite::Result<TranscriptionRecord> {
    Ok(TranscriptionRecord {
        id: row.get(0)?,
        created_at: row.get(1)?,
        text: row.get(2)?,
        speaker_style_id: row.get(3)?,
        speaker_name: row.get(4)?,
        style_name: row.get(5)?,
        params: SynthesisParams {
            speed_scale: row.get(6)?,
            pitch_scale: row.get(7)?,
            intonation_scale: row.get(8)?,
            volume_scale: row.get(9)?,
            pre_phoneme_length: row.get(10)?,
            post_phoneme_length: row.get(11)?,
            pause_length_scale: row.get(12)?,
        },
        output_path: row.get(13)?,
        duration: row.get(14)?,
        kana: row.get(15)?,
        phonemes: row.get(16)?,
    })
}

/// Create the table if needed, then bring an older store up to date by adding
/// any missing columns with safe defaults. Re-running on a current store is a
/// no-op, so this can run on every open.
fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transcriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            text TEXT NOT NULL,
            speaker_style_id INTEGER NOT NULL DEFAULT 1,
            speaker_name TEXT NOT NULL DEFAULT '',
            style_name TEXT NOT NULL DEFAULT '',
            speed_scale REAL NOT NULL DEFAULT 1.0,
            pitch_scale REAL NOT NULL DEFAULT 0.0,
            intonation_scale REAL NOT NULL DEFAULT 1.0,
            volume_scale REAL NOT NULL DEFAULT 1.0,
            pre_phoneme_length REAL NOT NULL DEFAULT 0.1,
            post_phoneme_length REAL NOT NULL DEFAULT 0.1,
            pause_length_scale REAL NOT NULL DEFAULT 1.0,
            output_path TEXT,
            duration REAL NOT NULL DEFAULT -1.0,
            kana TEXT,
            phonemes TEXT
        )",
        [],
    )?;

    let mut existing: Vec<String> = Vec::new();
    {
        let mut stmt = conn.prepare("PRAGMA table_info(transcriptions)")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
        for name in names {
            existing.push(name?);
        }
    }

    // Columns added after the first shipped schema, with the defaults an old
    // row should carry.
    let added = [
        ("pause_length_scale", "REAL NOT NULL DEFAULT 1.0"),
        ("kana", "TEXT"),
        ("phonemes", "TEXT"),
    ];
    for (name, decl) in added {
        if !existing.iter().any(|c| c == name) {
            conn.execute(
                &format!("ALTER TABLE transcriptions ADD COLUMN {} {}", name, decl),
                [],
            )?;
        }
    }
    Ok(())
}
