//! Content-addressed audio filenames: `{id}_{digest}_{text head}.wav`.
//!
//! The digest covers exactly the inputs that change the synthesized audio
//! (text, speaker style, and the seven scale parameters), so regenerating a
//! record with identical inputs lands on the same file.

use crate::settings::SynthesisParams;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const DIGEST_CHARS: usize = 8;
const TEXT_HEAD_CHARS: usize = 8;

pub fn generate_filename(
    id: i64,
    text: &str,
    speaker_style_id: u32,
    params: &SynthesisParams,
) -> String {
    let digest = content_digest(text, speaker_style_id, params);
    let head: String = sanitize(text).chars().take(TEXT_HEAD_CHARS).collect();
    format!("{:03}_{}_{}.wav", id, digest, head)
}

/// First 8 hex chars of SHA-256 over a canonical sorted-key JSON document.
/// Only the listed keys participate; anything else a caller tracks alongside
/// the parameters is deliberately excluded.
fn content_digest(text: &str, speaker_style_id: u32, params: &SynthesisParams) -> String {
    let mut doc: BTreeMap<&str, Value> = BTreeMap::new();
    doc.insert("text", Value::from(text));
    doc.insert("speaker_id", Value::from(speaker_style_id));
    doc.insert("speed_scale", Value::from(params.speed_scale));
    doc.insert("pitch_scale", Value::from(params.pitch_scale));
    doc.insert("intonation_scale", Value::from(params.intonation_scale));
    doc.insert("volume_scale", Value::from(params.volume_scale));
    doc.insert("pre_phoneme_length", Value::from(params.pre_phoneme_length));
    doc.insert("post_phoneme_length", Value::from(params.post_phoneme_length));
    doc.insert("pause_length_scale", Value::from(params.pause_length_scale));

    let canonical = serde_json::to_string(&doc).unwrap_or_default();
    let hash = Sha256::digest(canonical.as_bytes());
    let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..DIGEST_CHARS].to_string()
}

fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}
