//! Frame-rate normalization and timecode arithmetic for timeline insertion.
//!
//! The editor reports frame rates as strings or floats, including the
//! drop-frame NTSC family (23.976/29.97/59.94). All placement math runs on
//! the normalized integer rate.

/// Tolerance around the NTSC rates when snapping to their integer neighbors.
const NTSC_TOLERANCE: f64 = 0.05;

/// Round a raw frame-rate value to its conventional integer rate.
/// Unparseable input yields 0, which callers treat as "cannot place clips".
pub fn normalize_fps(raw: &str) -> u32 {
    let Ok(value) = raw.trim().parse::<f64>() else {
        return 0;
    };
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    for (ntsc, conventional) in [(23.976, 24), (29.97, 30), (59.94, 60)] {
        if (value - ntsc).abs() < NTSC_TOLERANCE {
            return conventional;
        }
    }
    value.round() as u32
}

/// Parse `HH:MM:SS:FF` into an absolute frame count. Drop-frame `;`
/// separators are normalized to `:` first.
pub fn timecode_to_frames(timecode: &str, fps: u32) -> Option<i64> {
    if fps == 0 {
        return None;
    }
    let normalized = timecode.trim().replace(';', ":");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut fields = [0i64; 4];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        *slot = part.parse::<u32>().ok()? as i64;
    }
    let [hours, minutes, seconds, frames] = fields;
    Some((hours * 3600 + minutes * 60 + seconds) * fps as i64 + frames)
}

/// Inverse of [`timecode_to_frames`]; round-trips exactly for every value the
/// forward conversion can produce.
pub fn frames_to_timecode(frames: i64, fps: u32) -> String {
    if fps == 0 || frames < 0 {
        return "00:00:00:00".to_string();
    }
    let fps = fps as i64;
    let ff = frames % fps;
    let total_seconds = frames / fps;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{:02}:{:02}:{:02}:{:02}", hours, minutes, seconds, ff)
}
