//! SRT export of the record history: completed records become sequential
//! cues, one after another on a running clock.

use crate::managers::history::TranscriptionRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SrtCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Completed records, in the order given, laid end to end.
pub fn cues_from_records(records: &[TranscriptionRecord]) -> Vec<SrtCue> {
    let mut clock_ms = 0u64;
    let mut cues = Vec::new();
    for record in records {
        if !record.is_complete() || record.duration <= 0.0 {
            continue;
        }
        let duration_ms = (record.duration * 1000.0).round() as u64;
        cues.push(SrtCue {
            start_ms: clock_ms,
            end_ms: clock_ms + duration_ms,
            text: record.text.clone(),
        });
        clock_ms += duration_ms;
    }
    cues
}

pub fn render_srt(cues: &[SrtCue]) -> String {
    let mut out = String::new();
    for (index, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms),
            cue.text
        ));
    }
    out
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SynthesisParams;

    fn record(text: &str, duration: f64) -> TranscriptionRecord {
        TranscriptionRecord {
            id: 1,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            text: text.to_string(),
            speaker_style_id: 1,
            speaker_name: "a".to_string(),
            style_name: "b".to_string(),
            params: SynthesisParams::default(),
            output_path: if duration >= 0.0 {
                Some("/tmp/x.wav".to_string())
            } else {
                None
            },
            duration,
            kana: None,
            phonemes: None,
        }
    }

    #[test]
    fn pending_records_are_skipped() {
        let cues = cues_from_records(&[record("done", 1.5), record("pending", -1.0)]);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "done");
    }

    #[test]
    fn cues_run_end_to_end() {
        let cues = cues_from_records(&[record("one", 1.5), record("two", 2.25)]);
        assert_eq!(cues[0].start_ms, 0);
        assert_eq!(cues[0].end_ms, 1500);
        assert_eq!(cues[1].start_ms, 1500);
        assert_eq!(cues[1].end_ms, 3750);
    }

    #[test]
    fn srt_formatting() {
        let srt = render_srt(&cues_from_records(&[record("こんにちは", 1.5)]));
        assert_eq!(srt, "1\n00:00:00,000 --> 00:00:01,500\nこんにちは\n\n");
    }

    #[test]
    fn timestamps_roll_over_hours() {
        assert_eq!(format_timestamp(3_661_042), "01:01:01,042");
    }
}
