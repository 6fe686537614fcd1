//! Session transcript inspection.
//!
//! Transcripts are newline-delimited JSON. A user turn is recorded as
//! `{"type":"message","message":{"role":"user",...}}`; every other record
//! (assistant turns, tool results, metadata) is ignored here.

use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Deserialize)]
struct TranscriptRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<TranscriptMessage>,
}

#[derive(Deserialize)]
struct TranscriptMessage {
    role: Option<String>,
}

fn is_user_message(line: &str) -> bool {
    let Ok(record) = serde_json::from_str::<TranscriptRecord>(line) else {
        return false;
    };
    record.kind.as_deref() == Some("message")
        && record
            .message
            .and_then(|message| message.role)
            .is_some_and(|role| role == "user")
}

/// Count user-message records, pulling no more lines once `limit` is reached.
/// Malformed lines are skipped.
pub fn count_user_messages_from_lines<I, S>(lines: I, limit: usize) -> usize
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut count = 0;
    if limit == 0 {
        return count;
    }
    for line in lines {
        let line = line.as_ref().trim();
        if !line.is_empty() && is_user_message(line) {
            count += 1;
            if count >= limit {
                break;
            }
        }
    }
    count
}

/// Count user messages in a transcript file, up to `limit`. A file that cannot
/// be opened counts as zero.
pub fn count_user_messages(path: &Path, limit: usize) -> usize {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            tracing::debug!(path = %path.display(), "Transcript not readable: {error}");
            return 0;
        }
    };
    let lines = BufReader::new(file).lines().map_while(Result::ok);
    count_user_messages_from_lines(lines, limit)
}

/// Whether BOOTSTRAP.md should still be injected for this session.
///
/// `threshold == 0` disables expiry. A missing transcript means the session
/// has not started, so the bootstrap is still due.
pub fn should_inject_bootstrap(transcript: Option<&Path>, threshold: usize) -> bool {
    if threshold == 0 {
        return true;
    }
    let Some(path) = transcript else {
        return true;
    };
    let seen = count_user_messages(path, threshold);
    if seen >= threshold {
        tracing::debug!(
            path = %path.display(),
            threshold,
            "Bootstrap expired for session"
        );
        false
    } else {
        true
    }
}
