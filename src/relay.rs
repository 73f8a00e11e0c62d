//! Durable-log stream relay.
//!
//! Tails the append-only NDJSON log a run writes, from a caller-supplied
//! byte offset, and hands complete lines to a callback in file order. The
//! relay is the reconnect path: the only state a consumer carries across
//! disconnects is the returned offset, so stopping at any point and calling
//! again with that offset never replays or skips a line.
//!
//! The loop is a small state machine: READING while new data is available,
//! WAITING (async sleep, never a busy spin) while the producer is alive and
//! the budget allows, one DRAINING pass once the producer stops, then
//! STOPPED. A `[DONE]` sentinel line stops the relay immediately and is
//! never passed to the callback.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::Instant;

/// Line terminating every finished durable log.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Pause between read passes while waiting for the producer.
const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// How a relay call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayOutcome {
    /// Byte offset immediately after the last fully consumed line. Passing
    /// this to a subsequent call resumes exactly where this one stopped.
    pub offset: u64,
    /// Whether the `[DONE]` sentinel was reached. A `false` with a live
    /// producer just means "come back later", not a failure.
    pub done: bool,
}

/// Relay new complete lines from `path` to `on_line`.
///
/// `is_running` is polled at most once per loop iteration; after it first
/// reports `false` the relay performs exactly one more read-and-emit pass to
/// flush bytes written just before the stop signal. `max_wait` bounds the
/// total duration of this call only; it never affects the producer.
///
/// A missing file, or one that vanishes mid-relay, counts as "no more data":
/// the relay returns its current offset without an error.
pub async fn relay<F, P>(
    path: &Path,
    start_offset: u64,
    mut on_line: F,
    mut is_running: P,
    max_wait: Duration,
) -> RelayOutcome
where
    F: FnMut(&str),
    P: FnMut() -> bool,
{
    if tokio::fs::metadata(path).await.is_err() {
        debug!("relay: {} not found, nothing to do", path.display());
        return RelayOutcome {
            offset: start_offset,
            done: false,
        };
    }

    let deadline = Instant::now() + max_wait;
    let mut consumed = start_offset;
    let mut partial: Vec<u8> = Vec::new();

    loop {
        if drain_pass(path, &mut consumed, &mut partial, &mut on_line).await {
            return RelayOutcome {
                offset: consumed,
                done: true,
            };
        }

        if !is_running() {
            // One final pass catches data written between the last read and
            // the stop signal.
            let done = drain_pass(path, &mut consumed, &mut partial, &mut on_line).await;
            return RelayOutcome {
                offset: consumed,
                done,
            };
        }

        let now = Instant::now();
        if now >= deadline {
            trace!("relay: budget exhausted at offset {consumed}");
            return RelayOutcome {
                offset: consumed,
                done: false,
            };
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// One read-and-emit pass. Returns `true` if the sentinel was reached.
async fn drain_pass<F>(
    path: &Path,
    consumed: &mut u64,
    partial: &mut Vec<u8>,
    on_line: &mut F,
) -> bool
where
    F: FnMut(&str),
{
    let read_pos = *consumed + partial.len() as u64;
    let fresh = read_from(path, read_pos).await;
    if !fresh.is_empty() {
        partial.extend_from_slice(&fresh);
    }

    while let Some(newline) = partial.iter().position(|&b| b == b'\n') {
        let line = String::from_utf8_lossy(&partial[..newline]).into_owned();
        partial.drain(..=newline);
        *consumed += newline as u64 + 1;

        let line = line.strip_suffix('\r').unwrap_or(&line);
        if line == DONE_SENTINEL {
            return true;
        }
        if line.trim().is_empty() {
            continue;
        }
        on_line(line);
    }

    false
}

/// Read all bytes from `offset` to the current end of file. Any I/O failure
/// yields an empty read rather than an error.
async fn read_from(path: &Path, offset: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return buf;
    };
    if file.seek(SeekFrom::Start(offset)).await.is_err() {
        return buf;
    }
    if file.read_to_end(&mut buf).await.is_err() {
        buf.clear();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn log_file(dir: &tempfile::TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("run.ndjson");
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn collect(
        path: &Path,
        offset: u64,
        running: bool,
        max_wait: Duration,
    ) -> (Vec<String>, RelayOutcome) {
        let mut lines = Vec::new();
        let outcome = relay(path, offset, |l| lines.push(l.to_string()), || running, max_wait).await;
        (lines, outcome)
    }

    #[tokio::test]
    async fn byte_offset_correctness_and_sentinel_exclusion() {
        let dir = tempfile::tempdir().unwrap();
        let content = "A\nB\n[DONE]\n";
        let path = log_file(&dir, content);

        let (lines, outcome) = collect(&path, 0, false, Duration::from_secs(1)).await;
        assert_eq!(lines, vec!["A", "B"]);
        assert!(outcome.done);
        assert_eq!(outcome.offset, content.len() as u64);
    }

    #[tokio::test]
    async fn drain_delivers_everything_when_producer_already_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "one\ntwo\nthree\n");

        let mut polls = 0;
        let mut lines = Vec::new();
        let outcome = relay(
            &path,
            0,
            |l| lines.push(l.to_string()),
            || {
                polls += 1;
                false
            },
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(polls, 1, "producer polled more than once per iteration");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(!outcome.done);
        assert_eq!(outcome.offset, "one\ntwo\nthree\n".len() as u64);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_but_counted() {
        let dir = tempfile::tempdir().unwrap();
        let content = "\n\n{\"type\":\"result\"}\n\n[DONE]\n";
        let path = log_file(&dir, content);

        let (lines, outcome) = collect(&path, 0, false, Duration::from_secs(1)).await;
        assert_eq!(lines, vec!["{\"type\":\"result\"}"]);
        assert!(outcome.done);
        assert_eq!(outcome.offset, content.len() as u64);
    }

    #[tokio::test]
    async fn missing_file_returns_original_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.ndjson");

        let (lines, outcome) = collect(&path, 17, true, Duration::from_secs(1)).await;
        assert!(lines.is_empty());
        assert_eq!(outcome.offset, 17);
        assert!(!outcome.done);
    }

    #[tokio::test]
    async fn resume_from_returned_offset_has_no_gaps_or_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "alpha\nbeta\n");

        let (first, outcome) = collect(&path, 0, false, Duration::from_secs(1)).await;
        assert_eq!(first, vec!["alpha", "beta"]);

        // Producer appends more after the consumer disconnected.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("gamma\ndelta\n[DONE]\n");
        std::fs::write(&path, &content).unwrap();

        let (second, resumed) = collect(&path, outcome.offset, false, Duration::from_secs(1)).await;
        assert_eq!(second, vec!["gamma", "delta"]);
        assert!(resumed.done);
        assert_eq!(resumed.offset, content.len() as u64);
    }

    #[tokio::test]
    async fn partial_trailing_line_is_never_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "whole\npar");

        let (lines, outcome) = collect(&path, 0, false, Duration::from_secs(1)).await;
        assert_eq!(lines, vec!["whole"]);
        assert_eq!(outcome.offset, "whole\n".len() as u64);

        // The writer completes the line later; resuming picks it up intact.
        std::fs::write(&path, "whole\npartial\n[DONE]\n").unwrap();
        let (lines, outcome) = collect(&path, outcome.offset, false, Duration::from_secs(1)).await;
        assert_eq!(lines, vec!["partial"]);
        assert!(outcome.done);
    }

    #[tokio::test]
    async fn budget_expiry_is_a_normal_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "");

        let started = std::time::Instant::now();
        let (lines, outcome) = collect(&path, 0, true, Duration::from_millis(200)).await;
        assert!(lines.is_empty());
        assert!(!outcome.done);
        assert_eq!(outcome.offset, 0);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn picks_up_lines_appended_while_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "");

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            tokio::fs::write(&writer_path, "late\n[DONE]\n").await.unwrap();
        });

        let (lines, outcome) = collect(&path, 0, true, Duration::from_secs(5)).await;
        writer.await.unwrap();
        assert_eq!(lines, vec!["late"]);
        assert!(outcome.done);
    }

    #[tokio::test]
    async fn carriage_returns_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file(&dir, "a\r\n[DONE]\r\n");

        let (lines, outcome) = collect(&path, 0, false, Duration::from_secs(1)).await;
        assert_eq!(lines, vec!["a"]);
        assert!(outcome.done);
    }
}
