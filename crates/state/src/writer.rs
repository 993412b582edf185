//! Debounced view-state writer.
//!
//! One writer per view instance. Scheduling replaces any pending write
//! outright, so only the most recent state ever reaches disk; `poll` runs a
//! due write from the embedder's cooperative loop and `flush` forces the
//! pending one at shutdown or instance close.

use crate::{write_state, StateError, ViewState};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct PendingWrite {
    dir: PathBuf,
    state: ViewState,
    due: Instant,
}

#[derive(Debug)]
pub struct StateWriter {
    delay: Duration,
    pending: Option<PendingWrite>,
}

impl StateWriter {
    pub fn new(delay: Duration) -> Self {
        Self { delay, pending: None }
    }

    /// Schedule a write of `state` after the debounce delay. Fully replaces
    /// any pending write, timer included.
    pub fn schedule(&mut self, dir: PathBuf, state: ViewState) {
        self.pending = Some(PendingWrite { dir, state, due: Instant::now() + self.delay });
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Run the pending write if its delay has elapsed. Returns whether a
    /// write happened.
    pub fn poll(&mut self, now: Instant) -> Result<bool, StateError> {
        let due = self.pending.as_ref().map_or(false, |p| p.due <= now);
        if due {
            self.run_pending()
        } else {
            Ok(false)
        }
    }

    /// Run the pending write immediately, if any. Used at shutdown and
    /// instance close so teardown never loses state.
    pub fn flush(&mut self) -> Result<bool, StateError> {
        if self.pending.is_some() {
            self.run_pending()
        } else {
            Ok(false)
        }
    }

    /// Drop the pending write without running it.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    fn run_pending(&mut self) -> Result<bool, StateError> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };
        write_state(&pending.dir, &pending.state)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{read_state, state_path};
    use folio_store::DocumentKind;

    #[test]
    fn repeated_schedules_collapse_to_one_write_with_last_state() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut writer = StateWriter::new(Duration::from_millis(200));

        for page in 1..=5 {
            writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(page));
        }

        assert!(writer.has_pending());
        assert!(writer.flush().expect("flush should succeed"));
        assert!(!writer.has_pending());

        let restored = read_state(temp.path(), DocumentKind::Pdf, None);
        assert_eq!(restored.page_index, Some(5));
    }

    #[test]
    fn poll_before_deadline_does_not_write() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut writer = StateWriter::new(Duration::from_secs(60));

        writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(1));

        let wrote = writer.poll(Instant::now()).expect("poll should succeed");
        assert!(!wrote);
        assert!(!state_path(temp.path()).exists());
        assert!(writer.has_pending());
    }

    #[test]
    fn poll_after_deadline_writes_and_clears_pending() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut writer = StateWriter::new(Duration::from_millis(0));

        writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(9));

        let wrote = writer
            .poll(Instant::now() + Duration::from_millis(1))
            .expect("poll should succeed");
        assert!(wrote);
        assert!(!writer.has_pending());

        let restored = read_state(temp.path(), DocumentKind::Pdf, None);
        assert_eq!(restored.page_index, Some(9));
    }

    #[test]
    fn schedule_rearms_the_timer() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut writer = StateWriter::new(Duration::from_millis(100));

        writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(1));
        let first_due = Instant::now() + Duration::from_millis(50);

        // A later schedule supersedes the earlier deadline entirely.
        std::thread::sleep(Duration::from_millis(60));
        writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(2));

        let wrote = writer.poll(first_due).expect("poll should succeed");
        assert!(!wrote);
        assert!(writer.has_pending());
    }

    #[test]
    fn cancel_discards_pending_write() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut writer = StateWriter::new(Duration::from_millis(0));

        writer.schedule(temp.path().to_path_buf(), ViewState::with_page_index(1));
        writer.cancel();

        assert!(!writer.flush().expect("flush should succeed"));
        assert!(!state_path(temp.path()).exists());
    }

    #[test]
    fn concurrent_reader_never_sees_partial_sidecar() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let dir = temp.path().to_path_buf();

        let big_comment: String = "x".repeat(64 * 1024);
        let mut state_a = ViewState::with_page_index(1);
        state_a.extra.insert("note".to_owned(), serde_json::Value::String(big_comment.clone()));
        let mut state_b = ViewState::with_page_index(2);
        state_b.extra.insert("note".to_owned(), serde_json::Value::String(big_comment));

        write_state(&dir, &state_a).expect("seed write should succeed");

        let reader_path = state_path(&dir);
        let reader = std::thread::spawn(move || {
            for _ in 0..50 {
                let Ok(bytes) = std::fs::read(&reader_path) else {
                    continue;
                };
                // Any bytes that parse must be one complete write, never a
                // blend or truncation of two.
                if let Ok(restored) = serde_json::from_slice::<ViewState>(&bytes) {
                    let page = restored.page_index.expect("parsed state is complete");
                    assert!(page == 1 || page == 2);
                    let note = restored.extra.get("note").expect("parsed state is complete");
                    assert_eq!(note.as_str().map(str::len), Some(64 * 1024));
                }
            }
        });

        for i in 0..50 {
            let state = if i % 2 == 0 { &state_b } else { &state_a };
            write_state(&dir, state).expect("write should succeed");
        }

        reader.join().expect("reader thread should not panic");
    }
}
