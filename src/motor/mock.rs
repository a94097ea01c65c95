// In-memory motor link for dry runs and tests
//
// The link and its handle share state, so a test can keep the handle while
// the crawler owns the link.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::driver::MotorLink;
use super::protocol::{Result, ShError};

/// Frames kept in [`MockState::sent`]; older ones are dropped
pub const SENT_HISTORY: usize = 64;

#[derive(Debug, Default)]
pub struct MockState {
    /// Most recent frames written, oldest first
    pub sent: VecDeque<String>,
    /// Frames written over the link's lifetime
    pub writes: usize,
    /// Frames returned by successive reads
    pub responses: VecDeque<String>,
    /// Number of frames consumed by reads (including empty reads)
    pub reads: usize,
    pub opens: usize,
    pub closes: usize,
    /// Make every open fail
    pub fail_open: bool,
    open: bool,
}

#[derive(Clone)]
pub struct MockMotorLink {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockMotorLink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Access the shared state
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_response(&self, frame: &str) {
        self.state().responses.push_back(frame.to_string());
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    pub fn sent(&self) -> Vec<String> {
        self.state().sent.iter().cloned().collect()
    }
}

impl MotorLink for MockMotorLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_open {
            return Err(ShError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} unplugged", self.name),
            )));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn send(&mut self, frame: &str) -> Result<()> {
        let mut state = self.state();
        if !state.open {
            return Err(ShError::NotOpen);
        }
        if state.sent.len() == SENT_HISTORY {
            state.sent.pop_front();
        }
        state.sent.push_back(frame.to_string());
        state.writes += 1;
        Ok(())
    }

    fn recv(&mut self) -> String {
        let mut state = self.state();
        if !state.open {
            return String::new();
        }
        state.reads += 1;
        state.responses.pop_front().unwrap_or_default()
    }

    fn close(&mut self) {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_round_trip() {
        let handle = MockMotorLink::new("SH1");
        let mut link = handle.clone();
        handle.push_response("s[0:0][0.0:0.0][0.0:0.0]e");

        assert!(link.send("s[10.00:10.00]e").is_err());
        link.open().unwrap();
        link.send("s[10.00:10.00]e").unwrap();
        assert_eq!(link.recv(), "s[0:0][0.0:0.0][0.0:0.0]e");
        assert_eq!(link.recv(), "");
        link.close();

        assert_eq!(handle.sent(), vec!["s[10.00:10.00]e".to_string()]);
        assert_eq!(handle.state().reads, 2);
        assert_eq!(handle.state().closes, 1);
    }

    #[test]
    fn test_mock_history_is_bounded() {
        let handle = MockMotorLink::new("SH3");
        let mut link = handle.clone();
        link.open().unwrap();
        for i in 0..SENT_HISTORY + 10 {
            link.send(&format!("s[{}:0]e", i)).unwrap();
        }

        let sent = handle.sent();
        assert_eq!(sent.len(), SENT_HISTORY);
        assert_eq!(sent[0], "s[10:0]e");
        assert_eq!(sent.last().unwrap(), &format!("s[{}:0]e", SENT_HISTORY + 9));
        assert_eq!(handle.state().writes, SENT_HISTORY + 10);
    }

    #[test]
    fn test_mock_open_failure() {
        let handle = MockMotorLink::new("SH2");
        handle.set_fail_open(true);
        let mut link = handle.clone();
        assert!(link.open().is_err());
        assert!(!link.is_open());
    }
}
