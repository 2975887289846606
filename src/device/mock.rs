// Scripted transport for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::error::{DeviceError, Result};
use super::transport::Transport;

enum Reply {
    Text(String),
    Timeout,
}

#[derive(Default)]
struct MockTransportInner {
    connected: bool,
    written: Vec<String>,
    quiet_writes: usize,
    replies: VecDeque<Reply>,
    fail_writes: bool,
    reads: usize,
}

/// Clonable handle; clones share the same script and recording
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

impl MockTransport {
    /// Connected transport that answers every read with an empty reply
    pub fn new() -> Self {
        let inner = MockTransportInner {
            connected: true,
            ..Default::default()
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn disconnected() -> Self {
        let mock = Self::new();
        mock.inner.lock().unwrap().connected = false;
        mock
    }

    /// Queue the cleaned text returned by the next unscripted read
    pub fn push_reply(&self, text: &str) {
        self.inner
            .lock()
            .unwrap()
            .replies
            .push_back(Reply::Text(text.to_string()));
    }

    /// Make the next read time out
    pub fn push_timeout(&self) {
        self.inner.lock().unwrap().replies.push_back(Reply::Timeout);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Lines written so far, without terminators
    pub fn written(&self) -> Vec<String> {
        self.inner.lock().unwrap().written.clone()
    }

    pub fn clear_written(&self) {
        self.inner.lock().unwrap().written.clear();
    }

    pub fn quiet_writes(&self) -> usize {
        self.inner.lock().unwrap().quiet_writes
    }

    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8], log: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(DeviceError::Disconnected);
        }
        if inner.fail_writes {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        inner.written.push(line);
        if !log {
            inner.quiet_writes += 1;
        }
        Ok(())
    }

    fn read_until(&mut self, _delimiter: u8, _log: bool) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(DeviceError::Disconnected);
        }
        inner.reads += 1;
        match inner.replies.pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Timeout) => Err(DeviceError::Timeout {
                command: String::new(),
            }),
            None => Ok(String::new()),
        }
    }

    fn disconnect(&mut self) {
        self.inner.lock().unwrap().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }
}
