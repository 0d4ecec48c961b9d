//! Scripted links for unit tests

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::DetectError;
use crate::link::{LinkOpener, ScaleLink};
use crate::params::SerialParams;

#[derive(Default)]
struct ScriptState {
    input: Vec<u8>,
    responses: HashMap<Vec<u8>, Vec<u8>>,
    writes: Vec<Vec<u8>>,
    timeout: Duration,
    timeout_changes: Vec<Duration>,
    lost: bool,
    checks_left: Option<usize>,
    write_error: Option<io::ErrorKind>,
    output_clears: usize,
}

/// Link whose input is scripted by the test; clones share state
#[derive(Clone, Default)]
pub struct ScriptedLink {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    /// Append bytes to the input buffer
    pub fn push_input(&self, data: &[u8]) {
        self.state().input.extend_from_slice(data);
    }

    /// Queue `reply` as input whenever `command` is written
    pub fn respond_to(&self, command: &[u8], reply: &[u8]) {
        self.state()
            .responses
            .insert(command.to_vec(), reply.to_vec());
    }

    /// Make every further liveness check fail
    pub fn disconnect(&self) {
        self.state().lost = true;
    }

    /// Pass `checks` more liveness checks, then behave as unplugged
    pub fn disconnect_after_checks(&self, checks: usize) {
        self.state().checks_left = Some(checks);
    }

    /// Fail every write with `kind` without losing the device
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        self.state().write_error = Some(kind);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn timeout_changes(&self) -> Vec<Duration> {
        self.state().timeout_changes.clone()
    }

    pub fn pending(&self) -> usize {
        self.state().input.len()
    }

    pub fn output_clears(&self) -> usize {
        self.state().output_clears
    }
}

fn lost() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")
}

impl ScaleLink for ScriptedLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        let mut state = self.state();
        match state.checks_left {
            Some(0) => state.lost = true,
            Some(n) => state.checks_left = Some(n - 1),
            None => {}
        }
        if state.lost {
            return Err(lost());
        }
        Ok(state.input.len())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.lost {
            return Err(lost());
        }
        let n = buf.len().min(state.input.len());
        buf[..n].copy_from_slice(&state.input[..n]);
        state.input.drain(..n);
        Ok(n)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.lost {
            return Err(lost());
        }
        if let Some(kind) = state.write_error {
            return Err(io::Error::new(kind, "write failed"));
        }
        state.writes.push(data.to_vec());
        if let Some(reply) = state.responses.get(data).cloned() {
            state.input.extend_from_slice(&reply);
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.lost {
            return Err(lost());
        }
        state.input.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> io::Result<()> {
        self.state().output_clears += 1;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.state().timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let mut state = self.state();
        state.timeout = timeout;
        state.timeout_changes.push(timeout);
        Ok(())
    }
}

/// Opener that only succeeds for the configurations it was given links for
#[derive(Default)]
pub struct ScriptedOpener {
    links: Vec<(String, ScriptedLink)>,
    attempts: Mutex<Vec<SerialParams>>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept opens at `label` (e.g. `9600/7E1`) with `link`
    pub fn accept(mut self, label: &str, link: ScriptedLink) -> Self {
        self.links.push((label.to_string(), link));
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.to_string())
            .collect()
    }
}

impl LinkOpener for ScriptedOpener {
    fn open(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError> {
        self.attempts.lock().unwrap().push(*params);
        let label = params.to_string();
        match self.links.iter().find(|(l, _)| *l == label) {
            Some((_, link)) => {
                let mut link = link.clone();
                link.set_timeout(params.timeout).unwrap();
                Ok(Box::new(link))
            }
            None => Err(DetectError::OpenFailed {
                port: port.to_string(),
                reason: "refused".to_string(),
            }),
        }
    }
}
