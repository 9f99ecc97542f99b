//! Fakes for testing without side effects
//!
//! The crate's mockall mocks are only compiled for its unit tests, so the
//! integration tests use these hand-written fakes that record every call
//! behind shared handles.

#![allow(dead_code)]

use anyhow::{bail, Result};
use plinth_extensions::catalog::{FormField, Header, Transport, TransportResponse};
use plinth_extensions::runner::MigrationRunner;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One runner invocation: direction and script file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCall {
    pub direction: &'static str,
    pub script: String,
}

/// Records every script it runs; scripts named in `fail_on` error
#[derive(Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<RunnerCall>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, script: &str) {
        self.failing.lock().unwrap().insert(script.to_string());
    }

    pub fn succeed_on(&self, script: &str) {
        self.failing.lock().unwrap().remove(script);
    }

    pub fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Script names run in one direction, in order
    pub fn scripts(&self, direction: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.direction == direction)
            .map(|call| call.script)
            .collect()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, direction: &'static str, script: &Path) -> Result<()> {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(RunnerCall {
            direction,
            script: name.clone(),
        });
        if self.failing.lock().unwrap().contains(&name) {
            bail!("{} failed on purpose", name);
        }
        Ok(())
    }
}

impl MigrationRunner for RecordingRunner {
    fn up(&self, script: &Path) -> Result<()> {
        self.record("up", script)
    }

    fn down(&self, script: &Path) -> Result<()> {
        self.record("down", script)
    }
}

/// One request seen by the transport
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: Vec<Header>,
    pub form: Vec<FormField>,
}

impl RecordedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Answers requests from queues, in order
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<TransportResponse>>>,
    downloads: Arc<Mutex<VecDeque<(u16, Vec<u8>)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, code: u16, body: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(TransportResponse::new(code, body));
        self
    }

    pub fn serve_file(&self, code: u16, bytes: &[u8]) -> &Self {
        self.downloads
            .lock()
            .unwrap()
            .push_back((code, bytes.to_vec()));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, url: &str, headers: &[Header], form: &[FormField]) {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            headers: headers.to_vec(),
            form: form.to_vec(),
        });
    }

    fn next_response(&self, url: &str) -> Result<TransportResponse> {
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => Ok(response),
            None => bail!("no response scripted for {}", url),
        }
    }
}

impl Transport for ScriptedTransport {
    fn post(&self, url: &str, headers: &[Header], form: &[FormField]) -> Result<TransportResponse> {
        self.record(url, headers, form);
        self.next_response(url)
    }

    fn get(&self, url: &str) -> Result<TransportResponse> {
        self.record(url, &[], &[]);
        self.next_response(url)
    }

    fn download(&self, url: &str, headers: &[Header], form: &[FormField], destination: &Path) -> Result<u16> {
        self.record(url, headers, form);
        let Some((code, bytes)) = self.downloads.lock().unwrap().pop_front() else {
            bail!("no file scripted for {}", url);
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(destination, bytes)?;
        Ok(code)
    }
}
