use std::io::{self, Write};

use serde::Serialize;

use crate::app::{DatasetsResult, PrepareResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuresResult {
    pub path: String,
    pub structures: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MappingResult {
    pub level: String,
    pub path: String,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_prepare(result: &PrepareResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_datasets(result: &DatasetsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_structures(result: &StructuresResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_mapping(result: &MappingResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Writes progress lines to stderr.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}
