use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ClassifyResult, ProcessResult, SlugifyResult, StatusResult};
use crate::backup::BackupReport;
use crate::export::ExportReport;
use crate::report::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

/// Machine-readable command results on stdout.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_process(result: &ProcessResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_classify(result: &ClassifyResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_slugify(result: &SlugifyResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_backup(result: &BackupReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportReport) -> io::Result<()> {
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

/// Stdout carries only the JSON document, so events are dropped.
impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}
