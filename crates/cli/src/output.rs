//! Command output.
//!
//! Results go to stdout, either as readable text or as pretty JSON with
//! `--json`. Logs go to stderr through tracing.

use std::io::{self, Write};

use serde::Serialize;

use crate::commands::CliError;

/// Where and how command results are written.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    json: bool,
}

impl Output {
    pub const fn new(json: bool) -> Self {
        Self { json }
    }

    /// Write `value` as JSON, or through `render` as text.
    pub fn show<T, F>(&self, value: &T, render: F) -> Result<(), CliError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&mut dyn Write, &T) -> io::Result<()>,
    {
        let mut stdout = io::stdout().lock();
        if self.json {
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        } else {
            render(&mut stdout, value)?;
        }
        stdout.flush()?;
        Ok(())
    }

    /// Write a one-line status message.
    pub fn message(&self, text: &str) -> Result<(), CliError> {
        self.show(&serde_json::json!({ "message": text }), |out, _| {
            writeln!(out, "{text}")
        })
    }
}
