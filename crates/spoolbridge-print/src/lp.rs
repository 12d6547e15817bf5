// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// POSIX raw printing through the CUPS `lp` client.
//
// The payload is piped to `lp -o raw` so CUPS forwards it to the device
// without running any filter.  The call blocks until `lp` exits; `lp` exits
// as soon as the job is queued, not when the paper comes out.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{info, instrument, warn};

use spoolbridge_core::DEFAULT_PRINTER;
use spoolbridge_core::error::{AgentError, Result};

use crate::backend::RawPrintBackend;
use crate::directory::PrinterDirectory;

/// Raw print backend that shells out to `lp`.
pub struct LpBackend {
    directory: Arc<dyn PrinterDirectory>,
    program: String,
    leading_args: Vec<String>,
}

impl LpBackend {
    pub fn new(directory: Arc<dyn PrinterDirectory>) -> Self {
        Self::with_command(directory, "lp", Vec::new())
    }

    /// Use a different spooler client.  `leading_args` are placed before the
    /// `lp`-style arguments built for each job.
    pub fn with_command(
        directory: Arc<dyn PrinterDirectory>,
        program: impl Into<String>,
        leading_args: Vec<String>,
    ) -> Self {
        Self {
            directory,
            program: program.into(),
            leading_args,
        }
    }

    /// Pick the `-d` destination for `printer`.
    ///
    /// `"default"` is looked up best-effort; when the lookup fails the job is
    /// submitted without a destination and CUPS applies its own default.
    fn destination(&self, printer: &str) -> Option<String> {
        if !printer.is_empty() && printer != DEFAULT_PRINTER {
            return Some(printer.to_owned());
        }

        match self.directory.default_printer() {
            Ok(name) => {
                info!(printer = %name, "default printer detected");
                Some(name)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "default printer unknown, submitting without a destination"
                );
                None
            }
        }
    }
}

/// Arguments for a raw `lp` submission.
pub fn lp_args(destination: Option<&str>) -> Vec<String> {
    let mut args = Vec::with_capacity(4);
    if let Some(name) = destination {
        args.push("-d".to_owned());
        args.push(name.to_owned());
    }
    args.push("-o".to_owned());
    args.push("raw".to_owned());
    args
}

impl RawPrintBackend for LpBackend {
    fn name(&self) -> &'static str {
        "lp"
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    fn print_raw(&self, printer: &str, payload: &[u8]) -> Result<()> {
        let destination = self.destination(printer);
        let args = lp_args(destination.as_deref());

        info!(
            destination = destination.as_deref().unwrap_or("<system default>"),
            "submitting raw job to lp"
        );

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::Spooler(format!("failed to start {}: {e}", self.program)))?;

        // Close stdin before waiting so lp sees end-of-input.
        let write_result = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(payload),
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .map_err(|e| AgentError::Spooler(format!("waiting for {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(AgentError::Spooler(format!(
                "{} exited with {} | stderr: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        write_result.map_err(|e| {
            AgentError::Spooler(format!("{} closed its input early: {e}", self.program))
        })?;

        info!(
            response = %String::from_utf8_lossy(&output.stdout).trim(),
            "raw job accepted by spooler"
        );
        Ok(())
    }
}
