// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Installed-printer discovery.
//
// Listings are read from the OS on every call and never cached, so printers
// that are plugged in or removed while the agent runs are picked up on the
// next message.  CUPS systems are queried through `lpstat`; Windows through
// PowerShell's `Get-Printer`.

use std::process::Command;
use std::sync::Arc;

use tracing::{debug, instrument};

use spoolbridge_core::error::{AgentError, Result};

/// Read-only view of the printers known to the operating system.
pub trait PrinterDirectory: Send + Sync {
    /// Names of every installed printer, in the order the OS reports them.
    fn list_printers(&self) -> Result<Vec<String>>;

    /// Name of the system default printer.
    fn default_printer(&self) -> Result<String>;
}

/// Pick the directory implementation for the running platform.
pub fn platform_directory() -> Arc<dyn PrinterDirectory> {
    #[cfg(windows)]
    {
        Arc::new(PowerShellDirectory::new())
    }
    #[cfg(not(windows))]
    {
        Arc::new(CupsDirectory::new())
    }
}

// ---------------------------------------------------------------------------
// CUPS
// ---------------------------------------------------------------------------

/// Printer directory backed by the CUPS `lpstat` client.
#[derive(Debug, Clone)]
pub struct CupsDirectory {
    lpstat: String,
}

impl Default for CupsDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl CupsDirectory {
    pub fn new() -> Self {
        Self {
            lpstat: "lpstat".into(),
        }
    }
}

impl PrinterDirectory for CupsDirectory {
    #[instrument(skip(self))]
    fn list_printers(&self) -> Result<Vec<String>> {
        let stdout = run_capture(&self.lpstat, &["-p"])?;
        let printers = parse_lpstat_printers(&stdout);
        debug!(count = printers.len(), "listed CUPS printers");
        Ok(printers)
    }

    #[instrument(skip(self))]
    fn default_printer(&self) -> Result<String> {
        let stdout = run_capture(&self.lpstat, &["-d"])?;
        parse_lpstat_default(&stdout).ok_or_else(|| {
            AgentError::Discovery(format!(
                "could not determine the default printer from lpstat: {}",
                stdout.trim()
            ))
        })
    }
}

/// Extract printer names from `lpstat -p` output.
///
/// Each printer line reads `printer NAME is idle. ...`; localised CUPS builds
/// in Portuguese print `impressora NAME ...` instead.
pub fn parse_lpstat_printers(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("printer ") || line.starts_with("impressora "))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(str::to_owned)
        .collect()
}

/// Extract the default destination from `lpstat -d` output.
pub fn parse_lpstat_default(stdout: &str) -> Option<String> {
    const PREFIXES: [&str; 2] = ["system default destination:", "destino padrão de sistema:"];

    let line = stdout.trim();
    PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Printer directory backed by PowerShell's print-management cmdlets.
#[derive(Debug, Clone)]
pub struct PowerShellDirectory {
    powershell: String,
}

impl Default for PowerShellDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerShellDirectory {
    pub fn new() -> Self {
        Self {
            powershell: "powershell".into(),
        }
    }

    fn query(&self, script: &str) -> Result<String> {
        run_capture(&self.powershell, &["-NoProfile", "-NonInteractive", "-Command", script])
    }
}

impl PrinterDirectory for PowerShellDirectory {
    #[instrument(skip(self))]
    fn list_printers(&self) -> Result<Vec<String>> {
        let stdout = self.query("Get-Printer | Select-Object -ExpandProperty Name")?;
        let printers = parse_name_lines(&stdout);
        debug!(count = printers.len(), "listed Windows printers");
        Ok(printers)
    }

    #[instrument(skip(self))]
    fn default_printer(&self) -> Result<String> {
        let stdout = self.query(
            "Get-Printer | Where-Object {$_.Default -eq $true} | Select-Object -ExpandProperty Name",
        )?;
        parse_name_lines(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Discovery("no default printer is set".into()))
    }
}

/// One printer name per non-blank line.
pub fn parse_name_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Run a query command and return its stdout, folding failures into
/// `AgentError::Discovery` with the captured stderr.
fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AgentError::Discovery(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        return Err(AgentError::Discovery(format!(
            "{program} exited with {} | stderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
