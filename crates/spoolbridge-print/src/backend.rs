// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The raw-print capability and its platform dispatch.
//
// Call sites only ever see `dyn RawPrintBackend`; the concrete spooler path
// is chosen once, at startup, by `platform_backend`.

use std::sync::Arc;

use spoolbridge_core::error::Result;

use crate::directory::PrinterDirectory;

/// Delivers pre-formatted bytes to a printer in raw/passthrough mode.
///
/// Implementations block until the spooler has accepted (or rejected) the
/// job; async callers run them on `spawn_blocking`.
pub trait RawPrintBackend: Send + Sync {
    /// Short identifier used in logs (e.g. `"lp"`, `"winspool"`).
    fn name(&self) -> &'static str;

    /// Send `payload` to `printer`.  `"default"` means the OS default.
    fn print_raw(&self, printer: &str, payload: &[u8]) -> Result<()>;
}

/// Build the backend for the running platform.
pub fn platform_backend(directory: Arc<dyn PrinterDirectory>) -> Arc<dyn RawPrintBackend> {
    #[cfg(windows)]
    {
        Arc::new(crate::winspool::WinspoolBackend::new(directory))
    }
    #[cfg(unix)]
    {
        Arc::new(crate::lp::LpBackend::new(directory))
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = directory;
        Arc::new(UnsupportedBackend)
    }
}

/// Backend for targets with no known spooler.
#[cfg(not(any(unix, windows)))]
pub struct UnsupportedBackend;

#[cfg(not(any(unix, windows)))]
impl RawPrintBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn print_raw(&self, _printer: &str, _payload: &[u8]) -> Result<()> {
        tracing::warn!("raw print requested on a platform without a spooler");
        Err(spoolbridge_core::AgentError::PlatformUnavailable)
    }
}
