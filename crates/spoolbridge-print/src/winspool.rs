// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Windows raw printing through the native spooler API (winspool.drv).
//
// A raw job is a strict bracket sequence:
//
//   OpenPrinterW
//     StartDocPrinterW (datatype "RAW")
//       StartPagePrinter
//         WritePrinter
//       EndPagePrinter
//     EndDocPrinter
//   ClosePrinter
//
// Each opened level is an RAII guard, so a failure part-way through still
// unwinds every level that was entered.  Leaving a document open wedges the
// queue until the spooler service is restarted.

use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Graphics::Printing::{
    ClosePrinter, DOC_INFO_1W, EndDocPrinter, EndPagePrinter, OpenPrinterW, StartDocPrinterW,
    StartPagePrinter, WritePrinter,
};

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_core::{DEFAULT_PRINTER, JobId};

use crate::backend::RawPrintBackend;
use crate::directory::PrinterDirectory;

/// Raw print backend driving winspool directly.
pub struct WinspoolBackend {
    directory: Arc<dyn PrinterDirectory>,
}

impl WinspoolBackend {
    pub fn new(directory: Arc<dyn PrinterDirectory>) -> Self {
        Self { directory }
    }

    /// Winspool needs a concrete queue name, so an unknown default is an error.
    fn target(&self, printer: &str) -> Result<String> {
        if !printer.is_empty() && printer != DEFAULT_PRINTER {
            return Ok(printer.to_owned());
        }
        let name = self.directory.default_printer().map_err(|e| {
            AgentError::PrinterUnavailable(format!("cannot resolve default printer: {e}"))
        })?;
        info!(printer = %name, "default printer detected");
        Ok(name)
    }
}

impl RawPrintBackend for WinspoolBackend {
    fn name(&self) -> &'static str {
        "winspool"
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    fn print_raw(&self, printer: &str, payload: &[u8]) -> Result<()> {
        let target = self.target(printer)?;
        let doc_name = format!("Spoolbridge job {}", JobId::new());

        let handle = PrinterHandle::open(&target)?;
        let document = Document::start(&handle, &doc_name)?;
        let page = Page::start(&handle)?;
        handle.write_all(payload)?;

        // Close page and document explicitly so the order is visible here;
        // on the error paths above the guards unwind in the same order.
        drop(page);
        drop(document);
        drop(handle);

        info!(printer = %target, document = %doc_name, "raw job handed to spooler");
        Ok(())
    }
}

/// NUL-terminated UTF-16 for the W-suffixed APIs.
fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// Open printer handle; closed on drop.
struct PrinterHandle {
    raw: HANDLE,
    name: String,
}

impl PrinterHandle {
    fn open(name: &str) -> Result<Self> {
        let wide = to_wide(name);
        // Null is the "no handle" value OpenPrinterW overwrites on success.
        let mut raw: HANDLE = ptr::null_mut();

        // SAFETY: `wide` is NUL-terminated and outlives the call; `raw` is a
        // valid out-pointer; null defaults request the caller's access rights.
        let ok = unsafe { OpenPrinterW(wide.as_ptr(), &mut raw, ptr::null()) };
        if ok == 0 {
            return Err(AgentError::PrinterUnavailable(format!(
                "OpenPrinterW({name}): {}",
                io::Error::last_os_error()
            )));
        }

        debug!(printer = name, "printer handle opened");
        Ok(Self {
            raw,
            name: name.to_owned(),
        })
    }

    /// Write the whole payload in a single `WritePrinter` call.
    fn write_all(&self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            AgentError::Spooler(format!("payload of {} bytes is too large", payload.len()))
        })?;
        let mut written: u32 = 0;

        // SAFETY: the handle is open with a page started; `payload` is valid
        // for `len` bytes and `written` is a valid out-pointer.
        let ok = unsafe { WritePrinter(self.raw, payload.as_ptr().cast(), len, &mut written) };
        if ok == 0 {
            return Err(AgentError::Spooler(format!(
                "WritePrinter({}): {}",
                self.name,
                io::Error::last_os_error()
            )));
        }
        if written != len {
            return Err(AgentError::Spooler(format!(
                "WritePrinter({}) wrote {written} of {len} bytes",
                self.name
            )));
        }
        Ok(())
    }
}

impl Drop for PrinterHandle {
    fn drop(&mut self) {
        // SAFETY: `raw` came from a successful OpenPrinterW and is closed once.
        if unsafe { ClosePrinter(self.raw) } == 0 {
            warn!(printer = %self.name, error = %io::Error::last_os_error(), "ClosePrinter failed");
        }
    }
}

/// Open spooler document; ended on drop.
struct Document<'a> {
    printer: &'a PrinterHandle,
}

impl<'a> Document<'a> {
    fn start(printer: &'a PrinterHandle, doc_name: &str) -> Result<Self> {
        let mut name = to_wide(doc_name);
        let mut datatype = to_wide("RAW");
        let info = DOC_INFO_1W {
            pDocName: name.as_mut_ptr(),
            pOutputFile: ptr::null_mut(),
            pDatatype: datatype.as_mut_ptr(),
        };

        // SAFETY: the handle is open; `info` and the buffers it points into
        // live until the call returns.
        let job = unsafe { StartDocPrinterW(printer.raw, 1, &info) };
        if job == 0 {
            return Err(AgentError::Spooler(format!(
                "StartDocPrinterW({}): {}",
                printer.name,
                io::Error::last_os_error()
            )));
        }

        debug!(printer = %printer.name, spooler_job = job, "document started");
        Ok(Self { printer })
    }
}

impl Drop for Document<'_> {
    fn drop(&mut self) {
        // SAFETY: a document was started on this handle and is ended once.
        if unsafe { EndDocPrinter(self.printer.raw) } == 0 {
            warn!(
                printer = %self.printer.name,
                error = %io::Error::last_os_error(),
                "EndDocPrinter failed"
            );
        }
    }
}

/// Open page within a document; ended on drop.
struct Page<'a> {
    printer: &'a PrinterHandle,
}

impl<'a> Page<'a> {
    fn start(printer: &'a PrinterHandle) -> Result<Self> {
        // SAFETY: the handle is open with a document started.
        if unsafe { StartPagePrinter(printer.raw) } == 0 {
            return Err(AgentError::Spooler(format!(
                "StartPagePrinter({}): {}",
                printer.name,
                io::Error::last_os_error()
            )));
        }
        Ok(Self { printer })
    }
}

impl Drop for Page<'_> {
    fn drop(&mut self) {
        // SAFETY: a page was started on this handle and is ended once.
        if unsafe { EndPagePrinter(self.printer.raw) } == 0 {
            warn!(
                printer = %self.printer.name,
                error = %io::Error::last_os_error(),
                "EndPagePrinter failed"
            );
        }
    }
}
