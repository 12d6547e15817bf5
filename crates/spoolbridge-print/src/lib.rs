// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spoolbridge Print: printer discovery, printer-name resolution, and raw
// delivery of pre-formatted bytes to the operating system's print spooler.
// Nothing in this crate transforms content; payloads arrive already encoded
// in the target printer's command language.

pub mod backend;
pub mod directory;
#[cfg(unix)]
pub mod lp;
pub mod resolver;
#[cfg(windows)]
pub mod winspool;

pub use backend::{RawPrintBackend, platform_backend};
pub use directory::{PrinterDirectory, platform_directory};
pub use resolver::PrinterResolver;
