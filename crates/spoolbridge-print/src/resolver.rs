// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Requested-printer → usable-printer mapping.

use std::sync::Arc;

use tracing::{debug, warn};

use spoolbridge_core::DEFAULT_PRINTER;

use crate::directory::PrinterDirectory;

/// Maps the printer named in a job to one the spooler can actually use,
/// falling back to the system default.
#[derive(Clone)]
pub struct PrinterResolver {
    directory: Arc<dyn PrinterDirectory>,
}

impl PrinterResolver {
    pub fn new(directory: Arc<dyn PrinterDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve `requested` to a printer name.  Never fails.
    ///
    /// Empty and `"default"` short-circuit without touching the directory.
    /// A name the OS does not currently report, or a listing failure, falls
    /// back to `"default"`.
    pub fn resolve(&self, requested: &str) -> String {
        if requested.is_empty() || requested == DEFAULT_PRINTER {
            return DEFAULT_PRINTER.to_owned();
        }

        match self.directory.list_printers() {
            Ok(printers) if printers.iter().any(|p| p == requested) => {
                debug!(printer = requested, "requested printer is installed");
                requested.to_owned()
            }
            Ok(_) => {
                warn!(
                    printer = requested,
                    "requested printer not installed, falling back to default"
                );
                DEFAULT_PRINTER.to_owned()
            }
            Err(e) => {
                warn!(
                    printer = requested,
                    error = %e,
                    "could not list printers, falling back to default"
                );
                DEFAULT_PRINTER.to_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use spoolbridge_core::error::{AgentError, Result};

    use super::*;

    /// Directory with a fixed listing that counts how often it is asked.
    struct FixedDirectory {
        printers: Option<Vec<String>>,
        lookups: AtomicUsize,
    }

    impl FixedDirectory {
        fn with(printers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                printers: Some(printers.iter().map(|p| p.to_string()).collect()),
                lookups: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                printers: None,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    impl PrinterDirectory for FixedDirectory {
        fn list_printers(&self) -> Result<Vec<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.printers
                .clone()
                .ok_or_else(|| AgentError::Discovery("lpstat: scheduler is not running".into()))
        }

        fn default_printer(&self) -> Result<String> {
            Err(AgentError::Discovery("unused".into()))
        }
    }

    #[test]
    fn empty_and_default_never_query_the_directory() {
        for listing in [FixedDirectory::with(&[]), FixedDirectory::with(&["default", "A"])] {
            let resolver = PrinterResolver::new(listing.clone());
            assert_eq!(resolver.resolve(""), "default");
            assert_eq!(resolver.resolve("default"), "default");
            assert_eq!(listing.lookups.load(Ordering::SeqCst), 0);
        }

        let resolver = PrinterResolver::new(FixedDirectory::failing());
        assert_eq!(resolver.resolve(""), "default");
        assert_eq!(resolver.resolve("default"), "default");
    }

    #[test]
    fn installed_printer_is_returned_unchanged() {
        let resolver = PrinterResolver::new(FixedDirectory::with(&["Bar", "Kitchen"]));
        assert_eq!(resolver.resolve("Kitchen"), "Kitchen");
    }

    #[test]
    fn unknown_printer_falls_back_to_default() {
        let resolver = PrinterResolver::new(FixedDirectory::with(&["Bar"]));
        assert_eq!(resolver.resolve("Kitchen"), "default");
    }

    #[test]
    fn listing_failure_falls_back_to_default() {
        let resolver = PrinterResolver::new(FixedDirectory::failing());
        assert_eq!(resolver.resolve("Kitchen"), "default");
    }

    #[test]
    fn match_is_exact() {
        let resolver = PrinterResolver::new(FixedDirectory::with(&["kitchen"]));
        assert_eq!(resolver.resolve("Kitchen"), "default");
    }
}
