// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local control-plane listener.
//
// Newline-delimited JSON over TCP on the loopback interface: one request per
// line, one response line per request.  Each connection runs in its own
// task; the accept loop exits on the shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use spoolbridge_core::error::{AgentError, Result};
use spoolbridge_relay::{ControlHandler, ControlResponse};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default control address.
pub const DEFAULT_CONTROL_ADDR: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 8089);

pub struct ControlServer {
    addr: SocketAddr,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
}

impl ControlServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
        }
    }

    /// Bind and start accepting.  Returns the bound address.
    pub async fn start(&mut self, handler: Arc<ControlHandler>) -> Result<SocketAddr> {
        if self.task_handle.is_some() {
            debug!(addr = %self.addr, "control server already running");
            return Ok(self.addr);
        }

        let listener = TcpListener::bind(self.addr).await?;
        let bound = listener.local_addr()?;
        self.addr = bound;
        info!(addr = %bound, "control server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        self.task_handle = Some(tokio::spawn(accept_loop(listener, shutdown, handler)));
        Ok(bound)
    }

    /// Stop accepting.  Open connections finish on their own.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Ok(());
        };

        info!(addr = %self.addr, "stopping control server");
        self.shutdown_signal.notify_one();
        handle.await.map_err(|e| {
            AgentError::Io(std::io::Error::other(format!("control server task: {e}")))
        })?;
        info!(addr = %self.addr, "control server stopped");
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, handler: Arc<ControlHandler>) {
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("control accept loop received shutdown signal");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(peer = %peer, "control client connected");
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, handler).await {
                            warn!(peer = %peer, error = %e, "control connection error");
                        }
                        debug!(peer = %peer, "control client disconnected");
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept control connection"),
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, handler: Arc<ControlHandler>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }

        let response: ControlResponse = handler.handle(request).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
    }
    Ok(())
}
