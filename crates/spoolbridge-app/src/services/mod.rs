// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: wires the relay crates together and exposes the control
// plane on a local socket.

pub mod agent_services;
pub mod control_server;
