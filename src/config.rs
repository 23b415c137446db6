//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! Operator-configurable knobs, normally seeded from northbound/YANG in the
//! donor codebase. Northbound integration is out of scope for this core (see
//! the crate's top-level documentation), so this module exposes plain Rust
//! defaults instead: the values the FSM's `up` action reads through
//! [`crate::collaborator::RoutingDaemon::ifinfo_get`].

use serde::{Deserialize, Serialize};

use crate::timing::{DEFAULT_INTERVAL_US, DEFAULT_MULTIPLIER};

/// Interface-level BFD parameters, in milliseconds (§4.1: "interface
/// configuration values are milliseconds and converted on read").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceParams {
    pub interval_ms: u32,
    pub minrx_ms: u32,
    pub multiplier: u8,
    pub passive: bool,
    pub demand_mode: bool,
}

impl Default for InterfaceParams {
    fn default() -> InterfaceParams {
        InterfaceParams {
            interval_ms: DEFAULT_INTERVAL_US / 1000,
            minrx_ms: DEFAULT_INTERVAL_US / 1000,
            multiplier: DEFAULT_MULTIPLIER,
            passive: false,
            demand_mode: false,
        }
    }
}

impl InterfaceParams {
    /// Desired Min Tx Interval in microseconds.
    pub fn desired_min_tx_us(&self) -> u32 {
        self.interval_ms * 1000
    }

    /// Required Min Rx Interval in microseconds.
    pub fn required_min_rx_us(&self) -> u32 {
        self.minrx_ms * 1000
    }
}

/// Per-session configuration, the narrow surface a caller sets on
/// [`crate::manager::SessionManager::neigh_add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[derive(Deserialize, Serialize)]
pub struct SessionConfig {
    pub interval_ms: u32,
    pub minrx_ms: u32,
    pub multiplier: u8,
    pub admin_down: bool,
    pub passive: bool,
    pub demand_mode: bool,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            interval_ms: DEFAULT_INTERVAL_US / 1000,
            minrx_ms: DEFAULT_INTERVAL_US / 1000,
            multiplier: DEFAULT_MULTIPLIER,
            admin_down: false,
            passive: false,
            demand_mode: false,
        }
    }
}

/// Lets a [`RoutingDaemon`](crate::collaborator::RoutingDaemon)
/// implementation fall back to the session's own configured knobs for
/// `ifinfo_get` when it has no separate per-interface configuration layer to
/// consult (e.g. a single statically-configured session, or a test double).
impl From<SessionConfig> for InterfaceParams {
    fn from(config: SessionConfig) -> InterfaceParams {
        InterfaceParams {
            interval_ms: config.interval_ms,
            minrx_ms: config.minrx_ms,
            multiplier: config.multiplier,
            passive: config.passive,
            demand_mode: config.demand_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_converts_into_matching_interface_params() {
        let config = SessionConfig {
            interval_ms: 250,
            minrx_ms: 250,
            multiplier: 5,
            admin_down: false,
            passive: true,
            demand_mode: false,
        };
        let iface: InterfaceParams = config.into();
        assert_eq!(iface.interval_ms, 250);
        assert_eq!(iface.minrx_ms, 250);
        assert_eq!(iface.multiplier, 5);
        assert!(iface.passive);
    }
}
