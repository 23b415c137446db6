//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! External interfaces (§6) the core consumes. Socket I/O, routing-daemon
//! wiring, and interface discovery live outside this crate; callers supply
//! implementations of these traits to plug the engine into a real process.

use crate::config::InterfaceParams;
use crate::error::IoError;
use crate::packet::Packet;
use crate::session::SessionKey;

/// Serialises and transmits one BFD Control Packet. Implementations own the
/// UDP socket; the core only ever calls this from its timer-driven Tx path
/// or the immediate Final-bit reply, never inline from `event()`.
pub trait PacketTransmit: std::fmt::Debug + Send + Sync {
    fn pkt_xmit(&self, key: &SessionKey, packet: &Packet) -> Result<(), IoError>;
}

/// Upstream notification and interface-parameter accessor (§6). Exactly one
/// `signal_neigh_up`/`signal_neigh_down` call is made per edge transition;
/// idempotence is the core's responsibility via `Session::notify`.
pub trait RoutingDaemon: std::fmt::Debug + Send + Sync {
    fn signal_neigh_up(&self, key: &SessionKey);
    fn signal_neigh_down(&self, key: &SessionKey);

    /// Interface-level configured parameters (desired Tx/Rx interval,
    /// multiplier, passive/demand flags). Called on every `up` action.
    fn ifinfo_get(&self, key: &SessionKey) -> InterfaceParams;

    /// Refreshes passive mode from current interface state (§4.3
    /// "Session-timeout timer", §6 `neigh_if_passive_update`). Called by
    /// the session-timeout expiry handler rather than folded into
    /// `ifinfo_get`, matching the donor's separate
    /// `bfd_neigh_if_passive_update` call.
    fn neigh_if_passive_update(&self, key: &SessionKey) -> bool;
}

/// A [`RoutingDaemon`] that never signals anything and returns fixed
/// interface parameters. Useful for unit tests and as a default before a real
/// collaborator is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRoutingDaemon {
    pub params: InterfaceParams,
}

impl RoutingDaemon for NullRoutingDaemon {
    fn signal_neigh_up(&self, _key: &SessionKey) {}
    fn signal_neigh_down(&self, _key: &SessionKey) {}
    fn ifinfo_get(&self, _key: &SessionKey) -> InterfaceParams {
        self.params
    }
    fn neigh_if_passive_update(&self, _key: &SessionKey) -> bool {
        self.params.passive
    }
}

/// A [`PacketTransmit`] that discards every packet. Used by the `testing`
/// feature and in unit tests that exercise the FSM without a live socket.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPacketTransmit;

impl PacketTransmit for NullPacketTransmit {
    fn pkt_xmit(&self, _key: &SessionKey, _packet: &Packet) -> Result<(), IoError> {
        Ok(())
    }
}
