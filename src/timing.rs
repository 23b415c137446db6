//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! Timing model (§4.1): negotiated Tx interval, jitter, and detection time.
//!
//! All fields here are microseconds, matching the BFDCP wire encoding.
//! Interface-level configuration (milliseconds) is converted on read by
//! [`crate::config::SessionConfig`].

use rand::Rng;
use serde::{Deserialize, Serialize};

/// RFC 5880 suggested default: 1 second, in microseconds.
pub const DEFAULT_INTERVAL_US: u32 = 1_000_000;
/// RFC 5880 suggested default detect multiplier.
pub const DEFAULT_MULTIPLIER: u8 = 3;

/// Per-session timing parameters (§3, `ldesmintx`/`lreqminrx`/... attributes).
#[derive(Clone, Copy, Debug, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SessionTiming {
    /// Local Desired Min Tx Interval, active value.
    pub ldesmintx: u32,
    /// Local Desired Min Tx Interval, pending value (meaningful while `P` is
    /// set).
    pub ldesmintx_a: u32,
    /// Local Required Min Rx Interval, active value.
    pub lreqminrx: u32,
    /// Local Required Min Rx Interval, pending value.
    pub lreqminrx_a: u32,
    /// Peer's advertised Required Min Rx Interval.
    pub rreqminrx: u32,
    /// Peer's advertised Desired Min Tx Interval.
    pub rdesmintx: u32,
    /// Local Required Min Echo Rx Interval (carried, Echo is out of scope).
    pub lreqminechorx: u32,
    /// Peer's advertised Required Min Echo Rx Interval.
    pub rreqminechorx: u32,
    /// Negotiated base Tx interval, `max(rreqminrx, ldesmintx)`.
    pub negtxint: u32,
    /// Actual (jittered) Tx interval currently armed on `t_hello`.
    pub txint: u32,
    /// Local detect multiplier.
    pub lmulti: u8,
    /// Peer's advertised detect multiplier.
    pub rmulti: u8,
    /// Detection time currently armed on `t_timer`.
    pub dtime: u32,
}

impl Default for SessionTiming {
    fn default() -> SessionTiming {
        SessionTiming {
            ldesmintx: DEFAULT_INTERVAL_US,
            ldesmintx_a: DEFAULT_INTERVAL_US,
            lreqminrx: DEFAULT_INTERVAL_US,
            lreqminrx_a: DEFAULT_INTERVAL_US,
            rreqminrx: DEFAULT_INTERVAL_US,
            rdesmintx: DEFAULT_INTERVAL_US,
            lreqminechorx: 0,
            rreqminechorx: 0,
            negtxint: DEFAULT_INTERVAL_US,
            txint: DEFAULT_INTERVAL_US,
            lmulti: DEFAULT_MULTIPLIER,
            rmulti: DEFAULT_MULTIPLIER,
            dtime: DEFAULT_MULTIPLIER as u32 * DEFAULT_INTERVAL_US,
        }
    }
}

impl SessionTiming {
    /// Computes the negotiated base transmit interval (§4.1):
    /// `negtxint = max(rreqminrx, ldesmintx)`.
    pub fn negotiated_tx_interval(&self) -> u32 {
        std::cmp::max(self.rreqminrx, self.ldesmintx)
    }

    /// Draws a fresh jittered Tx interval from `negtxint`, redrawn per
    /// scheduling rather than cached (to avoid lock-step with the peer).
    ///
    /// `rmulti == 1` restricts the jitter to the tighter `[0.75, 0.90]`
    /// range; otherwise `[0.75, 1.00]` is used.
    pub fn jittered_tx_interval(&self, rng: &mut impl Rng) -> u32 {
        let upper = if self.rmulti == 1 { 0.90 } else { 1.00 };
        let factor = rng.random_range(0.75..=upper);
        (self.negtxint as f64 * factor) as u32
    }

    /// Recomputes `negtxint` and redraws `txint`, e.g. after committing a
    /// Poll Sequence or learning a new peer-advertised interval.
    pub fn renegotiate_tx(&mut self, rng: &mut impl Rng) {
        self.negtxint = self.negotiated_tx_interval();
        self.txint = self.jittered_tx_interval(rng);
    }

    /// Computes the detection time (§4.1, also "Detection time" in the
    /// glossary): `rmulti * max(lreqminrx, rdesmintx)`.
    pub fn detection_time(&self) -> u32 {
        self.rmulti as u32 * std::cmp::max(self.lreqminrx, self.rdesmintx)
    }

    /// Recomputes and stores the currently-armed detection time.
    pub fn refresh_detection_time(&mut self) {
        self.dtime = self.detection_time();
    }

    /// Resets every field to RFC 5880 suggested defaults, as performed by the
    /// session-timeout handler (§4.3) when a neighbor is declared dead.
    pub fn reset_to_defaults(&mut self) {
        *self = SessionTiming::default();
    }
}
