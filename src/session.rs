//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! Per-session state (§3) and the handle types used to address it. A
//! [`Session`] owns its own timer handles (§4.3): FSM actions arm, re-arm,
//! and cancel them directly rather than routing scheduling decisions back
//! through the manager.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::collaborator::{NullPacketTransmit, PacketTransmit};
use crate::config::SessionConfig;
use crate::packet::{DiagnosticCode, Packet, PacketFlags, State};
use crate::tasks::TimeoutTask;
use crate::tasks::messages::TimerMsg;
use crate::timing::SessionTiming;

/// Stable identifier for a session, assigned once at `neigh_add` and never
/// reused before its removal completes (§9 "Ownership of the session
/// table"). The manager pairs this with an arena index; callbacks carry the
/// `SessionId` and re-resolve on entry rather than holding a raw pointer.
pub type SessionId = u64;

/// The two addresses that key a session (§3). The third component of the
/// full key, the local discriminator, lives on [`Session::ldisc`] since it's
/// assigned by the manager at creation time rather than supplied by a
/// caller.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SessionKey {
    pub local_addr: IpAddr,
    pub remote_addr: IpAddr,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.local_addr, self.remote_addr)
    }
}

/// Session-timeout grace slack (§9 "Slack constant"): added on top of
/// `dtime` before `t_session` fires, so the detection timer's own re-arm
/// never races the session-timeout handler's liveness check.
pub const SESSION_TIMEOUT_SLACK: Duration = Duration::from_millis(100);

/// Running counters kept for observability (§10 ambient stack expansion),
/// never consulted by the FSM or the manager's dispatch logic.
#[derive(Debug, Default)]
pub struct SessionStatistics {
    pub tx_packet_count: Arc<AtomicU64>,
    pub rx_packet_count: Arc<AtomicU64>,
    pub rx_error_count: Arc<AtomicU64>,
    pub down_count: Arc<AtomicU64>,
}

/// Owns every timer handle and collaborator reference a session needs to
/// drive its own scheduling (§4.3). Each handle is a one-shot
/// [`TimeoutTask`]; the hello timer is re-armed on every firing rather than
/// run as a fixed-period interval, since §4.1 requires jitter to be redrawn
/// at each scheduling, not cached for the task's lifetime.
#[derive(Debug)]
pub(crate) struct SessionTasks {
    pkt_tx: Arc<dyn PacketTransmit>,
    timer_tx: UnboundedSender<TimerMsg>,
    hello: Option<TimeoutTask>,
    detect: Option<TimeoutTask>,
    session_timeout: Option<TimeoutTask>,
    delete: Option<TimeoutTask>,
    /// Set by [`Session::arm_one_shot_hello`]; the manager consults this
    /// after the hello timer fires to decide whether to transmit-and-cease
    /// (Demand mode, §4.2 point 5) rather than transmit-and-reschedule.
    hello_one_shot: bool,
}

/// A single BFD neighbor session (§3). Fields are public: the FSM (`fsm.rs`)
/// and the manager mutate them directly, matching the single-threaded
/// cooperative model of §5 in which no lock is required.
pub struct Session {
    pub id: SessionId,
    pub key: SessionKey,
    pub config: SessionConfig,

    /// Current FSM state. Mutated only by [`crate::fsm::dispatch`].
    pub status: State,
    /// Previous FSM state, for observers (§3).
    pub ostatus: State,
    /// Last state signalled to the upstream collaborator; may lag `status`
    /// (§9 "Open question").
    pub notify: Option<State>,

    /// Local/remote state value carried in the BFDCP wire field.
    pub lstate: State,
    pub rstate: State,
    /// Local diagnostic code, carried on the wire.
    pub ldiag: DiagnosticCode,

    /// Local discriminator: stable and nonzero for the session's lifetime.
    pub ldisc: u32,
    /// Remote-reported discriminator we echo back as Your Discriminator;
    /// zero until a valid BFDCP has been accepted (§3 invariant).
    pub rdisc: u32,

    pub timing: SessionTiming,
    /// Local/remote protocol flag bits (P, F, C, A, D, M).
    pub lbits: PacketFlags,
    pub rbits: PacketFlags,

    pub recv_cnt: u64,
    pub orecv_cnt: u64,
    pub timer_cnt: u64,

    /// Wall-clock time the session last entered Up; `None` otherwise.
    pub uptime: Option<DateTime<Utc>>,
    /// True while the session is in graceful-shutdown (`neigh_del` called).
    pub del: bool,
    /// Local policy: suppress unsolicited transmission until a packet is
    /// received from the peer.
    pub passive: bool,

    pub statistics: SessionStatistics,
    pub(crate) tasks: SessionTasks,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("status", &self.status)
            .field("lstate", &self.lstate)
            .field("rstate", &self.rstate)
            .field("ldisc", &self.ldisc)
            .field("rdisc", &self.rdisc)
            .field("del", &self.del)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builds a new, freshly-`Down` session wired to real collaborators (§6,
    /// §9 "Ownership of the session table"). Used by
    /// [`crate::manager::SessionManager::neigh_add`].
    pub(crate) fn new(
        id: SessionId,
        key: SessionKey,
        ldisc: u32,
        config: SessionConfig,
        pkt_tx: Arc<dyn PacketTransmit>,
        timer_tx: UnboundedSender<TimerMsg>,
    ) -> Session {
        Session {
            id,
            key,
            config,
            status: State::Down,
            ostatus: State::Down,
            notify: None,
            lstate: State::Down,
            rstate: State::Down,
            ldiag: DiagnosticCode::Nothing,
            ldisc,
            rdisc: 0,
            timing: SessionTiming::default(),
            lbits: PacketFlags::empty(),
            rbits: PacketFlags::empty(),
            recv_cnt: 0,
            orecv_cnt: 0,
            timer_cnt: 0,
            uptime: None,
            del: false,
            passive: config.passive,
            statistics: SessionStatistics::default(),
            tasks: SessionTasks {
                pkt_tx,
                timer_tx,
                hello: None,
                detect: None,
                session_timeout: None,
                delete: None,
                hello_one_shot: false,
            },
        }
    }

    /// Builds a session with no live collaborators: a discarded transmit
    /// sink and a timer channel whose receiver nobody drains. Every timer
    /// method below still works, since under the `testing` feature
    /// [`TimeoutTask`] never invokes its callback in the first place. Used
    /// by unit tests that exercise the FSM in isolation.
    pub fn new_detached(id: SessionId, key: SessionKey, config: SessionConfig) -> Session {
        let (timer_tx, _timer_rx) = tokio::sync::mpsc::unbounded_channel();
        Session::new(
            id,
            key,
            id as u32,
            config,
            Arc::new(NullPacketTransmit),
            timer_tx,
        )
    }

    /// Builds the outbound BFDCP for this session's current local fields
    /// (§6 `pkt_xmit`).
    pub fn generate_packet(&self) -> Packet {
        Packet {
            version: Packet::VERSION,
            diag: self.ldiag as u8,
            state: self.lstate,
            flags: self.lbits,
            detect_mult: self.timing.lmulti,
            my_discr: self.ldisc,
            your_discr: self.rdisc,
            desired_min_tx: self.timing.ldesmintx,
            req_min_rx: self.timing.lreqminrx,
            req_min_echo_rx: self.timing.lreqminechorx,
        }
    }

    /// Applies the per-packet updates the manager performs on every
    /// accepted BFDCP, prior to FSM dispatch (§4.3 "Packet receive path").
    pub fn update_from_packet(&mut self, packet: &Packet) {
        self.rstate = packet.state;
        self.rdisc = packet.my_discr;
        self.rbits = packet.flags;
        self.timing.rreqminrx = packet.req_min_rx;
        self.timing.rdesmintx = packet.desired_min_tx;
        self.timing.rmulti = packet.detect_mult;
        self.timing.rreqminechorx = packet.req_min_echo_rx;
        self.recv_cnt += 1;
        self.statistics.rx_packet_count.fetch_add(1, Ordering::Relaxed);
    }

    // ===== hello (transmit) timer =====

    /// Transmits immediately via the packet-transmit collaborator,
    /// independent of the hello timer's schedule. Used for the single
    /// Final-bit reply and the admdown action's forced retransmission.
    pub fn transmit_now(&self) -> Result<(), crate::error::IoError> {
        let packet = self.generate_packet();
        self.tasks.pkt_tx.pkt_xmit(&self.key, &packet)?;
        self.statistics.tx_packet_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Sends a single BFDCP with the Final bit set, without touching `lbits`
    /// (§6 "the peer's Poll bit was set"): the F-bit reply is a one-shot
    /// property of this packet, not a persisted local flag.
    pub fn transmit_final(&self) -> Result<(), crate::error::IoError> {
        let mut packet = self.generate_packet();
        packet.flags.insert(PacketFlags::F);
        self.tasks.pkt_tx.pkt_xmit(&self.key, &packet)?;
        self.statistics.tx_packet_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn arm_hello_in(&mut self, delay: Duration) {
        let timer_tx = self.tasks.timer_tx.clone();
        let id = self.id;
        self.tasks.hello = Some(TimeoutTask::new(delay, move || async move {
            let _ = timer_tx.send(TimerMsg::Hello(id));
        }));
    }

    /// Arms (or re-arms) the hello timer using a freshly jittered interval,
    /// redrawn at each scheduling per §4.1.
    pub fn rearm_hello(&mut self, rng: &mut impl rand::Rng) {
        self.tasks.hello_one_shot = false;
        let delay = Duration::from_micros(self.timing.jittered_tx_interval(rng) as u64);
        self.arm_hello_in(delay);
    }

    /// Forces an immediate BFDCP transmission by cancelling and re-arming
    /// the hello timer with zero delay (§4.2 admdown action).
    pub fn rearm_hello_immediate(&mut self) {
        self.tasks.hello_one_shot = false;
        self.arm_hello_in(Duration::ZERO);
    }

    /// Arms one more transmission at the current `txint` and then ceases
    /// periodic transmission (§4.2 `up` action, point 5: Demand mode
    /// requested by the peer while we're mid-Poll).
    pub fn arm_one_shot_hello(&mut self) {
        self.tasks.hello_one_shot = true;
        let delay = Duration::from_micros(self.timing.txint as u64);
        self.arm_hello_in(delay);
    }

    /// True if the hello timer's next firing should transmit once and stop,
    /// rather than reschedule itself (consumed by the manager on firing).
    pub fn hello_one_shot(&self) -> bool {
        self.tasks.hello_one_shot
    }

    pub fn cancel_hello(&mut self) {
        self.tasks.hello_one_shot = false;
        self.tasks.hello = None;
    }

    pub fn hello_armed(&self) -> bool {
        self.tasks.hello.is_some()
    }

    // ===== detection timer =====

    /// Arms `t_timer` to the currently-armed detection time (§4.3: "armed on
    /// receipt of every valid BFDCP").
    pub fn arm_detection(&mut self) {
        self.timing.refresh_detection_time();
        let timer_tx = self.tasks.timer_tx.clone();
        let id = self.id;
        let delay = Duration::from_micros(self.timing.dtime as u64);
        self.tasks.detect = Some(TimeoutTask::new(delay, move || async move {
            let _ = timer_tx.send(TimerMsg::Detection(id));
        }));
    }

    pub fn cancel_detection(&mut self) {
        self.tasks.detect = None;
    }

    pub fn detection_armed(&self) -> bool {
        self.tasks.detect.is_some()
    }

    // ===== session-timeout timer =====

    pub fn session_timeout_armed(&self) -> bool {
        self.tasks.session_timeout.is_some()
    }

    /// Arms `t_session` for `dtime + `[`SESSION_TIMEOUT_SLACK`] (§4.3,
    /// §9 "Slack constant").
    pub fn arm_session_timeout(&mut self) {
        let timer_tx = self.tasks.timer_tx.clone();
        let id = self.id;
        let delay = Duration::from_micros(self.timing.dtime as u64) + SESSION_TIMEOUT_SLACK;
        self.tasks.session_timeout = Some(TimeoutTask::new(delay, move || async move {
            let _ = timer_tx.send(TimerMsg::SessionTimeout(id));
        }));
    }

    pub fn cancel_session_timeout(&mut self) {
        self.tasks.session_timeout = None;
    }

    // ===== delete timer =====

    pub fn delete_armed(&self) -> bool {
        self.tasks.delete.is_some()
    }

    /// Arms `t_delete` for the session's grace period: `negtxint × lmulti`
    /// (§4.3; both operands are in microseconds, so the product is read as
    /// microseconds too — see `DESIGN.md` for this reading of the spec's
    /// "milliseconds" wording).
    pub fn arm_delete(&mut self) {
        let timer_tx = self.tasks.timer_tx.clone();
        let id = self.id;
        let grace = self.timing.negtxint as u64 * self.timing.lmulti as u64;
        self.tasks.delete = Some(TimeoutTask::new(Duration::from_micros(grace), move || {
            async move {
                let _ = timer_tx.send(TimerMsg::Delete(id));
            }
        }));
    }

    pub fn cancel_delete(&mut self) {
        self.tasks.delete = None;
    }

    /// Session-timeout housekeeping (§4.3 "Session-timeout timer",
    /// `original_source`'s `bfd_fsm_stimeout`): invoked by the manager when
    /// `t_session` fires. Not an FSM event — `event()` is never called here.
    /// Returns `true` if the neighbor was reset, i.e. no packets arrived
    /// during the window.
    pub fn session_timeout_expiry(&mut self) -> bool {
        if self.status != State::Down || self.orecv_cnt != self.recv_cnt {
            return false;
        }

        self.rdisc = 0;
        self.ldiag = DiagnosticCode::Nothing;
        self.timing.reset_to_defaults();
        self.lbits = PacketFlags::empty();
        self.rbits = PacketFlags::empty();
        self.notify = None;
        self.cancel_session_timeout();

        if self.passive {
            self.cancel_hello();
        }

        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        crate::debug::Debug::SessionDelete(&self.key).log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey {
            local_addr: "10.0.0.1".parse::<IpAddr>().unwrap(),
            remote_addr: "10.0.0.2".parse::<IpAddr>().unwrap(),
        }
    }

    #[test]
    fn new_detached_starts_down_with_no_timers_armed() {
        let sess = Session::new_detached(1, key(), SessionConfig::default());
        assert_eq!(sess.status, State::Down);
        assert_eq!(sess.rdisc, 0);
        assert!(!sess.hello_armed());
        assert!(!sess.detection_armed());
        assert!(!sess.session_timeout_armed());
        assert!(!sess.delete_armed());
    }

    #[test]
    fn update_from_packet_applies_remote_fields_and_counts_receipt() {
        let mut sess = Session::new_detached(1, key(), SessionConfig::default());
        let packet = Packet {
            version: 1,
            diag: 0,
            state: State::Init,
            flags: PacketFlags::empty(),
            detect_mult: 3,
            my_discr: 42,
            your_discr: 0,
            desired_min_tx: 500_000,
            req_min_rx: 500_000,
            req_min_echo_rx: 0,
        };

        sess.update_from_packet(&packet);
        assert_eq!(sess.rstate, State::Init);
        assert_eq!(sess.rdisc, 42);
        assert_eq!(sess.timing.rreqminrx, 500_000);
        assert_eq!(sess.timing.rdesmintx, 500_000);
        assert_eq!(sess.timing.rmulti, 3);
        assert_eq!(sess.recv_cnt, 1);
    }

    #[test]
    fn session_timeout_expiry_resets_only_if_no_packets_arrived_while_down() {
        let mut sess = Session::new_detached(1, key(), SessionConfig::default());
        sess.status = State::Down;
        sess.recv_cnt = 5;
        sess.orecv_cnt = 5;
        sess.rdisc = 7;
        sess.notify = Some(State::Down);

        assert!(sess.session_timeout_expiry());
        assert_eq!(sess.rdisc, 0);
        assert_eq!(sess.notify, None);
        assert_eq!(sess.timing, SessionTiming::default());
    }

    #[test]
    fn session_timeout_expiry_is_a_noop_if_packets_arrived() {
        let mut sess = Session::new_detached(1, key(), SessionConfig::default());
        sess.status = State::Down;
        sess.recv_cnt = 6;
        sess.orecv_cnt = 5;
        sess.rdisc = 7;

        assert!(!sess.session_timeout_expiry());
        assert_eq!(sess.rdisc, 7);
    }

    #[test]
    fn generate_packet_reflects_local_fields() {
        let mut sess = Session::new_detached(1, key(), SessionConfig::default());
        sess.lstate = State::Up;
        sess.ldisc = 9;
        sess.rdisc = 11;
        sess.timing.ldesmintx = 200_000;
        sess.timing.lreqminrx = 200_000;

        let packet = sess.generate_packet();
        assert_eq!(packet.state, State::Up);
        assert_eq!(packet.my_discr, 9);
        assert_eq!(packet.your_discr, 11);
        assert_eq!(packet.desired_min_tx, 200_000);
    }
}
