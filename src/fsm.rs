//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

//! The session finite-state machine (§4.2): four states, six events, and a
//! transition table of (action, next-state) pairs. This is the hardest
//! engineering in the crate — state transitions driven by packet-receive
//! events and timer expiries, the Poll/Final handshake, and the graceful
//! AdminDown shutdown protocol all live here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborator::RoutingDaemon;
use crate::config::InterfaceParams;
use crate::debug::Debug;
use crate::error::Error;
use crate::packet::{DiagnosticCode, PacketFlags, State};
use crate::session::Session;

/// The six event kinds the FSM dispatcher accepts (§4.2).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Event {
    /// Peer's `State` field decoded as `AdminDown`.
    RecvAdminDown,
    /// Peer's `State` field decoded as `Down`.
    RecvDown,
    /// Peer's `State` field decoded as `Init`.
    RecvInit,
    /// Peer's `State` field decoded as `Up`.
    RecvUp,
    /// Detection timer (`t_timer`) expiry.
    Timer,
    /// Local administrative removal request.
    Delete,
}

impl std::fmt::Display for Event {
    // Matches the donor C implementation's `bfd_event_str[]` table, carried
    // forward per the supplement in the crate's top-level documentation.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Event::RecvAdminDown => "RecvAdminDown",
            Event::RecvDown => "RecvDown",
            Event::RecvInit => "RecvInit",
            Event::RecvUp => "RecvUp",
            Event::Timer => "Timer",
            Event::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

// The action a (state, event) pair dispatches to, prior to running it. Kept
// separate from `Event` itself so the table below stays a flat, reviewable
// lookup rather than a pile of closures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Action {
    Discard,
    Ignore,
    Init,
    Up,
    Down,
    AdmDown,
}

// The transition table (§4.2, §9 "Dispatch table"): a tagged match over
// (state, event) rather than a 2D array, so the impossibility of e.g.
// `AdminDown` advancing on `RecvUp` is explicit at the type level while
// remaining a direct transliteration of the protocol spec's table.
fn transition(state: State, event: Event) -> (Action, State) {
    match state {
        State::AdminDown => (Action::Discard, State::AdminDown),

        State::Down => match event {
            Event::RecvAdminDown => (Action::Ignore, State::Down),
            Event::RecvDown => (Action::Init, State::Init),
            Event::RecvInit => (Action::Up, State::Up),
            Event::RecvUp => (Action::Ignore, State::Down),
            Event::Timer => (Action::Down, State::Down),
            Event::Delete => (Action::AdmDown, State::AdminDown),
        },

        State::Init => match event {
            Event::RecvAdminDown => (Action::AdmDown, State::Down),
            Event::RecvDown => (Action::Init, State::Init),
            Event::RecvInit => (Action::Up, State::Up),
            Event::RecvUp => (Action::Up, State::Up),
            Event::Timer => (Action::Down, State::Down),
            Event::Delete => (Action::AdmDown, State::AdminDown),
        },

        State::Up => match event {
            Event::RecvAdminDown => (Action::AdmDown, State::Down),
            Event::RecvDown => (Action::Down, State::Down),
            Event::RecvInit => (Action::Up, State::Up),
            Event::RecvUp => (Action::Up, State::Up),
            Event::Timer => (Action::Down, State::Down),
            Event::Delete => (Action::AdmDown, State::AdminDown),
        },
    }
}

/// Dispatches `event` against `session`'s current state (§4.2, §6
/// `event()`). Returns `Err` for the *discard* outcome (packet dropped, not
/// counted toward liveness bookkeeping); the session's state is provably
/// unchanged in that case. `iface` is the interface-parameter snapshot the
/// `up` action reads to decide whether a Poll Sequence is needed.
pub fn dispatch(
    session: &mut Session,
    event: Event,
    iface: &InterfaceParams,
    now: DateTime<Utc>,
    routing: &dyn RoutingDaemon,
) -> Result<(), Error> {
    let from = session.status;
    let (action, next) = transition(from, event);

    let result = match action {
        Action::Discard => Err(Error::Discard(from, event)),
        Action::Ignore => Ok(()),
        Action::Init => {
            action_init(session, now);
            Ok(())
        }
        Action::Up => {
            action_up(session, iface, now, routing);
            Ok(())
        }
        Action::Down => {
            action_down(session, now, routing);
            Ok(())
        }
        Action::AdmDown => {
            action_admdown(session);
            Ok(())
        }
    };

    if result.is_ok() && next != session.status {
        Debug::FsmEvent(&session.key, event, from, next).log();
        session.ostatus = session.status;
        session.status = next;
    }

    result
}

// *init* (§4.2): entered from `Down` on `RecvDown`, or re-entered from
// `Init` on `RecvDown`.
fn action_init(session: &mut Session, _now: DateTime<Utc>) {
    session.lstate = State::Init;
    session.uptime = None;

    if session.notify != Some(State::Init) {
        session.notify = Some(State::Init);
    }

    // §8 scenario 6: a passive session that cancelled `t_hello` while Down
    // resumes periodic transmission once it hears from the peer.
    if !session.hello_armed() {
        session.rearm_hello(&mut rand::rng());
    }
}

// *up* (§4.2): the bulk of the negotiation logic — Poll Sequence handling,
// Demand mode, and the one-time "neighbor up" signal all live here.
fn action_up(
    session: &mut Session,
    iface: &InterfaceParams,
    now: DateTime<Utc>,
    routing: &dyn RoutingDaemon,
) {
    session.lstate = State::Up;

    // §8 scenario 6: same passive-awakening rule as `action_init`, for the
    // direct Down→Up edge (peer already Up when we first hear from it).
    if !session.hello_armed() {
        session.rearm_hello(&mut rand::rng());
    }

    if session.rstate != State::Up {
        return;
    }

    if session.notify != Some(State::Up) {
        routing.signal_neigh_up(&session.key);
        session.notify = Some(State::Up);
    }

    // Poll Sequence: if either of our two configured parameters is out of
    // date and we're not already in the middle of answering a Poll
    // ourselves (`F` set locally), either commit the peer's acknowledgement
    // or initiate a fresh Poll.
    let want_tx = iface.desired_min_tx_us();
    let want_rx = iface.required_min_rx_us();
    if (session.timing.ldesmintx != want_tx || session.timing.lreqminrx != want_rx)
        && !session.lbits.contains(PacketFlags::F)
    {
        if session.rbits.contains(PacketFlags::F) {
            // The peer answered our Poll: commit the pending values.
            session.timing.ldesmintx = session.timing.ldesmintx_a;
            session.timing.lreqminrx = session.timing.lreqminrx_a;
            session.timing.renegotiate_tx(&mut rand::rng());
            session.lbits.remove(PacketFlags::P);
            Debug::PollSequenceCommit(&session.key).log();
        } else {
            // Stash the new values and start a Poll on the next transmit.
            session.lbits.insert(PacketFlags::P);
            session.timing.ldesmintx_a = want_tx;
            session.timing.lreqminrx_a = want_rx;
            Debug::PollSequenceStart(&session.key).log();
        }
    }

    session.timing.lmulti = iface.multiplier;

    if iface.demand_mode {
        session.lbits.insert(PacketFlags::D);
    }

    if session.rbits.contains(PacketFlags::D) {
        if session.lbits.contains(PacketFlags::F) {
            session.arm_one_shot_hello();
        } else {
            session.cancel_hello();
        }
    }

    if session.uptime.is_none() {
        session.uptime = Some(now);
    }
}

// *down* (§4.2): arms the session-timeout watchdog and signals "neighbor
// down" exactly once per edge crossed from `Up`.
fn action_down(session: &mut Session, now: DateTime<Utc>, routing: &dyn RoutingDaemon) {
    session.lstate = State::Down;

    if session.uptime.is_none() {
        session.uptime = Some(now);
    }

    if !session.session_timeout_armed() {
        session.orecv_cnt = session.recv_cnt;
        session.arm_session_timeout();
    }

    if session.notify != Some(State::Down) {
        let was_up = session.status == State::Up;
        session.notify = Some(State::Down);
        if was_up {
            routing.signal_neigh_down(&session.key);
        }
    }
}

// *admdown* (§4.2): the graceful-shutdown / peer-AdminDown handler.
fn action_admdown(session: &mut Session) {
    if session.notify != Some(State::AdminDown) {
        session.notify = Some(State::AdminDown);
        session.rearm_hello_immediate();
    }

    if session.del {
        session.lstate = State::AdminDown;
        session.ldiag = DiagnosticCode::AdminDown;
    } else {
        session.lstate = State::Down;
        session.ldiag = DiagnosticCode::NbrDown;
    }

    session.uptime = None;
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::collaborator::NullRoutingDaemon;
    use crate::session::{Session, SessionKey};

    fn key() -> SessionKey {
        SessionKey {
            local_addr: "10.0.0.1".parse::<IpAddr>().unwrap(),
            remote_addr: "10.0.0.2".parse::<IpAddr>().unwrap(),
        }
    }

    fn new_session() -> Session {
        Session::new_detached(1, key(), Default::default())
    }

    #[test]
    fn admin_down_discards_every_event() {
        let mut sess = new_session();
        sess.status = State::AdminDown;
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();
        for event in [
            Event::RecvAdminDown,
            Event::RecvDown,
            Event::RecvInit,
            Event::RecvUp,
            Event::Timer,
            Event::Delete,
        ] {
            let result = dispatch(&mut sess, event, &iface, Utc::now(), &routing);
            assert!(matches!(result, Err(Error::Discard(State::AdminDown, _))));
            assert_eq!(sess.status, State::AdminDown);
        }
    }

    #[test]
    fn down_ignores_recv_admin_down_and_recv_up() {
        let mut sess = new_session();
        assert_eq!(sess.status, State::Down);
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();

        dispatch(&mut sess, Event::RecvAdminDown, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Down);

        dispatch(&mut sess, Event::RecvUp, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Down);
    }

    #[test]
    fn cold_bring_up_scenario() {
        // §8 scenario 1.
        let mut sess = new_session();
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();

        sess.rstate = State::Down;
        dispatch(&mut sess, Event::RecvDown, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Init);
        assert_eq!(sess.lstate, State::Init);

        sess.rstate = State::Init;
        dispatch(&mut sess, Event::RecvInit, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Up);
        // `status` already reads `Up` off the transition table alone, but the
        // peer hasn't committed to `Up` itself yet (`rstate` is still
        // `Init`), so the upstream signal is not fired yet (§9 "Open
        // question": `notify` lags `status`).
        assert_eq!(sess.notify, None);

        // The peer's next packet carries `State=Up`: only now does `rstate`
        // itself reach `Up`, completing the three-way handshake and firing
        // the upstream "neighbor up" signal.
        sess.rstate = State::Up;
        dispatch(&mut sess, Event::RecvUp, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Up);
        assert_eq!(sess.notify, Some(State::Up));
    }

    #[test]
    fn repeated_recv_up_in_up_state_is_idempotent() {
        let mut sess = new_session();
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();

        sess.rstate = State::Down;
        dispatch(&mut sess, Event::RecvDown, &iface, Utc::now(), &routing).unwrap();
        sess.rstate = State::Up;
        dispatch(&mut sess, Event::RecvInit, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Up);
        let notify = sess.notify;

        dispatch(&mut sess, Event::RecvUp, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Up);
        assert_eq!(sess.notify, notify);
    }

    #[test]
    fn poll_sequence_commits_on_final_bit() {
        // §8 scenario 4.
        let mut sess = new_session();
        let routing = NullRoutingDaemon::default();
        sess.rstate = State::Up;
        sess.status = State::Up;
        sess.notify = Some(State::Up);

        let iface = InterfaceParams {
            interval_ms: 250,
            minrx_ms: 250,
            ..Default::default()
        };

        dispatch(&mut sess, Event::RecvUp, &iface, Utc::now(), &routing).unwrap();
        assert!(sess.lbits.contains(PacketFlags::P));
        assert_eq!(sess.timing.ldesmintx_a, 250_000);
        assert_eq!(sess.timing.lreqminrx_a, 250_000);
        // Not yet committed.
        assert_ne!(sess.timing.ldesmintx, 250_000);

        sess.rbits.insert(PacketFlags::F);
        dispatch(&mut sess, Event::RecvUp, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.timing.ldesmintx, 250_000);
        assert_eq!(sess.timing.lreqminrx, 250_000);
        assert!(!sess.lbits.contains(PacketFlags::P));
    }

    #[test]
    fn delete_from_up_forces_admin_down_with_local_diag() {
        let mut sess = new_session();
        sess.status = State::Up;
        sess.del = true;
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();

        dispatch(&mut sess, Event::Delete, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::AdminDown);
        assert_eq!(sess.lstate, State::AdminDown);
        assert_eq!(sess.ldiag, DiagnosticCode::AdminDown);
    }

    #[test]
    fn passive_session_rearms_hello_on_transition_out_of_down() {
        // §8 scenario 6.
        let mut sess = new_session();
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();
        sess.passive = true;
        sess.cancel_hello();
        assert!(!sess.hello_armed());

        sess.rstate = State::Down;
        dispatch(&mut sess, Event::RecvDown, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Init);
        assert!(sess.hello_armed());
    }

    #[test]
    fn peer_admin_down_marks_session_down_with_session_down_diag() {
        let mut sess = new_session();
        sess.status = State::Up;
        let routing = NullRoutingDaemon::default();
        let iface = InterfaceParams::default();

        dispatch(&mut sess, Event::RecvAdminDown, &iface, Utc::now(), &routing).unwrap();
        assert_eq!(sess.status, State::Down);
        assert_eq!(sess.lstate, State::Down);
        assert_eq!(sess.ldiag, DiagnosticCode::NbrDown);
    }
}
