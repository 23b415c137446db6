//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{debug, debug_span};

use crate::fsm::Event;
use crate::packet::State;
use crate::session::SessionKey;

/// Closed set of loggable engine events (§10: "a `debug` module holds a
/// closed enum of loggable events ... with a `log()` method that opens a
/// `tracing::debug_span!` keyed by the session's `(local_addr, remote_addr)`
/// and emits one `tracing::debug!` inside it").
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a SessionKey),
    SessionDelete(&'a SessionKey),
    FsmEvent(&'a SessionKey, Event, State, State),
    PollSequenceStart(&'a SessionKey),
    PollSequenceCommit(&'a SessionKey),
    DetectionTimeExpiry(&'a SessionKey),
    SessionTimeout(&'a SessionKey),
    GracefulDeleteStart(&'a SessionKey),
}

impl Debug<'_> {
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(key) | Debug::SessionDelete(key) => {
                debug_span!("session", %key).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FsmEvent(key, event, from, to) => {
                debug_span!("session", %key).in_scope(|| {
                    debug!(%event, %from, %to, "{}", self);
                });
            }
            Debug::PollSequenceStart(key)
            | Debug::PollSequenceCommit(key)
            | Debug::DetectionTimeExpiry(key)
            | Debug::SessionTimeout(key)
            | Debug::GracefulDeleteStart(key) => {
                debug_span!("session", %key).in_scope(|| {
                    debug!("{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => write!(f, "session created"),
            Debug::SessionDelete(..) => write!(f, "session deleted"),
            Debug::FsmEvent(..) => write!(f, "FSM event dispatched"),
            Debug::PollSequenceStart(..) => write!(f, "Poll Sequence started"),
            Debug::PollSequenceCommit(..) => write!(f, "Poll Sequence committed"),
            Debug::DetectionTimeExpiry(..) => write!(f, "detection timer expired"),
            Debug::SessionTimeout(..) => write!(f, "session timeout, neighbor presumed dead"),
            Debug::GracefulDeleteStart(..) => write!(f, "graceful delete started"),
        }
    }
}
