//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

use crate::packet::DecodeError;
use crate::session::SessionId;

/// Engine-level errors (§7). Every fallible boundary returns
/// `Result<T, Error>`; `event()` returning `Err` is the FSM's *discard*
/// outcome and is guaranteed to leave session state unchanged, never a
/// process abort.
#[derive(Debug)]
pub enum Error {
    /// I/O errors from the transmit collaborator.
    IoError(IoError),
    /// A timer or packet callback re-resolved a session ID that no longer
    /// exists in the table (the session was deleted while the callback was
    /// queued).
    SessionIdNotFound(SessionId),
    /// No session matches the packet's `(addr, your-discriminator)`; dropped
    /// at the manager, never reaches the FSM.
    SessionNoMatch(u32),
    /// `event()` was dispatched against a session in `AdminDown`, or an
    /// otherwise inappropriate (state, event) pair — the FSM's *discard*
    /// outcome (§4.2, §7).
    Discard(crate::packet::State, crate::fsm::Event),
    /// Failed to decode a received BFDCP.
    PacketDecodeError(DecodeError),
    /// Your Discriminator was zero on a packet whose advertised state
    /// requires it to be set (§4.3 "Packet receive path").
    InvalidYourDiscriminator(u32),
    /// The A-bit was set; authentication-section verification is out of
    /// scope for this core (§1 Non-goals).
    AuthNotSupported,
}

/// I/O errors surfaced by the packet-transmit collaborator.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    SendError(std::io::Error),
    RecvError(std::io::Error),
}

// ===== impl Error =====

impl Error {
    /// Logs the error through `tracing` and returns it, mirroring the
    /// donor's `Error::log` convention of warning once per error at the
    /// point where it's recovered from (§7: all errors are recovered
    /// locally).
    pub fn log(&self) {
        match self {
            Error::IoError(error) => error.log(),
            Error::SessionIdNotFound(sess_id) => {
                warn!(?sess_id, "{}", self);
            }
            Error::SessionNoMatch(your_discr) => {
                warn!(%your_discr, "{}", self);
            }
            Error::Discard(state, event) => {
                warn!(%state, %event, "{}", self);
            }
            Error::PacketDecodeError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::InvalidYourDiscriminator(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::AuthNotSupported => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::SessionIdNotFound(..) => write!(f, "session ID not found"),
            Error::SessionNoMatch(..) => write!(f, "failed to find session"),
            Error::Discard(state, event) => {
                write!(f, "discarded {event} event in {state} state")
            }
            Error::PacketDecodeError(..) => write!(f, "failed to decode packet"),
            Error::InvalidYourDiscriminator(..) => {
                write!(f, "received invalid Your Discriminator")
            }
            Error::AuthNotSupported => {
                write!(f, "authenticated packet received, but authentication is not supported")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::PacketDecodeError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::PacketDecodeError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        warn!(error = %with_source(self), "{}", self);
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => write!(f, "failed to create UDP socket"),
            IoError::SendError(..) => write!(f, "failed to send BFD control packet"),
            IoError::RecvError(..) => write!(f, "failed to receive BFD control packet"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::SendError(error)
            | IoError::RecvError(error) => Some(error),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
