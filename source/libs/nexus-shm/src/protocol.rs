// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handshake state machine riding on the channel's status word.
//!
//! Requester (coordinator) and responder (worker) share one word holding one of three sentinel
//! values. Any other value is an identity word, written once by the requester right after the
//! responder was forked so the responder learns who it serves.
//!
//! ```text
//!   requester                         status word                 responder
//!   send(Call(cmd)) ─ write buffer ─▶ REQUEST_CALL ─ poll ──────▶ run cmd
//!   wait until READY ◀─────────────── READY ◀──────── acknowledge()
//!   send(Exit) ─────────────────────▶ REQUEST_EXIT ─ poll ──────▶ _exit (no ack)
//! ```

use crate::channel::{ChannelError, SharedChannel};

const READY_WORD: u32 = !0;
const REQUEST_CALL_WORD: u32 = 0x3243_F6A8;
const REQUEST_EXIT_WORD: u32 = 0x9E37_79B9;

/// Decoded value of the status word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Idle; the responder finished the last request.
    Ready,
    /// A command is waiting in the buffer.
    RequestCall,
    /// The responder must terminate.
    RequestExit,
    /// Identity word published during the initial handshake.
    Word(u32),
}

impl State {
    /// Decodes a raw status word.
    pub const fn from_word(word: u32) -> Self {
        match word {
            READY_WORD => Self::Ready,
            REQUEST_CALL_WORD => Self::RequestCall,
            REQUEST_EXIT_WORD => Self::RequestExit,
            other => Self::Word(other),
        }
    }

    /// Encodes the state back into its raw word.
    pub const fn word(self) -> u32 {
        match self {
            Self::Ready => READY_WORD,
            Self::RequestCall => REQUEST_CALL_WORD,
            Self::RequestExit => REQUEST_EXIT_WORD,
            Self::Word(word) => word,
        }
    }
}

/// Request issued by the requester.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request<'a> {
    /// Run a command through the OS command interpreter.
    Call(&'a str),
    /// Terminate the responder.
    Exit,
    /// Publish an identity word (e.g. the requester's rank).
    Identity(u32),
}

/// Request as observed by the responder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Command text copied out of the buffer.
    Call(String),
    /// Exit request.
    Exit,
    /// Identity word.
    Identity(u32),
}

/// Coordinator end of the handshake.
#[derive(Clone, Copy)]
pub struct Requester<'a> {
    channel: &'a SharedChannel,
}

impl<'a> Requester<'a> {
    /// Wraps `channel` as the requesting side.
    pub fn new(channel: &'a SharedChannel) -> Self {
        Self { channel }
    }

    /// Current decoded status.
    pub fn state(&self) -> State {
        State::from_word(self.channel.load())
    }

    /// Returns `true` once the responder has acknowledged the last request.
    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    /// Checks that `command` would fit the buffer without touching shared memory.
    pub fn check(&self, command: &str) -> Result<(), ChannelError> {
        self.channel.check_command(command)
    }

    /// Publishes `request`. Requests are strictly sequential: the status word must be READY.
    ///
    /// Oversized commands are rejected before anything is written.
    pub fn send(&self, request: Request<'_>) -> Result<(), ChannelError> {
        let current = self.channel.load();
        if current != READY_WORD {
            return Err(ChannelError::Busy(current));
        }
        match request {
            Request::Call(command) => {
                self.channel.write_command(command)?;
                self.channel.store(REQUEST_CALL_WORD);
            }
            Request::Exit => self.channel.store(REQUEST_EXIT_WORD),
            Request::Identity(word) => {
                if !matches!(State::from_word(word), State::Word(_)) {
                    return Err(ChannelError::ReservedWord(word));
                }
                self.channel.store(word);
            }
        }
        Ok(())
    }
}

/// Worker end of the handshake.
#[derive(Clone, Copy)]
pub struct Responder<'a> {
    channel: &'a SharedChannel,
}

impl<'a> Responder<'a> {
    /// Wraps `channel` as the responding side.
    pub fn new(channel: &'a SharedChannel) -> Self {
        Self { channel }
    }

    /// Returns the pending request, or `None` while the status word is READY.
    pub fn poll(&self) -> Option<Incoming> {
        match State::from_word(self.channel.load()) {
            State::Ready => None,
            State::RequestCall => Some(Incoming::Call(self.channel.read_command())),
            State::RequestExit => Some(Incoming::Exit),
            State::Word(word) => Some(Incoming::Identity(word)),
        }
    }

    /// Marks the current request as handled.
    pub fn acknowledge(&self) {
        self.channel.store(READY_WORD);
    }
}
