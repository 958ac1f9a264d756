/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use thiserror::Error;

/// AMQP reply codes a broker uses when it closes a channel or rejects a method.
pub mod reply_code {
    pub const ACCESS_REFUSED: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const RESOURCE_LOCKED: u16 = 405;
    pub const PRECONDITION_FAILED: u16 = 406;
    pub const CHANNEL_ERROR: u16 = 504;
    pub const NOT_ALLOWED: u16 = 530;
}

/// Why the live underlying channel could not be handed out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InvalidStateReason {
    /// The channel has never been opened.
    NotOpened,
    /// The channel was opened once and is closed now, by the user or the broker.
    Closed,
}

impl Display for InvalidStateReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            InvalidStateReason::NotOpened => write!(f, "Channel was not opened"),
            InvalidStateReason::Closed => write!(f, "Channel has been closed"),
        }
    }
}

/// Coarse classification of a [`ChannelError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Incompatible flags; the channel is unaffected.
    Configuration,
    /// The call does not fit the current lifecycle state; the channel is unaffected.
    Lifecycle,
    /// The broker refused the request and usually closes the channel as well.
    BrokerRejection,
    /// The connection or channel went away underneath the call.
    TransportFailure,
    /// The caller's deadline elapsed; the channel is unaffected.
    Timeout,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ChannelError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("Already initialized")]
    AlreadyInitialized,
    #[error("Can't initialize closed channel")]
    ClosedByUser,
    #[error("{0}")]
    InvalidState(InvalidStateReason),
    #[error("broker rejected request ({reply_code}): {reply_text}")]
    Broker { reply_code: u16, reply_text: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl ChannelError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ChannelError::Configuration(message.into())
    }

    pub fn broker(reply_code: u16, reply_text: impl Into<String>) -> Self {
        ChannelError::Broker {
            reply_code,
            reply_text: reply_text.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ChannelError::Transport(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChannelError::Configuration(_) => ErrorKind::Configuration,
            ChannelError::AlreadyInitialized
            | ChannelError::ClosedByUser
            | ChannelError::InvalidState(_) => ErrorKind::Lifecycle,
            ChannelError::Broker { .. } => ErrorKind::BrokerRejection,
            ChannelError::Transport(_) => ErrorKind::TransportFailure,
            ChannelError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// Broker reply code, when the error was reported by the broker.
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            ChannelError::Broker { reply_code, .. } => Some(*reply_code),
            _ => None,
        }
    }
}
