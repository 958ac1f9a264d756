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
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChannelState {
    Uninitialized,
    Opening,
    Ready,
    ClosedByUser,
    ClosedByPeer,
}

impl ChannelState {
    /// An underlying channel exists and was not closed from our side or the broker's.
    pub fn is_ready(&self) -> bool {
        matches!(self, ChannelState::Ready)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::ClosedByUser | ChannelState::ClosedByPeer)
    }
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Opening => "opening",
            ChannelState::Ready => "ready",
            ChannelState::ClosedByUser => "closed by user",
            ChannelState::ClosedByPeer => "closed by peer",
        };
        f.write_str(label)
    }
}

/// Boolean signal other tasks can wait on.
///
/// Set exactly when the channel becomes usable, cleared when it stops being usable.
pub(crate) struct ReadyLatch {
    signal: watch::Sender<bool>,
}

impl ReadyLatch {
    pub(crate) fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self { signal }
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.signal.borrow()
    }

    pub(crate) fn set(&self) {
        self.signal.send_replace(true);
    }

    pub(crate) fn clear(&self) {
        self.signal.send_replace(false);
    }

    pub(crate) async fn wait(&self) {
        let mut receiver = self.signal.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = receiver.wait_for(|ready| *ready).await;
    }
}
