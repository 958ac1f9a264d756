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

use crate::error::ChannelError;
use crate::lifecycle::channel::WeakChannel;
use crate::underlay::{CloseHook, DeliveredMessage, ReturnListener};
use async_trait::async_trait;
use tracing::debug;

const CHANNEL_EVENTS_TAG: &str = "ChannelEvents:";

/// Bridge from one underlying channel back to its [`crate::Channel`].
///
/// Every open cycle gets its own bridge stamped with the cycle's generation, so
/// late events of a replaced underlying channel are dropped.
pub(crate) struct ChannelEvents {
    channel: WeakChannel,
    generation: u64,
}

impl ChannelEvents {
    pub(crate) fn new(channel: WeakChannel, generation: u64) -> Self {
        Self {
            channel,
            generation,
        }
    }
}

#[async_trait]
impl CloseHook for ChannelEvents {
    async fn on_close(&self, reason: Option<ChannelError>) {
        let Some(channel) = self.channel.upgrade() else {
            debug!("{CHANNEL_EVENTS_TAG} close after channel was dropped: {reason:?}");
            return;
        };
        channel.handle_peer_close(self.generation, reason).await;
    }
}

#[async_trait]
impl ReturnListener for ChannelEvents {
    async fn on_return(&self, message: DeliveredMessage) {
        let Some(channel) = self.channel.upgrade() else {
            debug!("{CHANNEL_EVENTS_TAG} return after channel was dropped");
            return;
        };
        channel.handle_return(self.generation, message).await;
    }
}
