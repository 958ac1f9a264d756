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
use crate::lifecycle::channel::Channel;
use crate::observability::{events, COMPONENT};
use std::ops::Deref;
use tokio::runtime::Handle;
use tracing::warn;

/// Scoped use of a [`Channel`]: initialized on entry, closed on exit.
///
/// Call [`ChannelScope::exit`] to close with a reason. A scope dropped without
/// exiting schedules a plain close on the current tokio runtime.
#[must_use = "dropping the scope closes the channel"]
pub struct ChannelScope {
    channel: Channel,
    exited: bool,
}

impl ChannelScope {
    pub(crate) async fn enter(channel: Channel) -> Result<Self, ChannelError> {
        if !channel.is_initialized() {
            channel.initialize(None).await?;
        }
        Ok(Self {
            channel,
            exited: false,
        })
    }

    pub async fn exit(mut self, reason: Option<ChannelError>) {
        self.exited = true;
        self.channel.close(reason).await;
    }
}

impl Deref for ChannelScope {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

impl Drop for ChannelScope {
    fn drop(&mut self) {
        if self.exited {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    event = events::SCOPE_DROPPED,
                    component = COMPONENT,
                    channel_id = %self.channel.id(),
                    "channel scope dropped without exit; closing in background"
                );
                let channel = self.channel.clone();
                handle.spawn(async move {
                    channel.close(None).await;
                });
            }
            Err(_) => {
                warn!(
                    event = events::SCOPE_DROPPED,
                    component = COMPONENT,
                    channel_id = %self.channel.id(),
                    "channel scope dropped outside a tokio runtime; channel left open"
                );
            }
        }
    }
}
