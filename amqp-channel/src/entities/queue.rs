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

use crate::error::{ChannelError, InvalidStateReason};
use crate::lifecycle::{Channel, WeakChannel};
use crate::runtime::timeout::with_timeout;
use crate::underlay::{Arguments, QueueDeclare, QueueDeclareOk, QueueDeleteOk};
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Only usable from the declaring connection and deleted with it. Other
    /// connections can not declare it passively either.
    pub exclusive: bool,
    /// Only check that the queue exists. A missing queue makes the broker close
    /// the channel.
    pub passive: bool,
    /// Removed by the broker once its last consumer is gone.
    pub auto_delete: bool,
    pub arguments: Option<Arguments>,
}

impl QueueOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueDeleteOptions {
    pub if_unused: bool,
    pub if_empty: bool,
    pub nowait: bool,
}

/// A queue bound to the channel that created it.
#[derive(Clone)]
pub struct Queue {
    channel: WeakChannel,
    name: String,
    options: QueueOptions,
    declaration: Option<QueueDeclareOk>,
}

impl Queue {
    pub(crate) fn new(channel: WeakChannel, name: &str, options: QueueOptions) -> Self {
        Self {
            channel,
            name: name.to_string(),
            options,
            declaration: None,
        }
    }

    /// The queue name; broker-assigned after declaring with an empty name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Broker reply of the last successful declare.
    pub fn declaration(&self) -> Option<&QueueDeclareOk> {
        self.declaration.as_ref()
    }

    pub fn channel(&self) -> Result<Channel, ChannelError> {
        self.channel
            .upgrade()
            .ok_or(ChannelError::InvalidState(InvalidStateReason::Closed))
    }

    pub async fn declare(&mut self, timeout: Option<Duration>) -> Result<QueueDeclareOk, ChannelError> {
        let underlay = self.channel()?.channel()?;
        let method = QueueDeclare {
            queue: self.name.clone(),
            passive: self.options.passive,
            durable: self.options.durable,
            exclusive: self.options.exclusive,
            auto_delete: self.options.auto_delete,
            arguments: self.options.arguments.clone(),
        };
        let declared = with_timeout(timeout, underlay.queue_declare(method)).await?;
        self.name = declared.queue.clone();
        self.declaration = Some(declared.clone());
        Ok(declared)
    }

    pub async fn delete(
        &self,
        options: QueueDeleteOptions,
        timeout: Option<Duration>,
    ) -> Result<QueueDeleteOk, ChannelError> {
        self.channel()?
            .queue_delete(&self.name, options, timeout)
            .await
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.options == other.options
    }
}

impl Debug for Queue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}
