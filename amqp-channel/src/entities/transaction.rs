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
use std::time::Duration;
use tracing::debug;

const TRANSACTION_TAG: &str = "Transaction:";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    Created,
    Started,
    Committed,
    RolledBack,
    Failed,
}

/// AMQP transaction on a channel without publisher confirms.
pub struct Transaction {
    channel: WeakChannel,
    state: TransactionState,
}

impl Transaction {
    pub(crate) fn new(channel: WeakChannel) -> Self {
        Self {
            channel,
            state: TransactionState::Created,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The owning channel, as long as it is still alive.
    pub fn channel(&self) -> Result<Channel, ChannelError> {
        self.channel
            .upgrade()
            .ok_or(ChannelError::InvalidState(InvalidStateReason::Closed))
    }

    pub async fn select(&mut self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let channel = self.channel()?;
        let underlay = channel.channel()?;
        self.settle(
            &channel,
            with_timeout(timeout, underlay.tx_select()).await,
            TransactionState::Started,
        )
    }

    pub async fn commit(&mut self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let channel = self.channel()?;
        let underlay = channel.channel()?;
        self.settle(
            &channel,
            with_timeout(timeout, underlay.tx_commit()).await,
            TransactionState::Committed,
        )
    }

    pub async fn rollback(&mut self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let channel = self.channel()?;
        let underlay = channel.channel()?;
        self.settle(
            &channel,
            with_timeout(timeout, underlay.tx_rollback()).await,
            TransactionState::RolledBack,
        )
    }

    fn settle(
        &mut self,
        channel: &Channel,
        outcome: Result<(), ChannelError>,
        next: TransactionState,
    ) -> Result<(), ChannelError> {
        self.state = match outcome {
            Ok(()) => next,
            Err(_) => TransactionState::Failed,
        };
        debug!(
            "{}:{} transaction now {:?}",
            TRANSACTION_TAG, channel, self.state
        );
        outcome
    }
}
