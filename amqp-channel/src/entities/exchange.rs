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
use crate::underlay::{Arguments, ExchangeDeclare};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ExchangeType {
    #[serde(rename = "fanout")]
    Fanout,
    #[default]
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "topic")]
    Topic,
    #[serde(rename = "headers")]
    Headers,
    #[serde(rename = "x-delayed-message")]
    DelayedMessage,
    #[serde(rename = "x-consistent-hash")]
    ConsistentHash,
    #[serde(rename = "x-modulus-hash")]
    ModulusHash,
}

impl ExchangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeType::Fanout => "fanout",
            ExchangeType::Direct => "direct",
            ExchangeType::Topic => "topic",
            ExchangeType::Headers => "headers",
            ExchangeType::DelayedMessage => "x-delayed-message",
            ExchangeType::ConsistentHash => "x-consistent-hash",
            ExchangeType::ModulusHash => "x-modulus-hash",
        }
    }
}

impl Display for ExchangeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeType {
    type Err = ChannelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "fanout" => Ok(ExchangeType::Fanout),
            "direct" => Ok(ExchangeType::Direct),
            "topic" => Ok(ExchangeType::Topic),
            "headers" => Ok(ExchangeType::Headers),
            "x-delayed-message" => Ok(ExchangeType::DelayedMessage),
            "x-consistent-hash" => Ok(ExchangeType::ConsistentHash),
            "x-modulus-hash" => Ok(ExchangeType::ModulusHash),
            other => Err(ChannelError::configuration(format!(
                "unknown exchange type {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Removed by the broker once the last binding is gone.
    pub auto_delete: bool,
    /// Clients can not publish to it directly.
    pub internal: bool,
    /// Only check that the exchange exists. A missing exchange makes the broker
    /// close the channel.
    pub passive: bool,
    pub arguments: Option<Arguments>,
}

impl ExchangeOptions {
    pub fn passive() -> Self {
        Self {
            passive: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExchangeDeleteOptions {
    pub if_unused: bool,
    pub nowait: bool,
}

/// An exchange bound to the channel that created it.
///
/// Two exchanges compare equal when their name, type and options match,
/// regardless of the channel they were obtained from.
#[derive(Clone)]
pub struct Exchange {
    channel: WeakChannel,
    name: String,
    kind: ExchangeType,
    options: ExchangeOptions,
}

impl Exchange {
    pub(crate) fn new(
        channel: WeakChannel,
        name: &str,
        kind: ExchangeType,
        options: ExchangeOptions,
    ) -> Self {
        Self {
            channel,
            name: name.to_string(),
            kind,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeType {
        self.kind
    }

    pub fn options(&self) -> &ExchangeOptions {
        &self.options
    }

    /// The owning channel, as long as it is still alive.
    pub fn channel(&self) -> Result<Channel, ChannelError> {
        self.channel
            .upgrade()
            .ok_or(ChannelError::InvalidState(InvalidStateReason::Closed))
    }

    pub async fn declare(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        let underlay = self.channel()?.channel()?;
        let method = ExchangeDeclare {
            exchange: self.name.clone(),
            kind: self.kind,
            passive: self.options.passive,
            durable: self.options.durable,
            auto_delete: self.options.auto_delete,
            internal: self.options.internal,
            arguments: self.options.arguments.clone(),
        };
        with_timeout(timeout, underlay.exchange_declare(method)).await
    }

    pub async fn delete(
        &self,
        options: ExchangeDeleteOptions,
        timeout: Option<Duration>,
    ) -> Result<(), ChannelError> {
        self.channel()?
            .exchange_delete(&self.name, options, timeout)
            .await
    }
}

impl PartialEq for Exchange {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.kind == other.kind && self.options == other.options
    }
}

impl Debug for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Display for Exchange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            return f.write_str("<default>");
        }
        f.write_str(&self.name)
    }
}
