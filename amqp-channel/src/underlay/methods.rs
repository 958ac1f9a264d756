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

//! Arguments and replies of the AMQP methods a [`super::UnderlayChannel`] carries.

use crate::entities::ExchangeType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// AMQP field table.
pub type Arguments = Map<String, Value>;

/// Settings handed to [`super::Transport::open_channel`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenChannelOptions {
    pub publisher_confirms: bool,
    pub on_return_raises: bool,
    pub channel_number: Option<u16>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExchangeDeclare {
    pub exchange: String,
    pub kind: ExchangeType,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub arguments: Option<Arguments>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExchangeDelete {
    pub exchange: String,
    pub if_unused: bool,
    pub nowait: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueDeclare {
    /// Empty asks the broker to generate a name.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub arguments: Option<Arguments>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueDelete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub nowait: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueDeleteOk {
    pub message_count: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BasicQos {
    pub prefetch_count: u16,
    pub prefetch_size: u32,
    pub global: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FlowOk {
    pub active: bool,
}

/// A published message the broker handed back as unroutable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveredMessage {
    pub exchange: String,
    pub routing_key: String,
    pub reply_code: u16,
    pub reply_text: String,
    pub headers: Option<Arguments>,
    pub body: Vec<u8>,
}
