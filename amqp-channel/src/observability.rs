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

//! Stable event names attached to `tracing` events as the `event` field.

pub const COMPONENT: &str = "amqp_channel";

pub mod events {
    pub const CHANNEL_OPENING: &str = "channel_opening";
    pub const CHANNEL_OPENED: &str = "channel_opened";
    pub const CHANNEL_OPEN_FAILED: &str = "channel_open_failed";
    pub const CHANNEL_CLOSE_REQUESTED: &str = "channel_close_requested";
    pub const CHANNEL_CLOSE_NOOP: &str = "channel_close_noop";
    pub const CHANNEL_CLOSE_FAILED: &str = "channel_close_failed";
    pub const CHANNEL_CLOSED: &str = "channel_closed";
    pub const CHANNEL_REOPENING: &str = "channel_reopening";
    pub const CHANNEL_PEER_CLOSED: &str = "channel_peer_closed";
    pub const CHANNEL_RETURN_RECEIVED: &str = "channel_return_received";
    pub const CALLBACK_FAILED: &str = "callback_failed";
    pub const EXCHANGE_DECLARED: &str = "exchange_declared";
    pub const QUEUE_DECLARED: &str = "queue_declared";
    pub const SCOPE_DROPPED: &str = "scope_dropped";
}
