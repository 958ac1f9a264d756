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

use amqp_channel::callbacks::{Callback, CallbackResult};
use amqp_channel::entities::IncomingMessage;
use amqp_channel::{Channel, ChannelError};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One observed close notification.
#[derive(Clone, Debug, PartialEq)]
pub struct CloseRecord {
    pub reason: Option<ChannelError>,
    /// Whether the channel still reported itself initialized during the call.
    pub initialized: bool,
}

#[derive(Default)]
pub struct RecordingCloseCallback {
    records: Mutex<Vec<CloseRecord>>,
}

impl RecordingCloseCallback {
    pub fn records(&self) -> Vec<CloseRecord> {
        locked(&self.records).clone()
    }

    pub fn calls(&self) -> usize {
        locked(&self.records).len()
    }
}

#[async_trait]
impl Callback<Channel, Option<ChannelError>> for RecordingCloseCallback {
    async fn call(&self, channel: &Channel, reason: &Option<ChannelError>) -> CallbackResult {
        locked(&self.records).push(CloseRecord {
            reason: reason.clone(),
            initialized: channel.is_initialized(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingReturnCallback {
    messages: Mutex<Vec<IncomingMessage>>,
}

impl RecordingReturnCallback {
    pub fn messages(&self) -> Vec<IncomingMessage> {
        locked(&self.messages).clone()
    }
}

#[async_trait]
impl Callback<Channel, IncomingMessage> for RecordingReturnCallback {
    async fn call(&self, _channel: &Channel, message: &IncomingMessage) -> CallbackResult {
        locked(&self.messages).push(message.clone());
        Ok(())
    }
}

/// Always fails; used to check that one failing handler does not starve the rest.
pub struct FailingCallback;

#[async_trait]
impl Callback<Channel, Option<ChannelError>> for FailingCallback {
    async fn call(&self, _channel: &Channel, _reason: &Option<ChannelError>) -> CallbackResult {
        Err("close handler refused".into())
    }
}
