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

use crate::underlay::{Arguments, DeliveredMessage};

/// A message delivered to this client.
///
/// Messages the broker returns as unroutable arrive with `no_ack` set: there is
/// nothing to acknowledge for them.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingMessage {
    message: DeliveredMessage,
    no_ack: bool,
}

impl IncomingMessage {
    pub fn new(message: DeliveredMessage, no_ack: bool) -> Self {
        Self { message, no_ack }
    }

    pub fn no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn exchange(&self) -> &str {
        &self.message.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    pub fn reply_code(&self) -> u16 {
        self.message.reply_code
    }

    pub fn reply_text(&self) -> &str {
        &self.message.reply_text
    }

    pub fn headers(&self) -> Option<&Arguments> {
        self.message.headers.as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    pub fn into_inner(self) -> DeliveredMessage {
        self.message
    }
}
