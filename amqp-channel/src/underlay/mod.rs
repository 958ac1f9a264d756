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

//! Boundary contracts towards the connection layer.
//!
//! Framing, sockets and connection recovery live behind these traits. A
//! [`crate::Channel`] waits on a [`Connection`], asks its [`Transport`] for a fresh
//! [`UnderlayChannel`] on every open, and issues all broker methods through that
//! handle. Errors returned here are surfaced to the caller unchanged.

mod methods;
pub use methods::{
    Arguments, BasicQos, DeliveredMessage, ExchangeDeclare, ExchangeDelete, FlowOk,
    OpenChannelOptions, QueueDeclare, QueueDeclareOk, QueueDelete, QueueDeleteOk,
};

use crate::error::ChannelError;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Connection: Send + Sync {
    /// Suspends until the connection is established.
    async fn wait_connected(&self);

    /// The live transport of an established connection.
    fn transport(&self) -> Result<Arc<dyn Transport>, ChannelError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_channel(
        &self,
        options: OpenChannelOptions,
        on_close: Arc<dyn CloseHook>,
    ) -> Result<Arc<dyn UnderlayChannel>, ChannelError>;
}

/// Invoked by an [`UnderlayChannel`] exactly once per close event.
///
/// `reason` is `None` for a clean close.
#[async_trait]
pub trait CloseHook: Send + Sync {
    async fn on_close(&self, reason: Option<ChannelError>);
}

#[async_trait]
pub trait ReturnListener: Send + Sync {
    async fn on_return(&self, message: DeliveredMessage);
}

#[async_trait]
pub trait UnderlayChannel: Send + Sync {
    fn number(&self) -> u16;

    fn is_closed(&self) -> bool;

    async fn close(&self, reason: Option<ChannelError>) -> Result<(), ChannelError>;

    async fn exchange_declare(&self, method: ExchangeDeclare) -> Result<(), ChannelError>;

    async fn exchange_delete(&self, method: ExchangeDelete) -> Result<(), ChannelError>;

    async fn queue_declare(&self, method: QueueDeclare) -> Result<QueueDeclareOk, ChannelError>;

    async fn queue_delete(&self, method: QueueDelete) -> Result<QueueDeleteOk, ChannelError>;

    async fn basic_qos(&self, method: BasicQos) -> Result<(), ChannelError>;

    async fn flow(&self, active: bool) -> Result<FlowOk, ChannelError>;

    async fn tx_select(&self) -> Result<(), ChannelError>;

    async fn tx_commit(&self) -> Result<(), ChannelError>;

    async fn tx_rollback(&self) -> Result<(), ChannelError>;

    fn add_return_listener(&self, listener: Arc<dyn ReturnListener>);
}
