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

use amqp_channel::entities::ExchangeType;
use amqp_channel::underlay::{
    BasicQos, CloseHook, Connection, DeliveredMessage, ExchangeDeclare, ExchangeDelete, FlowOk,
    OpenChannelOptions, QueueDeclare, QueueDeclareOk, QueueDelete, QueueDeleteOk, ReturnListener,
    Transport, UnderlayChannel,
};
use amqp_channel::{reply_code, ChannelError, InvalidStateReason};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

const IN_MEMORY_BROKER_TAG: &str = "InMemoryBroker:";
const IN_MEMORY_BROKER_FN_OPEN_CHANNEL_TAG: &str = "open_channel():";
const MOCK_UNDERLAY_CHANNEL_TAG: &str = "MockUnderlayChannel:";

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeType>,
    /// Queue name to ready message count.
    queues: HashMap<String, u32>,
    channels: Vec<Arc<MockUnderlayChannel>>,
    opened_with: Vec<OpenChannelOptions>,
    methods: Vec<String>,
    next_number: u16,
    latency: Duration,
    refuse_open: bool,
    fail_close: bool,
    close_during_open: bool,
}

struct BrokerShared {
    state: Mutex<BrokerState>,
    connected: watch::Sender<bool>,
}

impl BrokerShared {
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn latency(&self) -> Duration {
        self.state().latency
    }
}

/// Broker and connection in one, keeping exchanges and queues in memory.
///
/// Channel errors behave like a real broker: the offending channel is closed
/// with the error as reason before the failing method returns.
pub struct InMemoryBroker {
    shared: Arc<BrokerShared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let mut state = BrokerState::default();
        for (name, kind) in [
            ("", ExchangeType::Direct),
            ("amq.direct", ExchangeType::Direct),
            ("amq.fanout", ExchangeType::Fanout),
            ("amq.topic", ExchangeType::Topic),
            ("amq.headers", ExchangeType::Headers),
        ] {
            state.exchanges.insert(name.to_string(), kind);
        }

        let (connected, _) = watch::channel(true);
        Self {
            shared: Arc::new(BrokerShared {
                state: Mutex::new(state),
                connected,
            }),
        }
    }

    /// Delay applied to channel opens and every method round-trip.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.state().latency = latency;
    }

    pub fn set_refuse_open(&self, refuse: bool) {
        self.shared.state().refuse_open = refuse;
    }

    /// Closes each new channel from the broker side before the open returns.
    pub fn set_close_during_open(&self, close: bool) {
        self.shared.state().close_during_open = close;
    }

    /// Makes channel closes fail without a close notification.
    pub fn set_fail_close(&self, fail: bool) {
        self.shared.state().fail_close = fail;
    }

    pub fn add_exchange(&self, name: &str, kind: ExchangeType) {
        self.shared.state().exchanges.insert(name.to_string(), kind);
    }

    pub fn add_queue(&self, name: &str, message_count: u32) {
        self.shared
            .state()
            .queues
            .insert(name.to_string(), message_count);
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.shared.state().exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.shared.state().queues.contains_key(name)
    }

    pub fn opened_channels(&self) -> usize {
        self.shared.state().channels.len()
    }

    pub fn opened_with(&self) -> Vec<OpenChannelOptions> {
        self.shared.state().opened_with.clone()
    }

    pub fn latest_channel(&self) -> Option<Arc<MockUnderlayChannel>> {
        self.shared.state().channels.last().cloned()
    }

    /// Methods received so far, oldest first.
    pub fn methods(&self) -> Vec<String> {
        self.shared.state().methods.clone()
    }

    /// Closes every channel with a transport error and stops handing out transports.
    pub async fn drop_connection(&self) {
        self.shared.connected.send_replace(false);
        let channels = self.shared.state().channels.clone();
        for channel in channels {
            channel
                .shutdown(Some(ChannelError::transport("connection lost")))
                .await;
        }
    }

    pub fn restore_connection(&self) {
        self.shared.connected.send_replace(true);
    }
}

#[async_trait]
impl Connection for InMemoryBroker {
    async fn wait_connected(&self) {
        let mut connected = self.shared.connected.subscribe();
        let _ = connected.wait_for(|connected| *connected).await;
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, ChannelError> {
        if !*self.shared.connected.borrow() {
            return Err(ChannelError::transport("connection is not established"));
        }
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport {
            shared: self.shared.clone(),
        });
        Ok(transport)
    }
}

struct InMemoryTransport {
    shared: Arc<BrokerShared>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open_channel(
        &self,
        options: OpenChannelOptions,
        on_close: Arc<dyn CloseHook>,
    ) -> Result<Arc<dyn UnderlayChannel>, ChannelError> {
        let latency = self.shared.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (channel, close_during_open) = {
            let mut state = self.shared.state();
            if state.refuse_open {
                return Err(ChannelError::broker(
                    reply_code::CHANNEL_ERROR,
                    "CHANNEL_ERROR - unable to open channel",
                ));
            }
            state.next_number += 1;
            let number = options.channel_number.unwrap_or(state.next_number);
            let channel = Arc::new(MockUnderlayChannel::new(
                number,
                options,
                Arc::downgrade(&self.shared),
                on_close,
            ));
            state.channels.push(channel.clone());
            state.opened_with.push(options);
            state.methods.push("channel.open".to_string());
            (channel, state.close_during_open)
        };

        debug!(
            "{}:{} opened channel #{} with {:?}",
            IN_MEMORY_BROKER_TAG,
            IN_MEMORY_BROKER_FN_OPEN_CHANNEL_TAG,
            channel.number,
            options
        );
        if close_during_open {
            channel
                .shutdown(Some(ChannelError::broker(
                    reply_code::CHANNEL_ERROR,
                    "CHANNEL_ERROR - closed during open",
                )))
                .await;
        }
        let channel: Arc<dyn UnderlayChannel> = channel;
        Ok(channel)
    }
}

/// Underlying channel handed out by [`InMemoryBroker`].
pub struct MockUnderlayChannel {
    number: u16,
    options: OpenChannelOptions,
    broker: Weak<BrokerShared>,
    closed: watch::Sender<bool>,
    transactional: AtomicBool,
    on_close: Arc<dyn CloseHook>,
    return_listeners: Mutex<Vec<Arc<dyn ReturnListener>>>,
}

impl MockUnderlayChannel {
    fn new(
        number: u16,
        options: OpenChannelOptions,
        broker: Weak<BrokerShared>,
        on_close: Arc<dyn CloseHook>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            number,
            options,
            broker,
            closed,
            transactional: AtomicBool::new(false),
            on_close,
            return_listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> OpenChannelOptions {
        self.options
    }

    pub fn return_listeners(&self) -> usize {
        self.return_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Broker-initiated close, e.g. after a channel-level exception.
    pub async fn close_from_broker(&self, reason: ChannelError) {
        self.shutdown(Some(reason)).await;
    }

    /// Hands `message` back to every return listener as unroutable.
    pub async fn return_message(&self, message: DeliveredMessage) {
        let listeners = self
            .return_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener.on_return(message.clone()).await;
        }
    }

    /// Marks the channel closed and notifies the close hook once.
    async fn shutdown(&self, reason: Option<ChannelError>) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }
        debug!(
            "{} channel #{} closed: {:?}",
            MOCK_UNDERLAY_CHANNEL_TAG, self.number, reason
        );
        self.on_close.on_close(reason).await;
        true
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if *self.closed.borrow() {
            return Err(ChannelError::InvalidState(InvalidStateReason::Closed));
        }
        Ok(())
    }

    async fn round_trip(&self, method: impl Into<String>) -> Result<Arc<BrokerShared>, ChannelError> {
        self.ensure_open()?;
        let shared = self
            .broker
            .upgrade()
            .ok_or_else(|| ChannelError::transport("connection lost"))?;
        shared.state().methods.push(method.into());

        let latency = shared.latency();
        if !latency.is_zero() {
            let mut closed = self.closed.subscribe();
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = async {
                    let _ = closed.wait_for(|closed| *closed).await;
                } => {}
            }
        }

        self.ensure_open()?;
        Ok(shared)
    }

    /// Closes the channel with `err` as reason, like a broker channel exception.
    async fn reject(&self, err: ChannelError) -> ChannelError {
        self.shutdown(Some(err.clone())).await;
        err
    }

    async fn settle<T>(&self, outcome: Result<T, ChannelError>) -> Result<T, ChannelError> {
        match outcome {
            Ok(value) => Ok(value),
            Err(err) => Err(self.reject(err).await),
        }
    }
}

#[async_trait]
impl UnderlayChannel for MockUnderlayChannel {
    fn number(&self) -> u16 {
        self.number
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn close(&self, reason: Option<ChannelError>) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Ok(());
        }

        let fail_close = self
            .broker
            .upgrade()
            .map(|shared| {
                let mut state = shared.state();
                state.methods.push("channel.close".to_string());
                state.fail_close
            })
            .unwrap_or(false);
        if fail_close {
            self.closed.send_replace(true);
            return Err(ChannelError::transport("close-ok never arrived"));
        }

        self.shutdown(reason).await;
        Ok(())
    }

    async fn exchange_declare(&self, method: ExchangeDeclare) -> Result<(), ChannelError> {
        let shared = self
            .round_trip(format!("exchange.declare {}", method.exchange))
            .await?;

        let outcome = {
            let mut state = shared.state();
            match state.exchanges.get(&method.exchange).copied() {
                Some(kind) if !method.passive && kind != method.kind => Err(ChannelError::broker(
                    reply_code::PRECONDITION_FAILED,
                    format!(
                        "PRECONDITION_FAILED - inequivalent arg 'type' for exchange '{}' in vhost '/': received '{}' but current is '{}'",
                        method.exchange, method.kind, kind
                    ),
                )),
                Some(_) => Ok(()),
                None if method.passive => Err(ChannelError::broker(
                    reply_code::NOT_FOUND,
                    format!("NOT_FOUND - no exchange '{}' in vhost '/'", method.exchange),
                )),
                None => {
                    state.exchanges.insert(method.exchange.clone(), method.kind);
                    Ok(())
                }
            }
        };
        self.settle(outcome).await
    }

    async fn exchange_delete(&self, method: ExchangeDelete) -> Result<(), ChannelError> {
        let shared = self
            .round_trip(format!("exchange.delete {}", method.exchange))
            .await?;

        let outcome = {
            let mut state = shared.state();
            if method.exchange.is_empty() || method.exchange.starts_with("amq.") {
                Err(ChannelError::broker(
                    reply_code::ACCESS_REFUSED,
                    format!(
                        "ACCESS_REFUSED - operation not permitted on exchange '{}'",
                        method.exchange
                    ),
                ))
            } else {
                state.exchanges.remove(&method.exchange);
                Ok(())
            }
        };
        self.settle(outcome).await
    }

    async fn queue_declare(&self, method: QueueDeclare) -> Result<QueueDeclareOk, ChannelError> {
        let shared = self
            .round_trip(format!("queue.declare {}", method.queue))
            .await?;

        let outcome = {
            let mut state = shared.state();
            let name = if method.queue.is_empty() && !method.passive {
                format!("amq.gen-{}", Uuid::new_v4().simple())
            } else {
                method.queue.clone()
            };

            match state.queues.get(&name).copied() {
                Some(message_count) => Ok(QueueDeclareOk {
                    queue: name,
                    message_count,
                    consumer_count: 0,
                }),
                None if method.passive => Err(ChannelError::broker(
                    reply_code::NOT_FOUND,
                    format!("NOT_FOUND - no queue '{}' in vhost '/'", name),
                )),
                None => {
                    state.queues.insert(name.clone(), 0);
                    Ok(QueueDeclareOk {
                        queue: name,
                        message_count: 0,
                        consumer_count: 0,
                    })
                }
            }
        };
        self.settle(outcome).await
    }

    async fn queue_delete(&self, method: QueueDelete) -> Result<QueueDeleteOk, ChannelError> {
        let shared = self
            .round_trip(format!("queue.delete {}", method.queue))
            .await?;

        let outcome = {
            let mut state = shared.state();
            match state.queues.get(&method.queue).copied() {
                None => Ok(QueueDeleteOk { message_count: 0 }),
                Some(message_count) if method.if_empty && message_count > 0 => {
                    Err(ChannelError::broker(
                        reply_code::PRECONDITION_FAILED,
                        format!(
                            "PRECONDITION_FAILED - queue '{}' in vhost '/' not empty",
                            method.queue
                        ),
                    ))
                }
                Some(message_count) => {
                    state.queues.remove(&method.queue);
                    Ok(QueueDeleteOk { message_count })
                }
            }
        };
        self.settle(outcome).await
    }

    async fn basic_qos(&self, method: BasicQos) -> Result<(), ChannelError> {
        self.round_trip(format!(
            "basic.qos prefetch_count={} prefetch_size={} global={}",
            method.prefetch_count, method.prefetch_size, method.global
        ))
        .await?;
        Ok(())
    }

    async fn flow(&self, active: bool) -> Result<FlowOk, ChannelError> {
        self.round_trip(format!("channel.flow active={active}"))
            .await?;
        Ok(FlowOk { active })
    }

    async fn tx_select(&self) -> Result<(), ChannelError> {
        self.round_trip("tx.select").await?;
        if self.options.publisher_confirms {
            let err = ChannelError::broker(
                reply_code::PRECONDITION_FAILED,
                "PRECONDITION_FAILED - cannot switch from confirm to tx mode",
            );
            return Err(self.reject(err).await);
        }
        self.transactional.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn tx_commit(&self) -> Result<(), ChannelError> {
        self.round_trip("tx.commit").await?;
        self.require_transactional().await
    }

    async fn tx_rollback(&self) -> Result<(), ChannelError> {
        self.round_trip("tx.rollback").await?;
        self.require_transactional().await
    }

    fn add_return_listener(&self, listener: Arc<dyn ReturnListener>) {
        self.return_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

impl MockUnderlayChannel {
    async fn require_transactional(&self) -> Result<(), ChannelError> {
        if self.transactional.load(Ordering::SeqCst) {
            return Ok(());
        }
        let err = ChannelError::broker(
            reply_code::PRECONDITION_FAILED,
            "PRECONDITION_FAILED - channel is not transactional",
        );
        Err(self.reject(err).await)
    }
}
