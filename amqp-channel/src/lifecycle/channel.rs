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

use crate::callbacks::CallbackCollection;
use crate::config::ChannelConfig;
use crate::entities::{
    Exchange, ExchangeDeleteOptions, ExchangeOptions, ExchangeType, IncomingMessage, Queue,
    QueueDeleteOptions, QueueOptions, Transaction,
};
use crate::error::{ChannelError, InvalidStateReason};
use crate::lifecycle::events::ChannelEvents;
use crate::lifecycle::scope::ChannelScope;
use crate::lifecycle::state::{ChannelState, ReadyLatch};
use crate::observability::{events, COMPONENT};
use crate::runtime::timeout::with_timeout;
use crate::underlay::{
    BasicQos, Connection, DeliveredMessage, ExchangeDelete, FlowOk, OpenChannelOptions,
    QueueDelete, QueueDeleteOk, UnderlayChannel,
};
use arc_swap::ArcSwapOption;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_TAG: &str = "Channel:";
const CHANNEL_FN_NEW_TAG: &str = "new():";
const CHANNEL_FN_INITIALIZE_TAG: &str = "initialize():";
const CHANNEL_FN_CLOSE_TAG: &str = "close():";
const CHANNEL_FN_REOPEN_TAG: &str = "reopen():";
const CHANNEL_FN_PEER_CLOSE_TAG: &str = "handle_peer_close():";

pub type CloseCallbacks = CallbackCollection<Channel, Option<ChannelError>>;
pub type ReturnCallbacks = CallbackCollection<Channel, IncomingMessage>;

/// Everything that belongs to one open cycle; replaced as a whole on reopen.
struct OpenChannel {
    underlay: Arc<dyn UnderlayChannel>,
    default_exchange: Exchange,
}

pub(crate) struct ChannelInner {
    id: Uuid,
    connection: Arc<dyn Connection>,
    config: ChannelConfig,
    operation_lock: Mutex<()>,
    state: watch::Sender<ChannelState>,
    ready: ReadyLatch,
    generation: AtomicU64,
    open: ArcSwapOption<OpenChannel>,
    delivery_tag: AtomicU64,
    close_callbacks: CloseCallbacks,
    return_callbacks: ReturnCallbacks,
}

/// Applies `target` and clears the ready latch when dropped, unless disarmed.
///
/// Covers failed, timed out and cancelled transitions alike.
struct StateGuard<'a> {
    inner: &'a ChannelInner,
    target: ChannelState,
    armed: bool,
}

impl<'a> StateGuard<'a> {
    fn new(inner: &'a ChannelInner, target: ChannelState) -> Self {
        Self {
            inner,
            target,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.ready.clear();
            self.inner.state.send_replace(self.target);
        }
    }
}

/// One logical AMQP channel multiplexed over a shared connection.
///
/// `Channel` is a cheap handle; clones share the same state machine.
/// `initialize`, `close` and `reopen` are serialized by one operation lock.
/// Declarative operations are not: they only pass the readiness check when they
/// pick up the live handle, and fail with the handle's error if a concurrent
/// close invalidates it while they are in flight.
///
/// Close callbacks run from the underlying channel's close notification, before
/// the ready latch is cleared. They may `reopen` a channel the broker closed.
/// They must not wait for the channel to become ready or call `initialize` or
/// `close` on it, and must not reopen while handling a close the user requested.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

/// Non-owning reference held by exchanges, queues and transactions.
#[derive(Clone, Default)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl WeakChannel {
    /// A reference that never upgrades.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(|inner| Channel { inner })
    }
}

impl Channel {
    pub fn new(connection: Arc<dyn Connection>, config: ChannelConfig) -> Result<Self, ChannelError> {
        config.validate()?;

        let id = Uuid::new_v4();
        let label = format!("{CHANNEL_TAG}{id}");
        let (state, _) = watch::channel(ChannelState::Uninitialized);
        debug!(
            "{}:{} Channel created with {:?}",
            label, CHANNEL_FN_NEW_TAG, config
        );

        Ok(Self {
            inner: Arc::new(ChannelInner {
                id,
                connection,
                config,
                operation_lock: Mutex::new(()),
                state,
                ready: ReadyLatch::new(),
                generation: AtomicU64::new(0),
                open: ArcSwapOption::empty(),
                delivery_tag: AtomicU64::new(0),
                close_callbacks: CallbackCollection::new(label.clone()),
                return_callbacks: CallbackCollection::new(label),
            }),
        })
    }

    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    pub fn publisher_confirms(&self) -> bool {
        self.inner.config.publisher_confirms
    }

    pub fn on_return_raises(&self) -> bool {
        self.inner.config.on_return_raises
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    /// The channel has been opened and is ready for interaction.
    pub fn is_initialized(&self) -> bool {
        self.inner.ready.is_set()
    }

    /// The channel was never opened, or has been closed by the broker or by `close`.
    pub fn is_closed(&self) -> bool {
        if !self.is_initialized() || !self.state().is_ready() {
            return true;
        }
        self.inner
            .open
            .load_full()
            .map_or(true, |open| open.underlay.is_closed())
    }

    /// Broker-assigned number while open, the configured one otherwise.
    pub fn number(&self) -> Option<u16> {
        if self.is_initialized() {
            if let Some(open) = self.inner.open.load_full() {
                return Some(open.underlay.number());
            }
        }
        self.inner.config.channel_number
    }

    pub fn close_callbacks(&self) -> &CloseCallbacks {
        &self.inner.close_callbacks
    }

    pub fn return_callbacks(&self) -> &ReturnCallbacks {
        &self.inner.return_callbacks
    }

    /// Last delivery tag handed out in the current open cycle.
    pub fn delivery_tag(&self) -> u64 {
        self.inner.delivery_tag.load(Ordering::SeqCst)
    }

    pub fn next_delivery_tag(&self) -> u64 {
        self.inner.delivery_tag.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The live underlying channel.
    ///
    /// Fails with [`InvalidStateReason::NotOpened`] before the first open and with
    /// [`InvalidStateReason::Closed`] once closed from either side.
    pub fn channel(&self) -> Result<Arc<dyn UnderlayChannel>, ChannelError> {
        match self.state() {
            ChannelState::Uninitialized | ChannelState::Opening => {
                return Err(ChannelError::InvalidState(InvalidStateReason::NotOpened))
            }
            ChannelState::ClosedByUser | ChannelState::ClosedByPeer => {
                return Err(ChannelError::InvalidState(InvalidStateReason::Closed))
            }
            ChannelState::Ready => {}
        }

        let open = self
            .inner
            .open
            .load_full()
            .ok_or(ChannelError::InvalidState(InvalidStateReason::NotOpened))?;
        if !self.is_initialized() || open.underlay.is_closed() {
            return Err(ChannelError::InvalidState(InvalidStateReason::Closed));
        }
        Ok(open.underlay.clone())
    }

    /// The broker's nameless direct exchange for the current open cycle.
    pub fn default_exchange(&self) -> Result<Exchange, ChannelError> {
        self.channel()?;
        self.inner
            .open
            .load_full()
            .map(|open| open.default_exchange.clone())
            .ok_or(ChannelError::InvalidState(InvalidStateReason::NotOpened))
    }

    /// Suspends until the ready latch is set.
    pub async fn wait_ready(&self) {
        self.inner.ready.wait().await
    }

    fn check_can_initialize(&self) -> Result<(), ChannelError> {
        if self.is_initialized() {
            return Err(ChannelError::AlreadyInitialized);
        }
        match self.state() {
            ChannelState::Opening | ChannelState::Ready => Err(ChannelError::AlreadyInitialized),
            ChannelState::ClosedByUser => Err(ChannelError::ClosedByUser),
            ChannelState::Uninitialized | ChannelState::ClosedByPeer => Ok(()),
        }
    }

    pub async fn initialize(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        self.check_can_initialize()?;

        let _operation = self.inner.operation_lock.lock().await;
        self.check_can_initialize()?;

        debug!(
            "{}{}:{} Initializing channel",
            CHANNEL_TAG, self.inner.id, CHANNEL_FN_INITIALIZE_TAG
        );
        let rollback = StateGuard::new(&self.inner, self.state());
        self.open(timeout, rollback).await
    }

    /// Initializes the channel unless that already happened, then returns it.
    ///
    /// Waits for a concurrent open to settle instead of failing.
    pub async fn ensure_ready(&self) -> Result<Channel, ChannelError> {
        match self.initialize(None).await {
            Ok(()) => return Ok(self.clone()),
            Err(ChannelError::AlreadyInitialized) => {}
            Err(err) => return Err(err),
        }

        let mut states = self.inner.state.subscribe();
        let settled = states
            .wait_for(|state| *state != ChannelState::Opening)
            .await
            .map(|state| *state)
            .map_err(|_| ChannelError::InvalidState(InvalidStateReason::Closed))?;

        match settled {
            ChannelState::Ready => Ok(self.clone()),
            ChannelState::Uninitialized | ChannelState::Opening => {
                Err(ChannelError::InvalidState(InvalidStateReason::NotOpened))
            }
            ChannelState::ClosedByUser | ChannelState::ClosedByPeer => {
                Err(ChannelError::InvalidState(InvalidStateReason::Closed))
            }
        }
    }

    /// Runs the open sequence. Must be called with the operation lock held.
    async fn open(
        &self,
        timeout: Option<Duration>,
        rollback: StateGuard<'_>,
    ) -> Result<(), ChannelError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.state.send_replace(ChannelState::Opening);
        debug!(
            event = events::CHANNEL_OPENING,
            component = COMPONENT,
            channel_id = %self.inner.id,
            generation,
            "opening channel"
        );

        let bridge = Arc::new(ChannelEvents::new(self.downgrade(), generation));
        let underlay = match with_timeout(timeout, self.open_underlay(bridge.clone())).await {
            Ok(underlay) => underlay,
            Err(err) => {
                warn!(
                    event = events::CHANNEL_OPEN_FAILED,
                    component = COMPONENT,
                    channel_id = %self.inner.id,
                    err = %err,
                    "unable to open channel"
                );
                return Err(err);
            }
        };

        if underlay.is_closed() {
            warn!(
                event = events::CHANNEL_OPEN_FAILED,
                component = COMPONENT,
                channel_id = %self.inner.id,
                "channel closed by broker during open"
            );
            return Err(ChannelError::InvalidState(InvalidStateReason::Closed));
        }

        self.inner.delivery_tag.store(0, Ordering::SeqCst);
        let default_exchange = Exchange::new(
            self.downgrade(),
            "",
            ExchangeType::Direct,
            ExchangeOptions::default(),
        );
        self.inner.open.store(Some(Arc::new(OpenChannel {
            underlay: underlay.clone(),
            default_exchange,
        })));

        rollback.disarm();
        self.inner.state.send_replace(ChannelState::Ready);
        self.inner.ready.set();
        // A close notification that arrived while still `Opening` left the state alone.
        if underlay.is_closed() && self.mark_closed_by_peer(generation) {
            warn!(
                event = events::CHANNEL_OPEN_FAILED,
                component = COMPONENT,
                channel_id = %self.inner.id,
                "channel closed by broker right after open"
            );
            return Err(ChannelError::InvalidState(InvalidStateReason::Closed));
        }
        underlay.add_return_listener(bridge);

        info!(
            event = events::CHANNEL_OPENED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            number = underlay.number(),
            "channel opened"
        );
        Ok(())
    }

    async fn open_underlay(
        &self,
        bridge: Arc<ChannelEvents>,
    ) -> Result<Arc<dyn UnderlayChannel>, ChannelError> {
        self.inner.connection.wait_connected().await;
        let transport = self.inner.connection.transport()?;
        let options = OpenChannelOptions {
            publisher_confirms: self.inner.config.publisher_confirms,
            on_return_raises: self.inner.config.on_return_raises,
            channel_number: self.inner.config.channel_number,
        };
        transport.open_channel(options, bridge).await
    }

    /// Closes the channel; `reason` is forwarded to the underlying channel.
    ///
    /// Never fails. A failure of the underlying close is logged and the channel
    /// is marked closed by the user regardless.
    pub async fn close(&self, reason: Option<ChannelError>) {
        let _operation = self.inner.operation_lock.lock().await;

        match self.state() {
            ChannelState::Uninitialized | ChannelState::Opening => {
                warn!(
                    event = events::CHANNEL_CLOSE_NOOP,
                    component = COMPONENT,
                    channel_id = %self.inner.id,
                    "Channel not opened"
                );
                return;
            }
            ChannelState::ClosedByUser => {
                debug!(
                    event = events::CHANNEL_CLOSE_NOOP,
                    component = COMPONENT,
                    channel_id = %self.inner.id,
                    "Channel already closed"
                );
                return;
            }
            ChannelState::ClosedByPeer => {
                drop(StateGuard::new(&self.inner, ChannelState::ClosedByUser));
                debug!(
                    "{}{}:{} broker closed the channel earlier; now closed by user",
                    CHANNEL_TAG, self.inner.id, CHANNEL_FN_CLOSE_TAG
                );
                return;
            }
            ChannelState::Ready => {}
        }

        debug!(
            event = events::CHANNEL_CLOSE_REQUESTED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            reason = ?reason,
            "Closing channel"
        );
        let closed = StateGuard::new(&self.inner, ChannelState::ClosedByUser);
        if let Some(open) = self.inner.open.load_full() {
            if let Err(err) = open.underlay.close(reason).await {
                warn!(
                    event = events::CHANNEL_CLOSE_FAILED,
                    component = COMPONENT,
                    channel_id = %self.inner.id,
                    err = %err,
                    "underlying channel close failed"
                );
            }
        }
        drop(closed);

        info!(
            event = events::CHANNEL_CLOSED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            "channel closed"
        );
    }

    /// Replaces the underlying channel and becomes ready again.
    ///
    /// Callback subscriptions and configuration survive; the default exchange
    /// and the delivery-tag counter start over.
    pub async fn reopen(&self) -> Result<(), ChannelError> {
        debug!(
            "{}{}:{} Start reopening channel",
            CHANNEL_TAG, self.inner.id, CHANNEL_FN_REOPEN_TAG
        );
        let _operation = self.inner.operation_lock.lock().await;

        let rollback_state = match self.state() {
            ChannelState::Uninitialized => ChannelState::Uninitialized,
            _ => ChannelState::ClosedByPeer,
        };
        let rollback = StateGuard::new(&self.inner, rollback_state);

        // Late events of the discarded handle belong to an old generation.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.ready.clear();
        if let Some(stale) = self.inner.open.swap(None) {
            if !stale.underlay.is_closed() {
                if let Err(err) = stale.underlay.close(None).await {
                    warn!(
                        "{}{}:{} unable to close discarded channel: {}",
                        CHANNEL_TAG, self.inner.id, CHANNEL_FN_REOPEN_TAG, err
                    );
                }
            }
        }

        info!(
            event = events::CHANNEL_REOPENING,
            component = COMPONENT,
            channel_id = %self.inner.id,
            "reopening channel"
        );
        self.open(None, rollback).await
    }

    pub(crate) async fn handle_peer_close(&self, generation: u64, reason: Option<ChannelError>) {
        if generation != self.inner.generation.load(Ordering::SeqCst) {
            debug!(
                "{}{}:{} ignoring close of replaced channel generation {}",
                CHANNEL_TAG, self.inner.id, CHANNEL_FN_PEER_CLOSE_TAG, generation
            );
            return;
        }

        info!(
            event = events::CHANNEL_PEER_CLOSED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            reason = ?reason,
            "underlying channel closed"
        );

        self.inner.close_callbacks.dispatch(self, &reason).await;

        if !self.mark_closed_by_peer(generation) {
            debug!(
                "{}{}:{} channel was reopened while close callbacks ran",
                CHANNEL_TAG, self.inner.id, CHANNEL_FN_PEER_CLOSE_TAG
            );
        }
    }

    /// Moves `Ready` to `ClosedByPeer` and clears the latch, but only while
    /// `generation` is still the current open cycle. Returns false otherwise.
    fn mark_closed_by_peer(&self, generation: u64) -> bool {
        let mut current = true;
        self.inner.state.send_if_modified(|state| {
            // The state lock orders this against `open` publishing `Ready`.
            if generation != self.inner.generation.load(Ordering::SeqCst) {
                current = false;
                return false;
            }
            self.inner.ready.clear();
            if *state == ChannelState::Ready {
                *state = ChannelState::ClosedByPeer;
                return true;
            }
            false
        });
        current
    }

    pub(crate) async fn handle_return(&self, generation: u64, message: DeliveredMessage) {
        if generation != self.inner.generation.load(Ordering::SeqCst) {
            return;
        }

        debug!(
            event = events::CHANNEL_RETURN_RECEIVED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            reply_code = message.reply_code,
            "message returned by broker"
        );
        let message = IncomingMessage::new(message, true);
        self.inner.return_callbacks.dispatch(self, &message).await;
    }

    /// Initializes on entry (unless already initialized); the returned guard closes on exit.
    pub async fn scope(&self) -> Result<ChannelScope, ChannelError> {
        ChannelScope::enter(self.clone()).await
    }

    /// Runs `body` inside a [`ChannelScope`]. An error of the body becomes the close reason.
    pub async fn run_scoped<T, F, Fut>(&self, body: F) -> Result<T, ChannelError>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let scope = self.scope().await?;
        let outcome = body(self.clone()).await;
        let reason = outcome.as_ref().err().cloned();
        scope.exit(reason).await;
        outcome
    }

    pub async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeType,
        options: ExchangeOptions,
        timeout: Option<Duration>,
    ) -> Result<Exchange, ChannelError> {
        let exchange = Exchange::new(self.downgrade(), name, kind, options);
        exchange.declare(timeout).await?;

        debug!(
            event = events::EXCHANGE_DECLARED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            exchange = ?exchange,
            "exchange declared"
        );
        Ok(exchange)
    }

    /// With `ensure`, the same as a passive [`Channel::declare_exchange`]; otherwise a
    /// local reference that never contacts the broker.
    pub async fn get_exchange(&self, name: &str, ensure: bool) -> Result<Exchange, ChannelError> {
        if ensure {
            return self
                .declare_exchange(name, ExchangeType::Direct, ExchangeOptions::passive(), None)
                .await;
        }
        Ok(Exchange::new(
            self.downgrade(),
            name,
            ExchangeType::Direct,
            ExchangeOptions::passive(),
        ))
    }

    /// Declares a queue; an empty `name` lets the broker pick one.
    pub async fn declare_queue(
        &self,
        name: &str,
        options: QueueOptions,
        timeout: Option<Duration>,
    ) -> Result<Queue, ChannelError> {
        let mut queue = Queue::new(self.downgrade(), name, options);
        queue.declare(timeout).await?;

        debug!(
            event = events::QUEUE_DECLARED,
            component = COMPONENT,
            channel_id = %self.inner.id,
            queue = ?queue,
            "queue declared"
        );
        Ok(queue)
    }

    /// With `ensure`, the same as a passive [`Channel::declare_queue`]; otherwise a
    /// local reference that never contacts the broker.
    pub async fn get_queue(&self, name: &str, ensure: bool) -> Result<Queue, ChannelError> {
        if ensure {
            return self.declare_queue(name, QueueOptions::passive(), None).await;
        }
        Ok(Queue::new(self.downgrade(), name, QueueOptions::passive()))
    }

    pub async fn set_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
        timeout: Option<Duration>,
    ) -> Result<(), ChannelError> {
        let underlay = self.channel()?;
        let method = BasicQos {
            prefetch_count,
            prefetch_size,
            global,
        };
        with_timeout(timeout, underlay.basic_qos(method)).await
    }

    pub async fn queue_delete(
        &self,
        queue_name: &str,
        options: QueueDeleteOptions,
        timeout: Option<Duration>,
    ) -> Result<QueueDeleteOk, ChannelError> {
        let underlay = self.channel()?;
        let method = QueueDelete {
            queue: queue_name.to_string(),
            if_unused: options.if_unused,
            if_empty: options.if_empty,
            nowait: options.nowait,
        };
        with_timeout(timeout, underlay.queue_delete(method)).await
    }

    pub async fn exchange_delete(
        &self,
        exchange_name: &str,
        options: ExchangeDeleteOptions,
        timeout: Option<Duration>,
    ) -> Result<(), ChannelError> {
        let underlay = self.channel()?;
        let method = ExchangeDelete {
            exchange: exchange_name.to_string(),
            if_unused: options.if_unused,
            nowait: options.nowait,
        };
        with_timeout(timeout, underlay.exchange_delete(method)).await
    }

    /// Transactions and publisher confirms exclude each other on one channel.
    pub fn transaction(&self) -> Result<Transaction, ChannelError> {
        if self.inner.config.publisher_confirms {
            return Err(ChannelError::configuration(
                "Cannot create transaction when publisher confirms are enabled",
            ));
        }
        Ok(Transaction::new(self.downgrade()))
    }

    pub async fn flow(&self, active: bool, timeout: Option<Duration>) -> Result<FlowOk, ChannelError> {
        let underlay = self.channel()?;
        with_timeout(timeout, underlay.flow(active)).await
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(number) => write!(f, "{number}"),
            None => f.write_str("Not initialized channel"),
        }
    }
}

impl Debug for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.number() {
            Some(number) => write!(f, "<Channel #{} {} ({})>", number, self.inner.id, self.state()),
            None => write!(f, "<Channel #- {} ({})>", self.inner.id, self.state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Channel;
    use crate::callbacks::{Callback, CallbackResult};
    use crate::config::ChannelConfig;
    use crate::error::{reply_code, ChannelError, ErrorKind, InvalidStateReason};
    use crate::lifecycle::state::ChannelState;
    use crate::underlay::{
        BasicQos, CloseHook, Connection, ExchangeDeclare, ExchangeDelete, FlowOk,
        OpenChannelOptions, QueueDeclare, QueueDeclareOk, QueueDelete, QueueDeleteOk,
        ReturnListener, Transport, UnderlayChannel,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct TestUnderlay {
        number: u16,
        closed: AtomicBool,
        on_close: Arc<dyn CloseHook>,
    }

    impl TestUnderlay {
        async fn close_from_broker(&self, reason: ChannelError) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.on_close.on_close(Some(reason)).await;
            }
        }
    }

    #[async_trait]
    impl UnderlayChannel for TestUnderlay {
        fn number(&self) -> u16 {
            self.number
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        async fn close(&self, reason: Option<ChannelError>) -> Result<(), ChannelError> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.on_close.on_close(reason).await;
            }
            Ok(())
        }

        async fn exchange_declare(&self, _method: ExchangeDeclare) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn exchange_delete(&self, _method: ExchangeDelete) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn queue_declare(&self, method: QueueDeclare) -> Result<QueueDeclareOk, ChannelError> {
            Ok(QueueDeclareOk {
                queue: method.queue,
                message_count: 0,
                consumer_count: 0,
            })
        }

        async fn queue_delete(&self, _method: QueueDelete) -> Result<QueueDeleteOk, ChannelError> {
            Ok(QueueDeleteOk { message_count: 0 })
        }

        async fn basic_qos(&self, _method: BasicQos) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn flow(&self, active: bool) -> Result<FlowOk, ChannelError> {
            Ok(FlowOk { active })
        }

        async fn tx_select(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn tx_commit(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn tx_rollback(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        fn add_return_listener(&self, _listener: Arc<dyn ReturnListener>) {}
    }

    #[derive(Default)]
    struct TestTransport {
        next_number: AtomicU16,
        refuse: AtomicBool,
        opened: Mutex<Vec<Arc<TestUnderlay>>>,
    }

    impl TestTransport {
        fn opened(&self) -> usize {
            self.opened.lock().expect("lock opened").len()
        }

        fn latest(&self) -> Arc<TestUnderlay> {
            self.opened
                .lock()
                .expect("lock opened")
                .last()
                .cloned()
                .expect("an opened channel")
        }
    }

    #[async_trait]
    impl Transport for TestTransport {
        async fn open_channel(
            &self,
            _options: OpenChannelOptions,
            on_close: Arc<dyn CloseHook>,
        ) -> Result<Arc<dyn UnderlayChannel>, ChannelError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ChannelError::transport("connection reset"));
            }
            let underlay = Arc::new(TestUnderlay {
                number: self.next_number.fetch_add(1, Ordering::SeqCst) + 1,
                closed: AtomicBool::new(false),
                on_close,
            });
            self.opened
                .lock()
                .expect("lock opened")
                .push(underlay.clone());
            let underlay: Arc<dyn UnderlayChannel> = underlay;
            Ok(underlay)
        }
    }

    struct TestConnection {
        transport: Arc<TestTransport>,
        connected: bool,
    }

    #[async_trait]
    impl Connection for TestConnection {
        async fn wait_connected(&self) {
            if !self.connected {
                std::future::pending::<()>().await;
            }
        }

        fn transport(&self) -> Result<Arc<dyn Transport>, ChannelError> {
            let transport: Arc<dyn Transport> = self.transport.clone();
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct CloseProbe {
        seen: Mutex<Vec<(Option<ChannelError>, bool)>>,
    }

    impl CloseProbe {
        fn seen(&self) -> Vec<(Option<ChannelError>, bool)> {
            self.seen.lock().expect("lock seen").clone()
        }
    }

    #[async_trait]
    impl Callback<Channel, Option<ChannelError>> for CloseProbe {
        async fn call(&self, channel: &Channel, reason: &Option<ChannelError>) -> CallbackResult {
            self.seen
                .lock()
                .expect("lock seen")
                .push((reason.clone(), channel.is_initialized()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct ReopenOnClose {
        reopened: AtomicBool,
    }

    #[async_trait]
    impl Callback<Channel, Option<ChannelError>> for ReopenOnClose {
        async fn call(&self, channel: &Channel, _reason: &Option<ChannelError>) -> CallbackResult {
            channel.reopen().await?;
            self.reopened.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn connected(config: ChannelConfig) -> (Channel, Arc<TestTransport>) {
        let transport = Arc::new(TestTransport::default());
        let connection = Arc::new(TestConnection {
            transport: transport.clone(),
            connected: true,
        });
        let channel = Channel::new(connection, config).expect("valid config");
        (channel, transport)
    }

    fn not_opened() -> ChannelError {
        ChannelError::InvalidState(InvalidStateReason::NotOpened)
    }

    fn closed() -> ChannelError {
        ChannelError::InvalidState(InvalidStateReason::Closed)
    }

    #[test]
    fn rejects_on_return_raises_without_publisher_confirms() {
        let transport = Arc::new(TestTransport::default());
        let connection = Arc::new(TestConnection {
            transport: transport.clone(),
            connected: true,
        });
        let config = ChannelConfig::default()
            .with_publisher_confirms(false)
            .with_on_return_raises(true);

        let err = Channel::new(connection, config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(transport.opened(), 0);
    }

    #[test]
    fn readiness_check_before_open_reports_not_opened() {
        let (channel, _) = connected(ChannelConfig::default());

        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert!(!channel.is_initialized());
        assert!(channel.is_closed());
        assert_eq!(channel.channel().err(), Some(not_opened()));
        assert_eq!(channel.default_exchange().err(), Some(not_opened()));
    }

    #[tokio::test]
    async fn initialize_twice_fails_without_side_effects() {
        let (channel, transport) = connected(ChannelConfig::default());

        channel.initialize(None).await.expect("first initialize");
        let err = channel.initialize(None).await.unwrap_err();

        assert_eq!(err, ChannelError::AlreadyInitialized);
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(transport.opened(), 1);
        assert_eq!(channel.state(), ChannelState::Ready);
        assert!(channel.is_initialized());
        assert!(!channel.is_closed());
        assert_eq!(channel.number(), Some(1));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (channel, transport) = connected(ChannelConfig::default());
        channel.initialize(None).await.expect("initialize");

        channel.close(None).await;
        channel.close(None).await;
        channel.close(None).await;

        assert_eq!(channel.state(), ChannelState::ClosedByUser);
        assert!(!channel.is_initialized());
        assert!(channel.is_closed());
        assert!(transport.latest().is_closed());
        assert_eq!(channel.channel().err(), Some(closed()));
        assert_eq!(
            channel.initialize(None).await.unwrap_err(),
            ChannelError::ClosedByUser
        );
    }

    #[tokio::test]
    async fn close_before_initialize_is_a_noop() {
        let (channel, transport) = connected(ChannelConfig::default());

        channel.close(None).await;
        assert_eq!(channel.state(), ChannelState::Uninitialized);

        channel.initialize(None).await.expect("initialize after no-op close");
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn user_close_reason_reaches_close_callbacks() {
        let (channel, _) = connected(ChannelConfig::default());
        let probe = Arc::new(CloseProbe::default());
        channel.close_callbacks().add(probe.clone());
        channel.initialize(None).await.expect("initialize");

        let reason = ChannelError::transport("shutting down");
        channel.close(Some(reason.clone())).await;

        assert_eq!(probe.seen(), vec![(Some(reason), true)]);
        assert_eq!(channel.state(), ChannelState::ClosedByUser);
    }

    #[tokio::test]
    async fn peer_close_runs_callbacks_before_clearing_the_latch() {
        let (channel, transport) = connected(ChannelConfig::default());
        let probe = Arc::new(CloseProbe::default());
        channel.close_callbacks().add(probe.clone());
        channel.initialize(None).await.expect("initialize");

        let reason = ChannelError::broker(reply_code::NOT_FOUND, "NOT_FOUND - no queue 'q2'");
        transport.latest().close_from_broker(reason.clone()).await;

        assert_eq!(probe.seen(), vec![(Some(reason), true)]);
        assert_eq!(channel.state(), ChannelState::ClosedByPeer);
        assert!(!channel.is_initialized());
        assert_eq!(channel.channel().err(), Some(closed()));
    }

    #[tokio::test]
    async fn close_after_peer_close_marks_closed_by_user() {
        let (channel, transport) = connected(ChannelConfig::default());
        channel.initialize(None).await.expect("initialize");
        transport
            .latest()
            .close_from_broker(ChannelError::transport("gone"))
            .await;

        channel.close(None).await;

        assert_eq!(channel.state(), ChannelState::ClosedByUser);
        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn initialize_is_allowed_after_peer_close() {
        let (channel, transport) = connected(ChannelConfig::default());
        channel.initialize(None).await.expect("initialize");
        transport
            .latest()
            .close_from_broker(ChannelError::transport("gone"))
            .await;

        channel.initialize(None).await.expect("initialize again");

        assert_eq!(transport.opened(), 2);
        assert_eq!(channel.state(), ChannelState::Ready);
        assert_eq!(channel.number(), Some(2));
    }

    #[tokio::test]
    async fn reopen_keeps_callbacks_and_starts_a_new_cycle() {
        let (channel, transport) = connected(ChannelConfig::default());
        let probe = Arc::new(CloseProbe::default());
        channel.close_callbacks().add(probe.clone());
        channel.initialize(None).await.expect("initialize");
        channel.next_delivery_tag();
        channel.next_delivery_tag();
        let first_default = channel.default_exchange().expect("default exchange");

        transport
            .latest()
            .close_from_broker(ChannelError::transport("gone"))
            .await;
        channel.reopen().await.expect("reopen");

        assert_eq!(channel.state(), ChannelState::Ready);
        assert!(channel.is_initialized());
        assert_eq!(channel.number(), Some(2));
        assert_eq!(channel.delivery_tag(), 0);
        assert_eq!(channel.close_callbacks().len(), 1);
        assert_eq!(probe.seen().len(), 1);

        let second_default = channel.default_exchange().expect("default exchange");
        assert_eq!(first_default, second_default);
        assert_eq!(second_default.name(), "");
    }

    #[tokio::test]
    async fn reopen_from_ready_discards_the_live_handle() {
        let (channel, transport) = connected(ChannelConfig::default());
        let probe = Arc::new(CloseProbe::default());
        channel.close_callbacks().add(probe.clone());
        channel.initialize(None).await.expect("initialize");
        let first = transport.latest();

        channel.reopen().await.expect("reopen");

        assert!(first.is_closed());
        assert!(probe.seen().is_empty());
        assert_eq!(channel.state(), ChannelState::Ready);
        assert_eq!(transport.opened(), 2);
    }

    #[tokio::test]
    async fn late_close_of_a_replaced_handle_is_ignored() {
        let (channel, transport) = connected(ChannelConfig::default());
        let probe = Arc::new(CloseProbe::default());
        channel.close_callbacks().add(probe.clone());
        channel.initialize(None).await.expect("initialize");
        let first = transport.latest();

        channel.reopen().await.expect("reopen");
        first
            .on_close
            .on_close(Some(ChannelError::transport("late")))
            .await;

        assert!(probe.seen().is_empty());
        assert_eq!(channel.state(), ChannelState::Ready);
        assert!(channel.is_initialized());
    }

    #[tokio::test]
    async fn close_callback_can_reopen_a_broker_closed_channel() {
        let (channel, transport) = connected(ChannelConfig::default());
        let recovery = Arc::new(ReopenOnClose::default());
        channel.close_callbacks().add(recovery.clone());
        channel.initialize(None).await.expect("initialize");
        let first = transport.latest();

        first
            .close_from_broker(ChannelError::broker(reply_code::CHANNEL_ERROR, "CHANNEL_ERROR"))
            .await;

        assert!(recovery.reopened.load(Ordering::SeqCst));
        assert_eq!(transport.opened(), 2);
        assert_eq!(channel.state(), ChannelState::Ready);
        assert!(channel.is_initialized());
        assert!(!channel.is_closed());
        assert_eq!(channel.number(), Some(2));
    }

    #[tokio::test]
    async fn failed_open_rolls_back_and_can_be_retried() {
        let (channel, transport) = connected(ChannelConfig::default());
        transport.refuse.store(true, Ordering::SeqCst);

        let err = channel.initialize(None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert!(!channel.is_initialized());

        transport.refuse.store(false, Ordering::SeqCst);
        channel.initialize(None).await.expect("retry");
        assert_eq!(channel.state(), ChannelState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_timeout_leaves_the_channel_uninitialized() {
        let transport = Arc::new(TestTransport::default());
        let connection = Arc::new(TestConnection {
            transport: transport.clone(),
            connected: false,
        });
        let channel = Channel::new(connection, ChannelConfig::default()).expect("valid config");

        let limit = Duration::from_millis(50);
        let err = channel.initialize(Some(limit)).await.unwrap_err();

        assert_eq!(err, ChannelError::Timeout(limit));
        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn ensure_ready_initializes_once() {
        let (channel, transport) = connected(ChannelConfig::default());

        let ready = channel.ensure_ready().await.expect("ensure ready");
        assert!(ready.is_initialized());
        channel.ensure_ready().await.expect("ensure ready again");

        assert_eq!(transport.opened(), 1);
    }

    #[tokio::test]
    async fn transaction_requires_publisher_confirms_off() {
        let (confirming, _) = connected(ChannelConfig::default());
        let err = confirming.transaction().err().expect("confirms exclude transactions");
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let (plain, _) = connected(ChannelConfig::default().with_publisher_confirms(false));
        assert!(plain.transaction().is_ok());
    }

    #[test]
    fn delivery_tags_count_up() {
        let (channel, _) = connected(ChannelConfig::default());
        assert_eq!(channel.delivery_tag(), 0);
        assert_eq!(channel.next_delivery_tag(), 1);
        assert_eq!(channel.next_delivery_tag(), 2);
        assert_eq!(channel.delivery_tag(), 2);
    }

    #[tokio::test]
    async fn display_prefers_the_live_number() {
        let (unnumbered, _) = connected(ChannelConfig::default());
        assert_eq!(unnumbered.to_string(), "Not initialized channel");

        let (numbered, _) = connected(ChannelConfig::default().with_channel_number(5));
        assert_eq!(numbered.to_string(), "5");

        unnumbered.initialize(None).await.expect("initialize");
        assert_eq!(unnumbered.to_string(), "1");
        assert!(format!("{unnumbered:?}").starts_with("<Channel #1 "));
    }
}
