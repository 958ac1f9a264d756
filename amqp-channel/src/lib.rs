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

//! # amqp-channel
//!
//! `amqp-channel` manages the lifecycle of one logical AMQP 0-9-1 channel on top of
//! a shared connection: opening and reopening it, closing it from either side,
//! fanning close and return notifications out to callbacks, and issuing the
//! declarative broker methods (exchanges, queues, QoS, flow, transactions).
//!
//! Framing, sockets and connection recovery stay behind the traits in
//! [`underlay`]. A [`Channel`] is built on an `Arc<dyn underlay::Connection>` and
//! asks it for a fresh underlying channel on every open.
//!
//! ```
//! use std::sync::Arc;
//! use amqp_channel::entities::{ExchangeOptions, ExchangeType, QueueOptions};
//! use amqp_channel::{Channel, ChannelConfig, ChannelError, ChannelState, ErrorKind};
//! use integration_test_utils::InMemoryBroker;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = Arc::new(InMemoryBroker::new());
//! let channel = Channel::new(broker.clone(), ChannelConfig::default()).unwrap();
//!
//! channel.initialize(None).await.unwrap();
//! assert_eq!(channel.state(), ChannelState::Ready);
//!
//! let exchange = channel
//!     .declare_exchange("e1", ExchangeType::Topic, ExchangeOptions::default(), None)
//!     .await
//!     .unwrap();
//! let queue = channel
//!     .declare_queue("q1", QueueOptions::default(), None)
//!     .await
//!     .unwrap();
//! assert_eq!(exchange.name(), "e1");
//! assert_eq!(queue.name(), "q1");
//!
//! // A passive declare of a missing queue is a broker rejection; the broker
//! // closes the channel in response.
//! let err = channel.get_queue("q2", true).await.unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::BrokerRejection);
//! assert_eq!(channel.state(), ChannelState::ClosedByPeer);
//!
//! channel.reopen().await.unwrap();
//! channel.close(None).await;
//! assert!(matches!(
//!     channel.channel(),
//!     Err(ChannelError::InvalidState(_))
//! ));
//! # });
//! ```
//!
//! ## Concurrency
//!
//! `initialize`, `close` and `reopen` are serialized per channel. Declarative
//! methods run concurrently with each other and with lifecycle transitions; one
//! that loses a race with `close` fails instead of hanging.
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events. Lifecycle events carry a stable
//! `event` field (see `observability::events`). Library code never installs a
//! global subscriber; binaries and tests initialize `tracing_subscriber` once at
//! their boundary.

pub mod callbacks;

mod config;
pub use config::ChannelConfig;

pub mod entities;

mod error;
pub use error::{reply_code, ChannelError, ErrorKind, InvalidStateReason};

mod lifecycle;
pub use lifecycle::{Channel, ChannelScope, ChannelState, CloseCallbacks, ReturnCallbacks, WeakChannel};

#[doc(hidden)]
pub mod observability;
mod runtime;
pub mod underlay;
