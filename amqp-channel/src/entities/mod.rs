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

//! Entities a [`crate::Channel`] creates: exchanges, queues, transactions and
//! returned messages. Exchanges and queues keep a weak reference to their
//! channel and issue their own methods through its live handle.

mod exchange;
pub use exchange::{Exchange, ExchangeDeleteOptions, ExchangeOptions, ExchangeType};

mod message;
pub use message::IncomingMessage;

mod queue;
pub use queue::{Queue, QueueDeleteOptions, QueueOptions};

mod transaction;
pub use transaction::{Transaction, TransactionState};
