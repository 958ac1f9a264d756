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

//! Channel state machine.
//!
//! ```text
//! Uninitialized --initialize--> Opening --ok--> Ready
//!                                  |              |  \
//!                         fail/timeout/cancel     |   broker closes --> ClosedByPeer
//!                                  v              |                        |
//!                          previous state      close                initialize/reopen
//!                                                 v                        v
//!                                           ClosedByUser (final)        Opening
//! ```

mod channel;
pub use channel::{Channel, CloseCallbacks, ReturnCallbacks, WeakChannel};

mod events;

mod scope;
pub use scope::ChannelScope;

mod state;
pub use state::ChannelState;
