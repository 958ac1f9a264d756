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

//! Test support for `amqp-channel`: an in-memory broker implementing the
//! connection boundary, recording callbacks and one-time logging setup.

mod broker;
pub use broker::{InMemoryBroker, MockUnderlayChannel};

mod callbacks;
pub use callbacks::{CloseRecord, FailingCallback, RecordingCloseCallback, RecordingReturnCallback};

mod logging;
pub use logging::init_logging;
