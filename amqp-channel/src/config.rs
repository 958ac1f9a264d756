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

use crate::error::ChannelError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

const CHANNEL_CONFIG_TAG: &str = "ChannelConfig:";
const CHANNEL_CONFIG_FN_FROM_JSON_FILE_TAG: &str = "from_json_file():";

/// Flags fixed for the whole life of a [`crate::Channel`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Broker-visible channel id; assigned by the broker when `None`.
    pub channel_number: Option<u16>,
    /// Track broker acknowledgements of every publish.
    pub publisher_confirms: bool,
    /// Turn undeliverable-message returns into publish failures.
    /// Only valid together with `publisher_confirms`.
    pub on_return_raises: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_number: None,
            publisher_confirms: true,
            on_return_raises: false,
        }
    }
}

impl ChannelConfig {
    pub fn with_channel_number(mut self, channel_number: u16) -> Self {
        self.channel_number = Some(channel_number);
        self
    }

    pub fn with_publisher_confirms(mut self, publisher_confirms: bool) -> Self {
        self.publisher_confirms = publisher_confirms;
        self
    }

    pub fn with_on_return_raises(mut self, on_return_raises: bool) -> Self {
        self.on_return_raises = on_return_raises;
        self
    }

    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.on_return_raises && !self.publisher_confirms {
            return Err(ChannelError::configuration(
                "\"on_return_raises\" not applicable without \"publisher_confirms\"",
            ));
        }
        Ok(())
    }

    pub fn from_json_str(document: &str) -> Result<Self, ChannelError> {
        let config: ChannelConfig = serde_json::from_str(document).map_err(|error| {
            ChannelError::configuration(format!("Unable to parse JSON: {error}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        debug!(
            "{}:{} reading channel config from {:?}",
            CHANNEL_CONFIG_TAG, CHANNEL_CONFIG_FN_FROM_JSON_FILE_TAG, path
        );
        let data = fs::read_to_string(path).map_err(|error| {
            ChannelError::configuration(format!("Unable to read file {path:?}: {error}"))
        })?;
        Self::from_json_str(&data)
    }
}
