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
use std::future::Future;
use std::time::Duration;

/// Bounds one broker round-trip by the caller's deadline.
///
/// An elapsed deadline only fails this request; the pending method is dropped
/// and nothing on the channel changes.
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, request: F) -> Result<T, ChannelError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    match timeout {
        None => request.await,
        Some(limit) => tokio::time::timeout(limit, request)
            .await
            .map_err(|_elapsed| ChannelError::Timeout(limit))?,
    }
}

#[cfg(test)]
mod tests {
    use super::with_timeout;
    use crate::error::{ChannelError, ErrorKind};
    use std::time::Duration;

    #[tokio::test]
    async fn passes_through_without_deadline() {
        let value = with_timeout(None, async { Ok::<_, ChannelError>(5) }).await;
        assert_eq!(value, Ok(5));
    }

    #[tokio::test]
    async fn passes_through_errors_unchanged() {
        let value: Result<(), _> = with_timeout(Some(Duration::from_secs(1)), async {
            Err(ChannelError::transport("reset"))
        })
        .await;
        assert_eq!(value, Err(ChannelError::transport("reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_is_a_timeout() {
        let limit = Duration::from_millis(50);
        let value: Result<(), _> = with_timeout(Some(limit), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let err = value.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err, ChannelError::Timeout(limit));
    }
}
