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

//! Ordered, per-owner handler registries.
//!
//! A [`CallbackCollection`] is owned by one object (a [`crate::Channel`] for the
//! close and return collections) and fans a shared argument out to every
//! registered [`Callback`]. Handlers are identified by their `Arc` allocation, so
//! adding the same `Arc` twice or discarding an unknown one is a no-op.
//!
//! Dispatch works on a snapshot taken when it starts: handlers added or removed
//! while a dispatch is running only take effect for the next one. A handler that
//! fails or panics is logged and recorded in the returned [`DispatchReport`]; the
//! remaining handlers still run.

use crate::observability::{events, COMPONENT};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[async_trait]
pub trait Callback<O, A>: Send + Sync {
    async fn call(&self, owner: &O, arg: &A) -> CallbackResult;
}

/// One handler that failed during a dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CallbackFailure {
    /// Position of the handler in the dispatch snapshot.
    pub position: usize,
    pub message: String,
}

/// Aggregate outcome of [`CallbackCollection::dispatch`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failures: Vec<CallbackFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CallbackCollection<O, A> {
    owner_label: String,
    handlers: Mutex<Vec<Arc<dyn Callback<O, A>>>>,
}

#[inline(always)]
fn same_handler<O, A>(left: &Arc<dyn Callback<O, A>>, right: &Arc<dyn Callback<O, A>>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left) as *const (),
        Arc::as_ptr(right) as *const (),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "handler panicked".to_string()
}

impl<O, A> CallbackCollection<O, A> {
    pub fn new(owner_label: impl Into<String>) -> Self {
        Self {
            owner_label: owner_label.into(),
            handlers: Mutex::new(Vec::new()),
        }
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<Arc<dyn Callback<O, A>>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn owner_label(&self) -> &str {
        &self.owner_label
    }

    /// Returns `false` when the handler was already registered.
    pub fn add(&self, handler: Arc<dyn Callback<O, A>>) -> bool {
        let mut handlers = self.handlers();
        if handlers.iter().any(|known| same_handler(known, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Returns `false` when the handler was not registered.
    pub fn discard(&self, handler: &Arc<dyn Callback<O, A>>) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|known| !same_handler(known, handler));
        handlers.len() != before
    }

    pub fn contains(&self, handler: &Arc<dyn Callback<O, A>>) -> bool {
        self.handlers()
            .iter()
            .any(|known| same_handler(known, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers().is_empty()
    }

    pub fn clear(&self) {
        self.handlers().clear();
    }

    pub async fn dispatch(&self, owner: &O, arg: &A) -> DispatchReport {
        let snapshot: Vec<Arc<dyn Callback<O, A>>> = self.handlers().clone();
        let mut report = DispatchReport {
            invoked: snapshot.len(),
            failures: Vec::new(),
        };

        for (position, handler) in snapshot.iter().enumerate() {
            let outcome = AssertUnwindSafe(handler.call(owner, arg))
                .catch_unwind()
                .await;

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };

            warn!(
                event = events::CALLBACK_FAILED,
                component = COMPONENT,
                owner = %self.owner_label,
                position,
                err = %message,
                "callback failed"
            );
            report.failures.push(CallbackFailure { position, message });
        }

        report
    }
}

impl<O, A> Debug for CallbackCollection<O, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let handlers = self
            .handlers
            .lock()
            .map(|handlers| handlers.len())
            .unwrap_or_default();
        f.debug_struct("CallbackCollection")
            .field("owner", &self.owner_label)
            .field("handlers", &handlers)
            .finish()
    }
}
