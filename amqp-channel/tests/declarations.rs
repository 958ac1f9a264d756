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

use amqp_channel::entities::{
    ExchangeDeleteOptions, ExchangeOptions, ExchangeType, QueueDeleteOptions, QueueOptions,
    TransactionState,
};
use amqp_channel::{
    reply_code, Channel, ChannelConfig, ChannelError, ChannelState, ErrorKind, InvalidStateReason,
};
use integration_test_utils::{init_logging, InMemoryBroker, RecordingCloseCallback};
use std::sync::Arc;
use std::time::Duration;

async fn open_channel(broker: &Arc<InMemoryBroker>, config: ChannelConfig) -> Channel {
    let channel = Channel::new(broker.clone(), config).expect("valid config");
    channel.initialize(None).await.expect("initialize");
    channel
}

#[tokio::test]
async fn declared_entities_carry_the_requested_names_until_close() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;

    let queue = channel
        .declare_queue(
            "q1",
            QueueOptions {
                durable: true,
                ..Default::default()
            },
            None,
        )
        .await
        .expect("declare q1");
    let exchange = channel
        .declare_exchange("e1", ExchangeType::Direct, ExchangeOptions::default(), None)
        .await
        .expect("declare e1");

    assert_eq!(queue.name(), "q1");
    assert!(queue.options().durable);
    assert_eq!(exchange.name(), "e1");
    assert_eq!(exchange.kind(), ExchangeType::Direct);
    assert!(broker.has_queue("q1"));
    assert!(broker.has_exchange("e1"));

    channel.close(None).await;

    assert_eq!(
        channel.channel().err(),
        Some(ChannelError::InvalidState(InvalidStateReason::Closed))
    );
    let err = channel
        .declare_queue("q3", QueueOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
}

#[tokio::test]
async fn passive_declare_of_a_missing_queue_is_rejected_and_closes_the_channel() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;
    let recorder = Arc::new(RecordingCloseCallback::default());
    channel.close_callbacks().add(recorder.clone());

    let err = channel.get_queue("q2", true).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BrokerRejection);
    assert_eq!(err.reply_code(), Some(reply_code::NOT_FOUND));
    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.records()[0].reason, Some(err.clone()));
    assert_eq!(channel.state(), ChannelState::ClosedByPeer);
    assert!(!broker.has_queue("q2"));

    channel.reopen().await.expect("reopen");
    let again = channel
        .declare_queue("q2", QueueOptions::passive(), None)
        .await
        .unwrap_err();
    assert_eq!(again, err);
}

#[tokio::test]
async fn get_exchange_with_ensure_matches_a_passive_declare() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;

    let ensured = channel
        .get_exchange("amq.topic", true)
        .await
        .expect("ensure amq.topic");
    let declared = channel
        .declare_exchange("amq.topic", ExchangeType::Direct, ExchangeOptions::passive(), None)
        .await
        .expect("passive declare amq.topic");
    assert_eq!(ensured, declared);

    let missing_ensured = channel.get_exchange("missing", true).await.unwrap_err();
    channel.reopen().await.expect("reopen");
    let missing_declared = channel
        .declare_exchange("missing", ExchangeType::Direct, ExchangeOptions::passive(), None)
        .await
        .unwrap_err();
    assert_eq!(missing_ensured, missing_declared);
    assert_eq!(missing_ensured.reply_code(), Some(reply_code::NOT_FOUND));
}

#[tokio::test]
async fn local_references_never_contact_the_broker() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;
    let before = broker.methods();

    let exchange = channel.get_exchange("unknown", false).await.expect("local exchange");
    let queue = channel.get_queue("unknown", false).await.expect("local queue");

    assert_eq!(exchange.name(), "unknown");
    assert!(exchange.options().passive);
    assert_eq!(queue.name(), "unknown");
    assert!(queue.declaration().is_none());
    assert_eq!(broker.methods(), before);
    assert_eq!(channel.state(), ChannelState::Ready);
}

#[tokio::test]
async fn empty_queue_name_gets_a_broker_assigned_name() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;

    let queue = channel
        .declare_queue(
            "",
            QueueOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            None,
        )
        .await
        .expect("declare server-named queue");

    assert!(queue.name().starts_with("amq.gen-"));
    let declaration = queue.declaration().expect("declaration");
    assert_eq!(declaration.queue, queue.name());
    assert_eq!(declaration.message_count, 0);
    assert!(broker.has_queue(queue.name()));
}

#[tokio::test]
async fn redeclaring_an_exchange_with_another_type_is_rejected() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;
    channel
        .declare_exchange("e1", ExchangeType::Fanout, ExchangeOptions::default(), None)
        .await
        .expect("declare e1");

    let err = channel
        .declare_exchange("e1", ExchangeType::Topic, ExchangeOptions::default(), None)
        .await
        .unwrap_err();

    assert_eq!(err.reply_code(), Some(reply_code::PRECONDITION_FAILED));
    assert_eq!(channel.state(), ChannelState::ClosedByPeer);
}

#[tokio::test]
async fn queue_delete_honors_the_emptiness_precondition() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    broker.add_queue("busy", 3);
    let channel = open_channel(&broker, ChannelConfig::default()).await;

    let err = channel
        .queue_delete(
            "busy",
            QueueDeleteOptions {
                if_empty: true,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokerRejection);
    assert_eq!(err.reply_code(), Some(reply_code::PRECONDITION_FAILED));
    assert_eq!(channel.state(), ChannelState::ClosedByPeer);
    assert!(broker.has_queue("busy"));

    channel.reopen().await.expect("reopen");
    let deleted = channel
        .queue_delete("busy", QueueDeleteOptions::default(), None)
        .await
        .expect("delete busy");
    assert_eq!(deleted.message_count, 3);
    assert!(!broker.has_queue("busy"));
}

#[tokio::test]
async fn entities_delete_themselves_through_their_channel() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;
    let exchange = channel
        .declare_exchange("e1", ExchangeType::Headers, ExchangeOptions::default(), None)
        .await
        .expect("declare e1");
    let queue = channel
        .declare_queue("q1", QueueOptions::default(), None)
        .await
        .expect("declare q1");

    exchange
        .delete(ExchangeDeleteOptions::default(), None)
        .await
        .expect("delete e1");
    queue
        .delete(QueueDeleteOptions::default(), None)
        .await
        .expect("delete q1");

    assert!(!broker.has_exchange("e1"));
    assert!(!broker.has_queue("q1"));
}

#[tokio::test]
async fn qos_and_flow_are_forwarded_without_local_state() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;

    channel.set_qos(10, 0, false, None).await.expect("set qos");
    let flow = channel.flow(false, None).await.expect("pause flow");

    assert!(!flow.active);
    let methods = broker.methods();
    assert!(methods.contains(&"basic.qos prefetch_count=10 prefetch_size=0 global=false".to_string()));
    assert!(methods.contains(&"channel.flow active=false".to_string()));
    assert_eq!(channel.state(), ChannelState::Ready);
}

#[tokio::test(start_paused = true)]
async fn declaration_timeout_leaves_the_channel_usable() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let channel = open_channel(&broker, ChannelConfig::default()).await;
    broker.set_latency(Duration::from_millis(500));

    let limit = Duration::from_millis(20);
    let err = channel
        .declare_queue("slow", QueueOptions::default(), Some(limit))
        .await
        .unwrap_err();
    assert_eq!(err, ChannelError::Timeout(limit));
    assert_eq!(channel.state(), ChannelState::Ready);
    assert!(channel.is_initialized());

    broker.set_latency(Duration::ZERO);
    channel
        .set_qos(1, 0, false, Some(limit))
        .await
        .expect("set qos after timeout");
}

#[tokio::test]
async fn transactions_exist_only_without_publisher_confirms() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());

    let confirming = open_channel(&broker, ChannelConfig::default()).await;
    let err = confirming.transaction().err().expect("confirms exclude transactions");
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let plain = open_channel(&broker, ChannelConfig::default().with_publisher_confirms(false)).await;
    let mut transaction = plain.transaction().expect("transaction");
    assert_eq!(transaction.state(), TransactionState::Created);

    transaction.select(None).await.expect("select");
    assert_eq!(transaction.state(), TransactionState::Started);
    transaction.commit(None).await.expect("commit");
    assert_eq!(transaction.state(), TransactionState::Committed);
    transaction.rollback(None).await.expect("rollback");
    assert_eq!(transaction.state(), TransactionState::RolledBack);
}

#[tokio::test]
async fn transaction_does_not_keep_its_channel_alive() {
    init_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let plain = open_channel(&broker, ChannelConfig::default().with_publisher_confirms(false)).await;
    let mut transaction = plain.transaction().expect("transaction");
    transaction.select(None).await.expect("select");
    assert_eq!(transaction.channel().expect("channel alive").id(), plain.id());

    drop(plain);

    let err = transaction.commit(None).await.unwrap_err();
    assert_eq!(err, ChannelError::InvalidState(InvalidStateReason::Closed));
    assert_eq!(transaction.state(), TransactionState::Started);
    assert!(transaction.channel().is_err());
    assert!(!broker.methods().contains(&"tx.commit".to_string()));
}
