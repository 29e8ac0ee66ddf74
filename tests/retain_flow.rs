// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Retained-message routing scenarios over the public API.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use luoshen::acl::AclPipeline;
use luoshen::codec::{PacketId, Property, QoS};
use luoshen::commands::{ListenerToDispatcherCmd, SubscribeRequest};
use luoshen::config::Config;
use luoshen::context::RoutingContext;
use luoshen::dispatcher::Dispatcher;
use luoshen::error::Error;
use luoshen::session::Session;
use luoshen::store::{
    DeliveryQueue, MessageStore, PersistenceNotifier, RetainedMessage, TimeSource,
};
use luoshen::types::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefEvent {
    Inc,
    Dec,
}

/// Message-store mock recording every ref count change in call order.
#[derive(Debug, Default, Clone)]
struct RecordingStore {
    events: Arc<Mutex<Vec<(RefEvent, String)>>>,
}

impl RecordingStore {
    fn events(&self) -> Vec<(RefEvent, String)> {
        self.events.lock().unwrap().clone()
    }

    fn balance(&self) -> i64 {
        self.events()
            .iter()
            .map(|(event, _)| match event {
                RefEvent::Inc => 1,
                RefEvent::Dec => -1,
            })
            .sum()
    }
}

impl MessageStore for RecordingStore {
    fn ref_inc(&self, message: &Arc<RetainedMessage>) {
        self.events.lock().unwrap().push((
            RefEvent::Inc,
            String::from_utf8_lossy(message.payload()).to_string(),
        ));
    }

    fn ref_dec(&self, message: &Arc<RetainedMessage>) {
        self.events.lock().unwrap().push((
            RefEvent::Dec,
            String::from_utf8_lossy(message.payload()).to_string(),
        ));
    }
}

#[derive(Debug, Clone)]
struct Delivered {
    topic: String,
    payload: Vec<u8>,
    mid: PacketId,
    qos: QoS,
    retain: bool,
    subscription_identifier: Option<u32>,
}

/// Outbound-queue mock recording enqueued messages.
#[derive(Debug, Default, Clone)]
struct RecordingDelivery {
    deliveries: Arc<Mutex<Vec<Delivered>>>,
}

impl RecordingDelivery {
    fn deliveries(&self) -> Vec<Delivered> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl DeliveryQueue for RecordingDelivery {
    fn enqueue(
        &self,
        _subscriber: &Session,
        mid: PacketId,
        qos: QoS,
        retain: bool,
        message: &Arc<RetainedMessage>,
        properties: Vec<Property>,
    ) -> Result<(), Error> {
        let subscription_identifier = properties.iter().map(|property| {
            let Property::SubscriptionIdentifier(id) = property;
            *id
        }).next();
        self.deliveries.lock().unwrap().push(Delivered {
            topic: message.topic().to_string(),
            payload: message.payload().to_vec(),
            mid,
            qos,
            retain,
            subscription_identifier,
        });
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct CountingPersistence {
    changes: Arc<AtomicU64>,
}

impl PersistenceNotifier for CountingPersistence {
    fn note_change(&self) {
        self.changes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct FixedClock {
    now: Arc<AtomicU64>,
}

impl FixedClock {
    fn new(now: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now)),
        }
    }

    fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

struct Harness {
    context: RoutingContext,
    store: RecordingStore,
    delivery: RecordingDelivery,
    persistence: CountingPersistence,
    clock: FixedClock,
}

fn harness_with_config(config: &Config) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = RecordingStore::default();
    let delivery = RecordingDelivery::default();
    let persistence = CountingPersistence::default();
    let clock = FixedClock::new(1_000);

    let mut acl = AclPipeline::from_config(config).unwrap();
    acl.security_init(false).unwrap();
    let context = RoutingContext::new(
        config,
        acl,
        Box::new(store.clone()),
        Box::new(delivery.clone()),
        Box::new(persistence.clone()),
        Box::new(clock.clone()),
    );
    Harness {
        context,
        store,
        delivery,
        persistence,
        clock,
    }
}

fn harness() -> Harness {
    harness_with_config(&Config::from_toml("").unwrap())
}

fn retained(topic: &str, payload: &str, qos: QoS) -> Arc<RetainedMessage> {
    let mut message = RetainedMessage::new(topic, payload.as_bytes().to_vec(), qos);
    message.set_retain(true);
    Arc::new(message)
}

fn subscriber(id: &str) -> Session {
    Session::new(id, Protocol::V311)
}

#[test]
fn test_retain_replace() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "20", QoS::AtMostOnce))
        .unwrap();
    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "21", QoS::AtMostOnce))
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "sensors/+", QoS::AtMostOnce, 0)
        .unwrap();

    let deliveries = harness.delivery.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, b"21");
    assert!(deliveries[0].retain);
    assert_eq!(deliveries[0].mid, 0);
    assert_eq!(deliveries[0].subscription_identifier, None);

    assert_eq!(
        harness.store.events(),
        vec![
            (RefEvent::Inc, "20".to_string()),
            (RefEvent::Inc, "21".to_string()),
            (RefEvent::Dec, "20".to_string()),
        ]
    );
    assert_eq!(harness.context.retained_count(), 1);
    assert_eq!(harness.persistence.changes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_retain_clear() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "21", QoS::AtMostOnce))
        .unwrap();
    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "", QoS::AtMostOnce))
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "sensors/#", QoS::AtMostOnce, 0)
        .unwrap();

    assert!(harness.delivery.deliveries().is_empty());
    assert_eq!(
        harness.store.events().last(),
        Some(&(RefEvent::Dec, "21".to_string()))
    );
    assert_eq!(harness.context.retained_count(), 0);
}

#[test]
fn test_hash_wildcard_matches_parent() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store("a", &retained("a", "ma", QoS::AtMostOnce))
        .unwrap();
    harness
        .context
        .retain_store("a/b", &retained("a/b", "mb", QoS::AtMostOnce))
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "a/#", QoS::AtMostOnce, 0)
        .unwrap();

    let mut topics: Vec<String> = harness
        .delivery
        .deliveries()
        .iter()
        .map(|delivered| delivered.topic.clone())
        .collect();
    topics.sort();
    assert_eq!(topics, vec!["a", "a/b"]);
}

#[test]
fn test_wildcards_do_not_cross_into_dollar_tree() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store(
            "$SYS/broker/connection/b1/state",
            &retained("$SYS/broker/connection/b1/state", "1", QoS::AtMostOnce),
        )
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "#", QoS::AtMostOnce, 0)
        .unwrap();
    assert!(harness.delivery.deliveries().is_empty());

    harness
        .context
        .deliver_retained(&mut session, "$SYS/#", QoS::AtMostOnce, 0)
        .unwrap();
    assert_eq!(harness.delivery.deliveries().len(), 1);

    // $SYS stores do not count as persistence changes.
    assert_eq!(harness.persistence.changes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_effective_qos_and_mid_allocation() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store("q/two", &retained("q/two", "x", QoS::ExactOnce))
        .unwrap();
    harness
        .context
        .deliver_retained(&mut session, "q/two", QoS::AtLeastOnce, 0)
        .unwrap();
    harness
        .context
        .deliver_retained(&mut session, "q/+", QoS::AtMostOnce, 0)
        .unwrap();

    let deliveries = harness.delivery.deliveries();
    assert_eq!(deliveries[0].qos, QoS::AtLeastOnce);
    assert_eq!(deliveries[0].mid, 1);
    assert_eq!(deliveries[1].qos, QoS::AtMostOnce);
    assert_eq!(deliveries[1].mid, 0);
}

#[test]
fn test_upgrade_outgoing_qos() {
    let config = Config::from_toml("[security]\nupgrade_outgoing_qos = true\n").unwrap();
    let mut harness = harness_with_config(&config);
    let mut session = subscriber("sub-1");

    harness
        .context
        .retain_store("q/zero", &retained("q/zero", "x", QoS::AtMostOnce))
        .unwrap();
    harness
        .context
        .deliver_retained(&mut session, "q/zero", QoS::ExactOnce, 0)
        .unwrap();

    let deliveries = harness.delivery.deliveries();
    assert_eq!(deliveries[0].qos, QoS::ExactOnce);
    assert_eq!(deliveries[0].mid, 1);
}

#[test]
fn test_subscription_identifier_attached() {
    let mut harness = harness();
    let mut session = Session::new("sub-v5", Protocol::V5);

    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "20", QoS::AtMostOnce))
        .unwrap();
    harness
        .context
        .deliver_retained(&mut session, "sensors/+", QoS::AtMostOnce, 7)
        .unwrap();

    let deliveries = harness.delivery.deliveries();
    assert_eq!(deliveries[0].subscription_identifier, Some(7));
}

#[test]
fn test_expiry_is_lazy_and_counted_once() {
    let mut harness = harness();
    let mut session = subscriber("sub-1");

    let mut message = RetainedMessage::new("ttl/x", b"soon".to_vec(), QoS::AtMostOnce);
    message.set_retain(true);
    message.set_message_expiry_time(2_000);
    harness
        .context
        .retain_store("ttl/x", &Arc::new(message))
        .unwrap();

    // Not expired yet.
    harness
        .context
        .deliver_retained(&mut session, "ttl/x", QoS::AtMostOnce, 0)
        .unwrap();
    assert_eq!(harness.delivery.deliveries().len(), 1);
    assert_eq!(harness.context.retained_count(), 1);

    // Past expiry: dropped on first visit, nothing left for the second.
    harness.clock.set(3_000);
    harness
        .context
        .deliver_retained(&mut session, "ttl/x", QoS::AtMostOnce, 0)
        .unwrap();
    harness
        .context
        .deliver_retained(&mut session, "ttl/x", QoS::AtMostOnce, 0)
        .unwrap();

    assert_eq!(harness.delivery.deliveries().len(), 1);
    assert_eq!(harness.context.retained_count(), 0);
    assert_eq!(harness.store.balance(), 0);
    let decs = harness
        .store
        .events()
        .iter()
        .filter(|(event, _)| *event == RefEvent::Dec)
        .count();
    assert_eq!(decs, 1);
}

#[test]
fn test_reference_balance_after_clear() {
    let mut harness = harness();

    for (topic, payload) in [("a", "1"), ("a/b", "2"), ("c", "3"), ("$SYS/x", "4")] {
        harness
            .context
            .retain_store(topic, &retained(topic, payload, QoS::AtMostOnce))
            .unwrap();
    }
    harness
        .context
        .retain_store("a", &retained("a", "5", QoS::AtMostOnce))
        .unwrap();

    harness.context.clear();
    assert_eq!(harness.store.balance(), 0);
    assert_eq!(harness.context.retained_count(), 0);
}

#[test]
fn test_check_retain_source() {
    let acl_path = std::env::temp_dir().join("luoshen-it-acl");
    let mut fd = std::fs::File::create(&acl_path).unwrap();
    fd.write_all(
        b"topic read sensors/#\n\nuser alice\ntopic write sensors/#\n",
    )
    .unwrap();
    drop(fd);

    let config = Config::from_toml(&format!(
        "[security]\ncheck_retain_source = true\nacl_file = \"{}\"\n",
        acl_path.display()
    ))
    .unwrap();
    let mut harness = harness_with_config(&config);
    let mut session = subscriber("sub-1");

    // Published by alice, who may still write: delivered.
    let mut publisher = Session::new("pub-alice", Protocol::V311);
    publisher.set_username(Some("alice"));
    let mut message = RetainedMessage::new("sensors/temp", b"20".to_vec(), QoS::AtMostOnce);
    message.set_retain(true);
    message.set_source(&publisher);
    harness
        .context
        .retain_store("sensors/temp", &Arc::new(message))
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "sensors/temp", QoS::AtMostOnce, 0)
        .unwrap();
    assert_eq!(harness.delivery.deliveries().len(), 1);

    // Published by bob, who lost write access: silently skipped.
    let mut bob = Session::new("pub-bob", Protocol::V311);
    bob.set_username(Some("bob"));
    let mut message = RetainedMessage::new("sensors/hum", b"60".to_vec(), QoS::AtMostOnce);
    message.set_retain(true);
    message.set_source(&bob);
    harness
        .context
        .retain_store("sensors/hum", &Arc::new(message))
        .unwrap();

    harness
        .context
        .deliver_retained(&mut session, "sensors/hum", QoS::AtMostOnce, 0)
        .unwrap();
    assert_eq!(harness.delivery.deliveries().len(), 1);
}

#[test]
fn test_denied_subscriber_is_skipped_silently() {
    let acl_path = std::env::temp_dir().join("luoshen-it-acl-read");
    let mut fd = std::fs::File::create(&acl_path).unwrap();
    fd.write_all(b"user alice\ntopic read sensors/#\n").unwrap();
    drop(fd);

    let config = Config::from_toml(&format!(
        "[security]\nacl_file = \"{}\"\n",
        acl_path.display()
    ))
    .unwrap();
    let mut harness = harness_with_config(&config);

    harness
        .context
        .retain_store("sensors/temp", &retained("sensors/temp", "20", QoS::AtMostOnce))
        .unwrap();

    let mut mallory = subscriber("mallory");
    harness
        .context
        .deliver_retained(&mut mallory, "sensors/#", QoS::AtMostOnce, 0)
        .unwrap();
    assert!(harness.delivery.deliveries().is_empty());

    let mut alice = subscriber("alice-session");
    alice.set_username(Some("alice"));
    harness
        .context
        .deliver_retained(&mut alice, "sensors/#", QoS::AtMostOnce, 0)
        .unwrap();
    assert_eq!(harness.delivery.deliveries().len(), 1);
}

#[tokio::test]
async fn test_dispatcher_publish_subscribe_flow() {
    let harness = harness();
    let store = harness.store.clone();
    let delivery = harness.delivery.clone();

    let (sender, receiver) = tokio::sync::mpsc::channel(16);
    let mut dispatcher = Dispatcher::new(harness.context, receiver);
    let handle = tokio::spawn(async move {
        dispatcher.run_loop().await;
    });

    let publisher = Session::new("pub-1", Protocol::V311);
    sender
        .send(ListenerToDispatcherCmd::Publish(
            publisher,
            retained("sensors/temp", "20", QoS::AtLeastOnce),
        ))
        .await
        .unwrap();

    let subscriber = Session::new("sub-1", Protocol::V5);
    sender
        .send(ListenerToDispatcherCmd::Subscribe(
            subscriber,
            vec![
                SubscribeRequest {
                    filter: "sensors/+".to_string(),
                    qos: QoS::AtLeastOnce,
                    subscription_identifier: 3,
                },
                SubscribeRequest {
                    filter: "$SYS/#".to_string(),
                    qos: QoS::AtMostOnce,
                    subscription_identifier: 0,
                },
            ],
        ))
        .await
        .unwrap();

    drop(sender);
    handle.await.unwrap();

    let deliveries = delivery.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].topic, "sensors/temp");
    assert_eq!(deliveries[0].qos, QoS::AtLeastOnce);
    assert_eq!(deliveries[0].mid, 1);
    assert_eq!(deliveries[0].subscription_identifier, Some(3));
    assert_eq!(store.balance(), 1);
}
