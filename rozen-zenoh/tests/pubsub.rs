mod common;

use common::Int64Msg;
use rozen_zenoh::{
    DurabilityPolicy, EventKind, HistoryPolicy, MessageInfo, Profile, ReliabilityPolicy,
    Subscription, WaitSet,
};
use std::time::Duration;

fn take_n(
    subscription: &Subscription<Int64Msg>,
    n: usize,
    timeout: Duration,
) -> Vec<(Int64Msg, MessageInfo)> {
    let mut taken = Vec::new();
    common::wait_until(timeout, || {
        while let Some(message) = subscription.take().unwrap() {
            taken.push(message);
        }
        taken.len() >= n
    });
    taken
}

#[test]
fn sequence_numbers_are_per_publisher_and_restart_with_new_gid() {
    let context = common::context(11);
    let node = context.create_node("seq_node", None).unwrap();
    let qos = Profile {
        history: HistoryPolicy::KeepLast,
        depth: 10,
        reliability: ReliabilityPolicy::Reliable,
        ..Default::default()
    };

    let publisher = node
        .create_publisher::<Int64Msg>("/chatter", Some(qos.clone()))
        .unwrap();
    let subscription = node
        .create_subscription::<Int64Msg>("/chatter", Some(qos.clone()))
        .unwrap();

    for value in 1..=5 {
        publisher.publish(&Int64Msg::new(value)).unwrap();
    }

    let taken = take_n(&subscription, 5, Duration::from_secs(10));
    assert_eq!(taken.len(), 5);
    for (i, (message, info)) in taken.iter().enumerate() {
        assert_eq!(message.data, i as i64 + 1);
        assert_eq!(info.publication_sequence_number, i as i64 + 1);
        assert_eq!(info.publisher_gid, publisher.gid());
        assert!(!info.from_intra_process);
        assert!(info.source_timestamp > 0);
        assert!(info.received_timestamp >= info.source_timestamp);
    }

    // A recreated publisher has a fresh GID, so its sequence numbers
    // restart at 1 without tripping loss detection.
    let old_gid = publisher.gid();
    drop(publisher);
    let publisher = node
        .create_publisher::<Int64Msg>("/chatter", Some(qos))
        .unwrap();
    assert_ne!(publisher.gid(), old_gid);

    publisher.publish(&Int64Msg::new(6)).unwrap();
    let taken = take_n(&subscription, 1, Duration::from_secs(10));
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].1.publication_sequence_number, 1);
    assert_eq!(
        subscription
            .events()
            .take_status(EventKind::MessageLost)
            .total_count,
        0
    );
}

#[test]
fn keep_last_evicts_oldest() {
    let context = common::context(12);
    let node = context.create_node("evict_node", None).unwrap();
    let qos = Profile {
        history: HistoryPolicy::KeepLast,
        depth: 3,
        reliability: ReliabilityPolicy::BestEffort,
        ..Default::default()
    };

    let publisher = node
        .create_publisher::<Int64Msg>("/bursty", Some(qos.clone()))
        .unwrap();
    let subscription = node
        .create_subscription::<Int64Msg>("/bursty", Some(qos))
        .unwrap();

    for value in 1..=5 {
        publisher.publish(&Int64Msg::new(value)).unwrap();
    }
    // The subscriber never takes while the burst is delivered.
    std::thread::sleep(Duration::from_secs(1));

    let taken = take_n(&subscription, 3, Duration::from_secs(5));
    let values: Vec<i64> = taken.iter().map(|(m, _)| m.data).collect();
    assert_eq!(values, vec![3, 4, 5]);
    assert!(subscription.take().unwrap().is_none());
}

#[test]
fn transient_local_replays_history_to_late_joiner() {
    let context = common::context(13);
    let node = context.create_node("replay_node", None).unwrap();
    let qos = Profile {
        history: HistoryPolicy::KeepLast,
        depth: 5,
        reliability: ReliabilityPolicy::Reliable,
        durability: DurabilityPolicy::TransientLocal,
        ..Default::default()
    };

    let publisher = node
        .create_publisher::<Int64Msg>("/replay", Some(qos.clone()))
        .unwrap();
    let graph = context.graph_cache();
    assert!(common::wait_until(Duration::from_secs(10), || graph
        .count_publishers("/replay")
        == 1));

    for value in 1..=3 {
        publisher.publish(&Int64Msg::new(value)).unwrap();
    }

    // The subscription is created only after the history exists; it must
    // receive the cached samples via the historical query.
    let subscription = node
        .create_subscription::<Int64Msg>("/replay", Some(qos))
        .unwrap();
    let taken = take_n(&subscription, 3, Duration::from_secs(10));
    let values: Vec<i64> = taken.iter().map(|(m, _)| m.data).collect();
    assert_eq!(values, vec![1, 2, 3]);
    let sequences: Vec<i64> = taken
        .iter()
        .map(|(_, i)| i.publication_sequence_number)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[test]
fn wait_set_wakes_on_new_sample() {
    let context = common::context(14);
    let node = context.create_node("waker_node", None).unwrap();
    let publisher = node
        .create_publisher::<Int64Msg>("/wake", None)
        .unwrap();
    let subscription = node
        .create_subscription::<Int64Msg>("/wake", None)
        .unwrap();

    let wait_set = WaitSet::new();
    assert!(!subscription.has_data_or_attach(&wait_set));

    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        publisher.publish(&Int64Msg::new(42)).unwrap();
        publisher
    });

    assert!(wait_set.wait(Some(Duration::from_secs(10))));
    assert!(!subscription.detach_and_check_empty());
    let (message, _) = subscription.take().unwrap().unwrap();
    assert_eq!(message.data, 42);

    let _publisher = handle.join().unwrap();
}

#[test]
fn publish_after_shutdown_is_rejected() {
    let context = common::context(15);
    let node = context.create_node("shutdown_node", None).unwrap();
    let publisher = node
        .create_publisher::<Int64Msg>("/late", None)
        .unwrap();

    publisher.shutdown().unwrap();
    publisher.shutdown().unwrap();
    assert!(publisher.is_shutdown());
    assert!(matches!(
        publisher.publish(&Int64Msg::new(1)),
        Err(rozen_zenoh::Error::Shutdown)
    ));
}

#[test]
fn serialized_roundtrip_matches_typed_take() {
    let context = common::context(16);
    let node = context.create_node("raw_node", None).unwrap();
    let publisher = node
        .create_publisher::<Int64Msg>("/raw", None)
        .unwrap();
    let subscription = node
        .create_subscription::<Int64Msg>("/raw", None)
        .unwrap();

    publisher
        .publish_serialized(&7i64.to_le_bytes())
        .unwrap();

    let mut raw = None;
    assert!(common::wait_until(Duration::from_secs(10), || {
        raw = subscription.take_serialized().unwrap();
        raw.is_some()
    }));
    let (bytes, info) = raw.unwrap();
    assert_eq!(bytes, 7i64.to_le_bytes());
    assert_eq!(info.publication_sequence_number, 1);
}
