//! LISTEN/NOTIFY delivery.

mod common;

use std::time::Duration;

use pgconduit::{NotificationManager, NotifyEvent};

#[test]
fn notify_delivery_with_idle_tick() {
    let Some(mut listener) = common::connect() else {
        return;
    };
    let Some(mut notifier) = common::connect() else { return };

    listener.listen("pgc_chan").unwrap();
    let notifier_pid = notifier.backend_pid().unwrap();
    notifier.simple_query("NOTIFY pgc_chan, 'hello'").unwrap();

    let mut manager = NotificationManager::new(Some(Duration::from_millis(500)));
    manager.add("listener", &mut listener);

    match manager.next() {
        Some(NotifyEvent::Notify { key, notifications }) => {
            assert_eq!(key, "listener");
            assert_eq!(notifications.len(), 1);
            assert_eq!(notifications[0].channel, "pgc_chan");
            assert_eq!(notifications[0].payload, "hello");
            assert_eq!(notifications[0].pid, notifier_pid);
        }
        other => panic!("expected a notification, got {other:?}"),
    }

    // Nothing else pending: the next item is an idle tick.
    assert_eq!(manager.next(), Some(NotifyEvent::Idle));
}

#[test]
fn zero_timeout_is_a_snapshot() {
    let Some(mut listener) = common::connect() else {
        return;
    };
    let Some(mut notifier) = common::connect() else { return };

    listener.listen("pgc_snap").unwrap();
    notifier.simple_query("NOTIFY pgc_snap, 'one'").unwrap();
    notifier.simple_query("NOTIFY pgc_snap, 'two'").unwrap();

    // Give the messages a moment to arrive, then drain.
    std::thread::sleep(Duration::from_millis(200));

    let mut manager = NotificationManager::new(Some(Duration::ZERO));
    manager.add("l", &mut listener);

    let mut payloads = Vec::new();
    for event in manager.by_ref() {
        if let NotifyEvent::Notify { notifications, .. } = event {
            payloads.extend(notifications.into_iter().map(|n| n.payload));
        }
    }
    assert_eq!(payloads, vec!["one", "two"]);
}

#[test]
fn notification_inside_committed_transaction() {
    let Some(mut listener) = common::connect() else {
        return;
    };
    let Some(mut notifier) = common::connect() else { return };

    listener.listen("pgc_txn").unwrap();

    // A rolled-back NOTIFY must never be delivered.
    let mut txn = notifier.transaction().unwrap();
    txn.conn().simple_query("NOTIFY pgc_txn, 'discarded'").ok();
    txn.rollback().unwrap();

    notifier
        .tx(|conn| {
            conn.simple_query("NOTIFY pgc_txn, 'committed'")?;
            Ok(())
        })
        .unwrap();

    let notifications = listener.poll_notifies(Duration::from_millis(500)).unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].payload, "committed");
}

#[test]
fn listening_channels_catalog() {
    let Some(mut conn) = common::connect() else { return };
    conn.listen("pgc_cat").unwrap();
    let channels = pgconduit::catalog::listening_channels(&mut conn).unwrap();
    assert!(channels.contains(&"pgc_cat".to_string()));
    conn.unlisten("pgc_cat").unwrap();
    let channels = pgconduit::catalog::listening_channels(&mut conn).unwrap();
    assert!(!channels.contains(&"pgc_cat".to_string()));
}

#[test]
fn notify_helper_round_trip() {
    let Some(mut listener) = common::connect() else {
        return;
    };
    let Some(mut notifier) = common::connect() else { return };

    listener.listen("pgc_multi").unwrap();
    pgconduit::catalog::notify(
        &mut notifier,
        &[("pgc_multi", "a"), ("pgc_multi", "b")],
    )
    .unwrap();

    let notifications = listener.poll_notifies(Duration::from_millis(500)).unwrap();
    let payloads: Vec<_> = notifications.iter().map(|n| n.payload.as_str()).collect();
    assert_eq!(payloads, vec!["a", "b"]);
}
