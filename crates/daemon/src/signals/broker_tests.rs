// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use vea_core::SignalValue;

use super::*;

fn empty_subs() -> Subscriptions {
    HashMap::new()
}

#[tokio::test]
async fn update_frames_fan_out_to_subscribers() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    let (tx_a, mut rx_a) = mpsc::channel(4);
    let (tx_b, mut rx_b) = mpsc::channel(4);
    subs.insert("Vehicle.Speed".to_string(), (Some(10.0), vec![tx_a, tx_b]));

    handle_frame(r#"{"action":"update","path":"Vehicle.Speed","value":42.5}"#, &mut pending, &mut subs);

    let update = rx_a.recv().await.unwrap();
    assert_eq!(update.path, "Vehicle.Speed");
    assert_eq!(update.value, SignalValue::Float(42.5));
    assert_eq!(rx_b.recv().await.unwrap().value, SignalValue::Float(42.5));
}

#[tokio::test]
async fn closed_subscribers_are_pruned() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    let (tx_dead, rx_dead) = mpsc::channel::<SignalUpdate>(1);
    drop(rx_dead);
    let (tx_live, mut rx_live) = mpsc::channel(4);
    subs.insert("Vehicle.Speed".to_string(), (None, vec![tx_dead, tx_live]));

    handle_frame(r#"{"action":"update","path":"Vehicle.Speed","value":1.0}"#, &mut pending, &mut subs);

    assert_eq!(subs["Vehicle.Speed"].1.len(), 1);
    assert!(rx_live.recv().await.is_some());
}

#[tokio::test]
async fn values_reply_resolves_pending_get() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    let (reply_tx, reply_rx) = oneshot::channel();
    pending.insert("req-1".to_string(), Pending::Get(reply_tx));

    handle_frame(
        r#"{"id":"req-1","action":"values","values":{"Vehicle.Speed":55.0,"Vehicle.Powertrain.Transmission.CurrentGear":3}}"#,
        &mut pending,
        &mut subs,
    );

    let mut values = reply_rx.await.unwrap().unwrap();
    values.sort_by(|a, b| a.path.cmp(&b.path));
    assert_eq!(values.len(), 2);
    assert_eq!(values[1].value, SignalValue::Float(55.0));
    assert!(pending.is_empty());
}

#[tokio::test]
async fn ack_resolves_pending_set() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    let (reply_tx, reply_rx) = oneshot::channel();
    pending.insert("req-9".to_string(), Pending::Set(reply_tx));

    handle_frame(r#"{"id":"req-9","action":"ack"}"#, &mut pending, &mut subs);
    assert!(reply_rx.await.unwrap().is_ok());
}

#[tokio::test]
async fn broker_error_kinds_map_onto_signal_errors() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    let (reply_tx, reply_rx) = oneshot::channel();
    pending.insert("req-2".to_string(), Pending::Set(reply_tx));

    handle_frame(
        r#"{"id":"req-2","action":"error","error":"access_denied","path":"Vehicle.Speed"}"#,
        &mut pending,
        &mut subs,
    );
    assert!(matches!(reply_rx.await.unwrap(), Err(SignalError::AccessDenied { path }) if path == "Vehicle.Speed"));
}

#[tokio::test]
async fn unknown_reply_id_is_ignored() {
    let mut pending = HashMap::new();
    let mut subs = empty_subs();
    handle_frame(r#"{"id":"ghost","action":"ack"}"#, &mut pending, &mut subs);
    handle_frame("not even json", &mut pending, &mut subs);
}
