//! # Connection Failures and Bad Traffic
//!
//! A transport error rejects every pending call with a connection failure
//! and clears the handler registry. Frames that are not ours are ignored;
//! malformed requests are answered with a rejection and a malformed result
//! fails the call it answers.

#[cfg(test)]
mod tests {
    use crate::fixtures::{connect, echo, hang, noop, Wire, WIRES};
    use duplex_rpc::{
        codes, decode_envelope, ChannelEvent, ChannelReceiver, ChannelSender, Endpoint, Envelope,
        MemoryChannel, Message, RpcConfig, RpcError, Value, PROTOCOL_MARKER,
    };
    use futures::future::join_all;
    use serde_json::{json, Value as Json};
    use std::time::Duration;

    fn connection(reason: &str) -> RpcError {
        RpcError::ConnectionFailure {
            reason: reason.into(),
        }
    }

    #[tokio::test]
    async fn test_transport_error_fails_all_pending() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([("hang", hang())]);
            h.coordinator.expose([("local", noop())]);

            let handles: Vec<_> = (0..3).map(|_| h.coordinator.call("hang", vec![])).collect();
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(h.coordinator.pending_count(), 3);

            h.coordinator_faults.inject_error("worker crashed");
            for outcome in join_all(handles).await {
                assert_eq!(outcome.unwrap_err(), connection("worker crashed"), "{wire:?}");
            }

            assert_eq!(h.coordinator.pending_count(), 0);
            assert_eq!(h.coordinator.handler_count(), 0);
            assert!(h.coordinator.is_closed());

            // Fails fast until handlers are exposed again
            let err = h.coordinator.call("hang", vec![]).await.unwrap_err();
            assert_eq!(err, connection("channel closed"));

            h.coordinator.expose([("local", noop())]);
            assert!(!h.coordinator.is_closed());
            h.worker.expose([("echo", echo())]);
            let echoed = h
                .coordinator
                .call("echo", vec![Value::from("back")])
                .await
                .unwrap();
            assert_eq!(echoed.as_str(), Some("back"), "{wire:?}");
        }
    }

    #[tokio::test]
    async fn test_peer_dropped_closes_channel() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([("hang", hang())]);

            let pending = h.coordinator.call("hang", vec![]);
            tokio::time::sleep(Duration::from_millis(10)).await;
            drop(h.worker);

            let err = pending.await.unwrap_err();
            assert_eq!(err, connection("channel closed"), "{wire:?}");
            assert!(h.coordinator.is_closed());

            let err = h.coordinator.call("hang", vec![]).await.unwrap_err();
            assert!(matches!(err, RpcError::ConnectionFailure { .. }));
        }
    }

    #[tokio::test]
    async fn test_injected_close_stops_dispatcher() {
        let h = connect(Wire::Structured, RpcConfig::default());
        h.coordinator.expose([("local", noop())]);

        h.coordinator_faults.inject_close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.coordinator.is_closed());
        assert_eq!(h.coordinator.handler_count(), 0);
    }

    // =========================================================================
    // RAW PEER
    // =========================================================================

    async fn next_frame(receiver: &mut impl ChannelReceiver) -> Json {
        match receiver.recv().await {
            ChannelEvent::Message(Message::Raw(frame)) => frame,
            other => panic!("expected a raw frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_traffic_from_raw_peer() {
        let (ours, theirs) = MemoryChannel::serialized_pair();
        let (tx, rx) = ours.split();
        let endpoint = Endpoint::spawn(tx, rx, RpcConfig::default()).unwrap();
        endpoint.expose([("ping", noop())]);
        let (peer_tx, mut peer_rx) = theirs.split();

        let post = |frame: Json| peer_tx.send(Message::Raw(frame), vec![]).unwrap();

        // Unrelated traffic sharing the channel
        post(json!({ "type": "progress", "pct": 40 }));
        post(json!("hello"));

        // Request whose arguments reference a node that was never defined
        post(json!({
            PROTOCOL_MARKER: true,
            "isRequest": true,
            "reqid": "bad-1",
            "name": "ping",
            "args": { "$ref": 9 },
        }));
        let reply = decode_envelope(&next_frame(&mut peer_rx).await)
            .unwrap()
            .expect("protocol frame");
        let Envelope::Result {
            reqid,
            is_reject,
            data,
        } = reply
        else {
            panic!("expected a result envelope");
        };
        assert_eq!(reqid.as_str(), "bad-1");
        assert!(is_reject);
        let rejection = data.as_value().as_record().cloned().unwrap();
        assert_eq!(
            rejection.get("code").and_then(|c| c.as_i64()),
            Some(codes::HANDLER_ERROR)
        );

        // Malformed result and a result nobody is waiting for
        post(json!({ PROTOCOL_MARKER: true, "isRequest": false }));
        post(json!({ PROTOCOL_MARKER: true, "isRequest": false, "reqid": "ghost", "data": 1 }));

        // A well-formed request is still served
        post(json!({
            PROTOCOL_MARKER: true,
            "isRequest": true,
            "reqid": "ok-1",
            "name": "ping",
            "args": { "$id": 0, "$list": [] },
        }));
        let reply = next_frame(&mut peer_rx).await;
        assert_eq!(reply["reqid"], json!("ok-1"));
        assert_eq!(reply["isRequest"], json!(false));
        assert!(reply.get("isReject").is_none());

        let stats = endpoint.stats();
        assert_eq!(stats.malformed_messages, 2);
        assert_eq!(stats.stray_results, 1);
        assert_eq!(stats.requests_served, 1);
        assert_eq!(stats.rejections_sent, 1);
        assert!(!endpoint.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_result_fails_pending_call() {
        let (ours, theirs) = MemoryChannel::serialized_pair();
        let (tx, rx) = ours.split();
        let endpoint = Endpoint::spawn(tx, rx, RpcConfig::default()).unwrap();
        endpoint.expose([("ping", noop())]);
        let (peer_tx, mut peer_rx) = theirs.split();

        let pending = endpoint.call("remote", vec![Value::from(1)]);
        let request = next_frame(&mut peer_rx).await;
        assert_eq!(request["isRequest"], json!(true));
        let reqid = request["reqid"].clone();

        peer_tx
            .send(
                Message::Raw(json!({
                    PROTOCOL_MARKER: true,
                    "isRequest": false,
                    "reqid": reqid,
                    "data": { "$ref": 3 },
                })),
                vec![],
            )
            .unwrap();

        let err = pending.await.unwrap_err();
        assert!(matches!(err, RpcError::Malformed { .. }), "{err:?}");
        assert_eq!(endpoint.pending_count(), 0);

        let stats = endpoint.stats();
        assert_eq!(stats.malformed_messages, 1);
        assert_eq!(stats.stray_results, 0);
        assert!(!endpoint.is_closed());
    }
}
