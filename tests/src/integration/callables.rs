//! # Embedded Callables
//!
//! A callable placed anywhere inside arguments or a result crosses the
//! channel as a reference token. Invoking the stub on the far side issues
//! exactly one call back to the side that owns the callable.

#[cfg(test)]
mod tests {
    use crate::fixtures::{connect, noop, WIRES};
    use duplex_rpc::{Callable, HandlerError, Received, RpcConfig, Value};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_callable_three_levels_deep_round_trip() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "invoke_nested",
                Callable::new(|args| async move {
                    let callback = args
                        .arg(0)?
                        .into_view()
                        .and_then(|v| v.get("outer"))
                        .and_then(Received::into_view)
                        .and_then(|v| v.get("inner"))
                        .and_then(Received::into_view)
                        .and_then(|v| v.index(0))
                        .and_then(Received::into_fn)
                        .ok_or_else(|| HandlerError::new("no callback at outer.inner[0]"))?;

                    let result = callback
                        .call(vec![Value::from(7), Value::from("seven")])
                        .await?;
                    Ok(Value::record([("from_callback", result.into_value())]))
                }),
            )]);

            let seen = Arc::new(Mutex::new(Vec::new()));
            let record = Arc::clone(&seen);
            let callback = Callable::new(move |args| {
                let record = Arc::clone(&record);
                async move {
                    let n = args.arg(0)?.as_i64().unwrap_or_default();
                    let label = args.arg(1)?.as_str().map(str::to_string);
                    record.lock().push((n, label));
                    Ok(Value::from(n * 10))
                }
            });

            let payload = Value::record([(
                "outer",
                Value::record([("inner", Value::list(vec![Value::Callable(callback)]))]),
            )]);
            let result = h
                .coordinator
                .call("invoke_nested", vec![payload])
                .await
                .unwrap();

            let view = result.as_view().unwrap();
            assert_eq!(view.get("from_callback").unwrap().as_i64(), Some(70), "{wire:?}");
            assert_eq!(*seen.lock(), vec![(7, Some("seven".to_string()))]);
            assert_eq!(h.coordinator.stats().requests_served, 1, "{wire:?}");
            assert_eq!(h.worker.stats().calls_issued, 1);
        }
    }

    #[tokio::test]
    async fn test_stub_cached_per_token() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "inspect",
                Callable::new(|args| async move {
                    let view = args
                        .arg(0)?
                        .into_view()
                        .ok_or_else(|| HandlerError::invalid_argument(0, "record"))?;
                    let first = view.get("cb").and_then(Received::into_fn);
                    let second = view.get("cb").and_then(Received::into_fn);
                    let (Some(first), Some(second)) = (first, second) else {
                        return Err(HandlerError::new("cb is not callable"));
                    };

                    first.set_timeout(Duration::from_millis(1234));
                    Ok(Value::record([
                        ("same", Value::from(first.ptr_eq(&second))),
                        (
                            "timeout_ms",
                            Value::from(second.timeout().map_or(0, |t| t.as_millis() as i64)),
                        ),
                    ]))
                }),
            )]);

            let result = h
                .coordinator
                .call("inspect", vec![Value::record([("cb", Value::Callable(noop()))])])
                .await
                .unwrap();
            let view = result.as_view().unwrap();
            assert_eq!(view.get("same").unwrap().as_bool(), Some(true), "{wire:?}");
            assert_eq!(view.get("timeout_ms").unwrap().as_i64(), Some(1234));
        }
    }

    #[tokio::test]
    async fn test_callable_returned_in_result() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "make_counter",
                Callable::new(|_| async {
                    let count = Arc::new(AtomicI64::new(0));
                    Ok(Value::callable(move |_| {
                        let count = Arc::clone(&count);
                        async move { Ok(Value::from(count.fetch_add(1, Ordering::Relaxed) + 1)) }
                    }))
                }),
            )]);

            let counter = h
                .coordinator
                .call("make_counter", vec![])
                .await
                .unwrap()
                .into_fn()
                .expect("callable result");
            assert!(h.worker.config().is_ephemeral(counter.id()));
            assert_eq!(h.worker.handler_count(), 2);

            for expected in 1..=3 {
                let n = counter.call(vec![]).await.unwrap();
                assert_eq!(n.as_i64(), Some(expected), "{wire:?}");
            }
        }
    }

    #[tokio::test]
    async fn test_stub_forwarded_back_to_owner() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "relay",
                Callable::new(|args| async move { Ok(args.arg(0)?.into_value()) }),
            )]);

            let calls = Arc::new(AtomicI64::new(0));
            let counted = Arc::clone(&calls);
            let double = Callable::new(move |args| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::Relaxed);
                    Ok(Value::from(args.arg(0)?.as_i64().unwrap_or_default() * 2))
                }
            });

            // coordinator → worker → coordinator
            let relayed = h
                .coordinator
                .call("relay", vec![Value::Callable(double)])
                .await
                .unwrap()
                .into_fn()
                .expect("relayed stub");
            let result = relayed.call(vec![Value::from(21)]).await.unwrap();

            assert_eq!(result.as_i64(), Some(42), "{wire:?}");
            assert_eq!(calls.load(Ordering::Relaxed), 1);
        }
    }

    #[tokio::test]
    async fn test_pinned_token_sent_by_reference() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "call_it",
                Callable::new(|args| async move {
                    let target = args
                        .arg(0)?
                        .into_fn()
                        .ok_or_else(|| HandlerError::invalid_argument(0, "callable"))?;
                    let id = target.id().to_string();
                    target.call(vec![]).await?;
                    Ok(Value::from(id))
                }),
            )]);

            let hits = Arc::new(AtomicI64::new(0));
            let counted = Arc::clone(&hits);
            let progress = Callable::new(move |_| {
                counted.fetch_add(1, Ordering::Relaxed);
                async { Ok(Value::Null) }
            });

            let token = h.coordinator.pin(&progress, Some("progress"));
            assert_eq!(token.id(), "progress");

            let id = h
                .coordinator
                .call("call_it", vec![Value::Ref(token)])
                .await
                .unwrap();
            assert_eq!(id.as_str(), Some("progress"), "{wire:?}");
            assert_eq!(hits.load(Ordering::Relaxed), 1);

            // Embedding the callable itself reuses the pinned name
            let id = h
                .coordinator
                .call("call_it", vec![Value::Callable(progress)])
                .await
                .unwrap();
            assert_eq!(id.as_str(), Some("progress"));
            assert_eq!(h.coordinator.handler_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_callback_into_dropped_handler_not_found() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "keep",
                Callable::new(|args| async move { Ok(args.arg(0)?.into_value()) }),
            )]);

            let stub = h
                .coordinator
                .call("keep", vec![Value::Callable(noop())])
                .await
                .unwrap()
                .into_fn()
                .unwrap();
            assert!(h.worker.unregister(stub.id()));

            let err = stub.call(vec![]).await.unwrap_err();
            assert!(
                matches!(err, duplex_rpc::RpcError::HandlerNotFound { ref name } if name == stub.id()),
                "{wire:?}: {err:?}"
            );
        }
    }
}
