//! # Ephemeral Handler Collection
//!
//! Handlers registered for embedded callables are evicted once they have
//! been idle for longer than the grace period after a sweep first saw them.
//! Sweeps are debounced on inbound traffic. Named handlers are never
//! collected.

#[cfg(test)]
mod tests {
    use crate::fixtures::{connect, noop, WIRES};
    use duplex_rpc::{CallOptions, Callable, HandlerError, RpcConfig, Value};
    use std::time::Duration;

    const PAST_GRACE: Duration = Duration::from_secs(31);

    #[tokio::test(start_paused = true)]
    async fn test_idle_ephemeral_collected_named_kept() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.coordinator.expose([("named", noop())]);
            let token = h.coordinator.pin(&noop(), None);

            // First sighting only stamps
            assert!(h.coordinator.sweep_now().is_empty());
            assert!(h.coordinator.has_handler(token.id()));

            tokio::time::advance(PAST_GRACE).await;
            let evicted = h.coordinator.sweep_now();

            assert_eq!(evicted, vec![token.id().to_string()], "{wire:?}");
            assert!(!h.coordinator.has_handler(token.id()));
            assert!(h.coordinator.has_handler("named"));
            assert_eq!(h.coordinator.stats().handlers_collected, 1);

            tokio::time::advance(PAST_GRACE * 4).await;
            assert!(h.coordinator.sweep_now().is_empty());
            assert!(h.coordinator.has_handler("named"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_driven_by_traffic() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([("ignore", noop())]);

            // Embedded callback leaves an ephemeral handler on the coordinator
            h.coordinator
                .call("ignore", vec![Value::Callable(noop())])
                .await
                .unwrap();
            assert_eq!(h.coordinator.handler_count(), 1);

            // Debounced sweep after the result: stamps only
            tokio::time::sleep(PAST_GRACE).await;
            assert_eq!(h.coordinator.handler_count(), 1, "{wire:?}");

            // More traffic, next sweep a debounce window later evicts
            h.coordinator.call("ignore", vec![]).await.unwrap();
            tokio::time::sleep(PAST_GRACE).await;

            assert_eq!(h.coordinator.handler_count(), 0, "{wire:?}");
            assert_eq!(h.coordinator.stats().handlers_collected, 1);
            assert_eq!(h.worker.handler_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sweep_without_traffic() {
        let h = connect(WIRES[0], RpcConfig::default());
        h.coordinator.pin(&noop(), None);

        tokio::time::sleep(PAST_GRACE * 10).await;
        assert_eq!(h.coordinator.handler_count(), 1);
        assert_eq!(h.coordinator.stats().handlers_collected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_extends_lifetime() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "invoke",
                Callable::new(|args| async move {
                    let target = args
                        .arg(0)?
                        .into_fn()
                        .ok_or_else(|| HandlerError::invalid_argument(0, "callable"))?;
                    target.call(vec![]).await?;
                    Ok(Value::Null)
                }),
            )]);

            let callback = noop();
            let token = h.coordinator.pin(&callback, None);
            h.coordinator.sweep_now();

            tokio::time::advance(Duration::from_secs(20)).await;
            h.coordinator
                .call("invoke", vec![Value::Ref(token.clone())])
                .await
                .unwrap();

            tokio::time::advance(Duration::from_secs(20)).await;
            assert!(h.coordinator.sweep_now().is_empty(), "{wire:?}");
            assert!(h.coordinator.has_handler(token.id()));

            tokio::time::advance(PAST_GRACE).await;
            assert_eq!(h.coordinator.sweep_now(), vec![token.id().to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resent_callable_gets_own_grace_window() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([
                ("ignore", noop()),
                (
                    "invoke_later",
                    Callable::new(|args| async move {
                        let target = args
                            .arg(0)?
                            .into_fn()
                            .ok_or_else(|| HandlerError::invalid_argument(0, "callable"))?;
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        target.call(vec![]).await?;
                        Ok(Value::Null)
                    }),
                ),
            ]);
            let callback = noop();

            // First send, stamped right away
            h.coordinator
                .call("ignore", vec![Value::Callable(callback.clone())])
                .await
                .unwrap();
            h.coordinator.sweep_now();

            // Traffic pushes the next sweep to 35s
            tokio::time::sleep(Duration::from_secs(5)).await;
            h.coordinator.call("ignore", vec![]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(26)).await;

            // Re-sent at 31s, invoked at 41s across the 35s sweep
            h.coordinator
                .call_with(
                    "invoke_later",
                    vec![Value::Callable(callback)],
                    CallOptions::new().with_timeout(Duration::from_secs(20)),
                )
                .await
                .unwrap_or_else(|err| panic!("{wire:?}: {err:?}"));

            assert_eq!(h.coordinator.stats().handlers_collected, 1, "{wire:?}");
            assert_eq!(h.coordinator.handler_count(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_collected_callback_reports_not_found() {
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

            h.worker.sweep_now();
            tokio::time::advance(PAST_GRACE).await;
            assert_eq!(h.worker.sweep_now(), vec![stub.id().to_string()]);

            let err = stub.call(vec![]).await.unwrap_err();
            assert!(
                matches!(err, duplex_rpc::RpcError::HandlerNotFound { .. }),
                "{wire:?}: {err:?}"
            );
        }
    }
}
