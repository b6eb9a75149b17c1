//! # Payload Marshalling
//!
//! Values crossing the channel keep their structure, key order, shared
//! sub-structure and cycles. Buffers named for transfer are moved; all
//! other buffers are copied.

#[cfg(test)]
mod tests {
    use crate::fixtures::{connect, echo, WIRES};
    use duplex_rpc::{Buffer, CallOptions, Callable, Record, RpcConfig, Value};

    #[tokio::test]
    async fn test_round_trip_preserves_structure_and_sharing() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([("echo", echo())]);

            let shared = Value::list(vec![Value::from(1), Value::from("two")]);
            let original = Value::record([
                ("a", shared.clone()),
                ("b", shared),
                ("ratio", Value::from(3.5)),
                ("flag", Value::from(true)),
                ("none", Value::Null),
            ]);

            let echoed = h.coordinator.call("echo", vec![original]).await.unwrap();
            let view = echoed.as_view().expect("record view");

            assert_eq!(view.keys(), vec!["a", "b", "ratio", "flag", "none"], "{wire:?}");
            let a = view.get("a").unwrap().into_view().unwrap();
            let b = view.get("b").unwrap().into_view().unwrap();
            assert!(a.ptr_eq(&b), "{wire:?}: shared node split");
            assert_eq!(a.len(), 2);
            assert_eq!(a.index(0).unwrap().as_i64(), Some(1));
            assert_eq!(a.index(1).unwrap().as_str(), Some("two"));
            assert_eq!(view.get("ratio").unwrap().as_f64(), Some(3.5));
            assert_eq!(view.get("flag").unwrap().as_bool(), Some(true));
            assert!(view.get("none").unwrap().is_null());
        }
    }

    #[tokio::test]
    async fn test_cyclic_value_round_trips() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([("echo", echo())]);

            let record = Record::new();
            record.insert("name", Value::from("loop"));
            record.insert("me", Value::Record(record.back_link()));

            let echoed = h
                .coordinator
                .call("echo", vec![Value::Record(record)])
                .await
                .unwrap();
            let view = echoed.into_view().unwrap();

            assert_eq!(view.get("name").unwrap().as_str(), Some("loop"));
            let inner = view.get("me").unwrap().into_view().unwrap();
            assert!(inner.ptr_eq(&view), "{wire:?}: cycle not preserved");
            let deeper = inner.get("me").unwrap().into_view().unwrap();
            assert!(deeper.ptr_eq(&view));

            let local = view.materialize();
            let watch = local.as_record().unwrap().back_link();
            assert!(watch.get("me").unwrap().as_record().unwrap().ptr_eq(&watch));
            drop(local);
            assert!(!watch.is_live(), "{wire:?}: materialized cycle leaked");
        }
    }

    #[tokio::test]
    async fn test_handler_sees_shared_arguments() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "same",
                Callable::new(|args| async move {
                    let a = args.arg(0)?.into_view();
                    let b = args.arg(1)?.into_view();
                    let same = matches!((a, b), (Some(a), Some(b)) if a.ptr_eq(&b));
                    Ok(Value::from(same))
                }),
            )]);

            let list = Value::list(vec![Value::from(9)]);
            let result = h
                .coordinator
                .call("same", vec![list.clone(), list])
                .await
                .unwrap();
            assert_eq!(result.as_bool(), Some(true), "{wire:?}");

            let result = h
                .coordinator
                .call(
                    "same",
                    vec![Value::list(vec![Value::from(9)]), Value::list(vec![Value::from(9)])],
                )
                .await
                .unwrap();
            assert_eq!(result.as_bool(), Some(false), "{wire:?}");
        }
    }

    #[tokio::test]
    async fn test_transfer_moves_and_copy_keeps() {
        for wire in WIRES {
            let h = connect(wire, RpcConfig::default());
            h.worker.expose([(
                "len",
                Callable::new(|args| async move {
                    let arg = args.arg(0)?;
                    let len = arg.as_buffer().map_or(0, |b| b.len());
                    Ok(Value::from(len as i64))
                }),
            )]);

            let moved = Buffer::new(vec![7u8; 64]);
            let options = CallOptions::new().with_transfer(vec![moved.clone()]);
            let len = h
                .coordinator
                .call_with("len", vec![Value::Buffer(moved.clone())], options)
                .await
                .unwrap();
            assert_eq!(len.as_i64(), Some(64), "{wire:?}");
            assert!(moved.is_detached(), "{wire:?}: transferred buffer still attached");

            let kept = Buffer::new(vec![1u8, 2, 3]);
            let len = h
                .coordinator
                .call("len", vec![Value::Buffer(kept.clone())])
                .await
                .unwrap();
            assert_eq!(len.as_i64(), Some(3));
            assert!(!kept.is_detached());
            assert_eq!(kept.bytes().unwrap().as_ref(), &[1, 2, 3]);
        }
    }
}
