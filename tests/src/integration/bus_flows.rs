//! # Bus Flows
//!
//! The engine seen through the `Stream` contract, fed by a BBDO peer:
//!
//! 1. **BBDO → Publisher → Engine**: one input fans out to filtered subscribers
//! 2. **Slow subscriber**: spills to its spill store while others keep pace
//! 3. **Stop**: subscribers drain what was queued, then read `Closed`
//! 4. **Restart**: a file spill hands unread events to the next engine
//! 5. **Concurrent publish**: order holds while a reader races the spill

#[cfg(test)]
mod tests {
    use crate::fixtures::{
        bbdo_pair, codec, collect_events, host_status, metric, next_outcome, service_status,
    };
    use broker_runtime::{pump, EndpointStream, PumpExit, PumpOptions};
    use mb_02_bbdo::{BbdoConfig, Direction};
    use shared_bus::{Engine, EngineConfig, EventFilter, FileSpill, SubscriberConfig};
    use shared_types::{EventRegistry, ReadOutcome, Stream, WriteOutcome};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    fn engine(queue_max_size: usize) -> Engine {
        let engine = Engine::new(EngineConfig {
            queue_max_size,
            ..EngineConfig::default()
        })
        .unwrap();
        engine.start();
        engine
    }

    // =============================================================================
    // BBDO INPUT FAN-OUT
    // =============================================================================

    #[tokio::test]
    async fn test_bbdo_input_fans_out_to_filtered_subscribers() {
        let registry = EventRegistry::builtin();
        let engine = engine(1_000);
        let mut everything = engine.subscribe(SubscriberConfig::new("everything")).unwrap();
        let mut storage = engine
            .subscribe(
                SubscriberConfig::new("storage")
                    .with_filter(EventFilter::parse(&["storage"], &registry).unwrap()),
            )
            .unwrap();

        let input = BbdoConfig {
            direction: Direction::Input,
            ..BbdoConfig::default()
        };
        let (mut poller, server) = bbdo_pair(BbdoConfig::default(), input);
        let mut sent = Vec::new();
        for i in 0..10 {
            sent.push(service_status(1, i));
            if i % 2 == 0 {
                sent.push(metric(i, f64::from(i)));
            }
        }
        let (_tx, shutdown) = watch::channel(false);
        let mut source = EndpointStream::from(server);
        let mut sink = EndpointStream::from(engine.publisher("poller"));
        let mut carry = VecDeque::new();

        let feed = async {
            for event in &sent {
                poller.write_wait(event.clone(), None).await.unwrap();
            }
            poller.close().await.unwrap();
        };
        let (_, report) = tokio::join!(
            feed,
            pump(
                "poller",
                &mut source,
                &mut sink,
                &mut carry,
                &shutdown,
                PumpOptions::default()
            )
        );
        let report = report.unwrap();
        assert_eq!(report.exit, PumpExit::SourceClosed);
        assert_eq!(report.forwarded, 15);

        let all = collect_events(&mut everything, 15).await.unwrap();
        assert_eq!(all, sent);
        let metrics = collect_events(&mut storage, 5).await.unwrap();
        let expected: Vec<_> = sent
            .iter()
            .filter(|event| event.type_name() == "metric")
            .cloned()
            .collect();
        assert_eq!(metrics, expected);
        assert_eq!(engine.stats().published, 15);
    }

    // =============================================================================
    // SLOW SUBSCRIBER
    // =============================================================================

    #[tokio::test]
    async fn test_slow_subscriber_spills_without_blocking_others() {
        let engine = engine(4);
        let mut fast = engine.subscribe(SubscriberConfig::new("fast")).unwrap();
        let mut slow = engine.subscribe(SubscriberConfig::new("slow")).unwrap();

        let mut sent = Vec::new();
        for i in 0..50 {
            let event = host_status(i);
            sent.push(event.clone());
            assert_eq!(engine.publish(event).unwrap(), 2);
            if let ReadOutcome::Event(got) =
                next_outcome(&mut fast, Duration::from_secs(1)).await.unwrap()
            {
                assert_eq!(got, sent[i as usize]);
            } else {
                panic!("fast subscriber fell behind at {i}");
            }
        }

        let stats = slow.stats();
        assert_eq!(stats["queue_depth"], "4");
        assert_eq!(stats["spill_depth"], "46");
        assert_eq!(fast.stats()["spill_depth"], "0");

        assert_eq!(collect_events(&mut slow, 50).await.unwrap(), sent);
        assert_eq!(slow.stats()["spill_depth"], "0");
    }

    // =============================================================================
    // STOP
    // =============================================================================

    #[tokio::test]
    async fn test_stop_drains_queues_then_closes() {
        let engine = engine(16);
        let mut first = engine.subscribe(SubscriberConfig::new("first")).unwrap();
        let mut second = engine.subscribe(SubscriberConfig::new("second")).unwrap();
        let sent: Vec<_> = (0..5).map(|i| service_status(2, i)).collect();
        for event in &sent {
            engine.publish(event.clone()).unwrap();
        }

        engine.stop();
        assert_eq!(engine.publish(service_status(2, 99)).unwrap(), 0);

        for subscriber in [&mut first, &mut second] {
            assert_eq!(collect_events(subscriber, 5).await.unwrap(), sent);
            assert_eq!(
                next_outcome(subscriber, Duration::from_secs(1)).await.unwrap(),
                ReadOutcome::Closed
            );
        }
        assert_eq!(engine.stats().discarded, 1);
    }

    // =============================================================================
    // RESTART
    // =============================================================================

    #[tokio::test]
    async fn test_file_spill_replays_unread_events_after_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("central.spill");
        let sent: Vec<_> = (0..10).map(host_status).collect();

        let first_run = engine(2);
        let spill = FileSpill::open(&path, codec(), 100).unwrap();
        let mut subscriber = first_run
            .subscribe_with_spill(SubscriberConfig::new("central"), Box::new(spill))
            .unwrap();
        for event in &sent {
            assert_eq!(first_run.publish(event.clone()).unwrap(), 1);
        }
        assert_eq!(
            collect_events(&mut subscriber, 3).await.unwrap(),
            sent[..3].to_vec()
        );
        first_run.stop();
        drop(subscriber);
        assert!(path.exists());

        let second_run = engine(2);
        let spill = FileSpill::open(&path, codec(), 100).unwrap();
        let mut subscriber = second_run
            .subscribe_with_spill(SubscriberConfig::new("central"), Box::new(spill))
            .unwrap();
        assert_eq!(subscriber.stats()["spill_depth"], "7");

        let late = host_status(99);
        second_run.publish(late.clone()).unwrap();
        let mut expected = sent[3..].to_vec();
        expected.push(late);
        assert_eq!(collect_events(&mut subscriber, 8).await.unwrap(), expected);
        assert!(!path.exists());
    }

    // =============================================================================
    // CONCURRENT PUBLISH
    // =============================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_publish_keeps_order_through_spill() {
        let engine = engine(3);
        let mut reader = engine.subscribe(SubscriberConfig::new("reader")).unwrap();
        let sent: Vec<_> = (0..500).map(|i| service_status(3, i)).collect();

        // The burst overflows the live queue before the reader starts.
        for event in &sent[..20] {
            engine.publish(event.clone()).unwrap();
        }
        let feed = {
            let mut publisher = engine.publisher("feed");
            let rest = sent[20..].to_vec();
            tokio::spawn(async move {
                for (i, event) in rest.into_iter().enumerate() {
                    assert_eq!(
                        publisher.write(event).await.unwrap(),
                        WriteOutcome::Accepted(1)
                    );
                    if i % 8 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        let received = collect_events(&mut reader, sent.len()).await.unwrap();
        feed.await.unwrap();
        assert_eq!(received, sent);
        let spilled: u64 = reader.stats()["spilled_total"].parse().unwrap();
        assert!(spilled >= 17);
        assert_eq!(reader.stats()["spill_depth"], "0");
    }
}
