//! # End-to-End Broker
//!
//! Full runtimes built from configuration files, with real BBDO peers:
//!
//! ```text
//! poller ──→ [edge broker] ──connect──→ [central broker] ──→ storage reader
//! ```

#[cfg(test)]
mod tests {
    use crate::fixtures::{codec, collect_events, host_status, metric, next_outcome, service_status};
    use broker_runtime::{BrokerConfig, BrokerRuntime};
    use mb_02_bbdo::{BbdoConfig, BbdoConnector, BbdoStream, TcpDialer, Transport};
    use shared_types::{Connector, ReadOutcome, Stream};
    use std::io::Write;
    use std::net::SocketAddr;
    use std::time::Duration;

    const GRACE: Duration = Duration::from_secs(3);

    fn config_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    async fn connect(address: SocketAddr) -> BbdoStream<Transport> {
        BbdoConnector::new(
            TcpDialer::new(address.to_string()),
            codec(),
            BbdoConfig::default(),
        )
        .unwrap()
        .open()
        .await
        .unwrap()
    }

    async fn started(config: BrokerConfig) -> BrokerRuntime {
        let mut runtime = BrokerRuntime::new(config).unwrap();
        runtime.start().await.unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_config_file_to_filtered_output() {
        let file = config_file(
            r#"
[engine]
queue_max_size = 128

[[inputs]]
name = "pollers"
mode = "listen"
address = "127.0.0.1:0"

[[outputs]]
name = "status-db"
mode = "listen"
address = "127.0.0.1:0"
filter = ["neb"]
ack_limit = 2
"#,
        );
        let config = BrokerConfig::from_file(file.path()).unwrap();
        let mut runtime = started(config).await;

        let mut reader = connect(runtime.local_addr("status-db").unwrap()).await;
        let mut poller = connect(runtime.local_addr("pollers").unwrap()).await;
        let neb = vec![host_status(1), service_status(1, 1), service_status(1, 2)];
        for event in [neb[0].clone(), metric(1, 0.5), neb[1].clone(), neb[2].clone()] {
            poller.write_wait(event, None).await.unwrap();
        }

        assert_eq!(collect_events(&mut reader, 3).await.unwrap(), neb);
        assert_eq!(reader.window().limit(), 2);
        let stats = runtime.stats();
        assert_eq!(stats["published"], "4");
        assert_eq!(stats["queue.status-db#1.delivered"], "3");

        runtime.shutdown(GRACE).await;
        assert_eq!(
            next_outcome(&mut reader, GRACE).await.unwrap(),
            ReadOutcome::Closed
        );
    }

    #[test]
    fn test_environment_overrides_engine_section() {
        let file = config_file("[engine]\nqueue_max_size = 128\n");
        let mut config = BrokerConfig::from_file(file.path()).unwrap();
        config
            .apply_env_overrides(|key| (key == "BROKER_QUEUE_MAX_SIZE").then(|| "7".to_string()))
            .unwrap();
        let runtime = BrokerRuntime::new(config).unwrap();
        assert_eq!(runtime.engine().config().queue_max_size, 7);
    }

    #[tokio::test]
    async fn test_edge_broker_relays_to_central_broker() {
        let mut central = started(
            BrokerConfig::from_toml_str(
                r#"
[[inputs]]
name = "edges"
mode = "listen"
address = "127.0.0.1:0"

[[outputs]]
name = "storage"
mode = "listen"
address = "127.0.0.1:0"
filter = ["storage"]
"#,
            )
            .unwrap(),
        )
        .await;
        let mut reader = connect(central.local_addr("storage").unwrap()).await;

        let central_input = central.local_addr("edges").unwrap();
        let mut edge = started(
            BrokerConfig::from_toml_str(&format!(
                r#"
[[inputs]]
name = "pollers"
mode = "listen"
address = "127.0.0.1:0"

[[outputs]]
name = "central"
mode = "connect"
address = "{central_input}"
retry_interval_ms = 100
"#
            ))
            .unwrap(),
        )
        .await;
        let mut poller = connect(edge.local_addr("pollers").unwrap()).await;

        let metrics: Vec<_> = (0..20).map(|i| metric(i, f64::from(i) * 1.5)).collect();
        for (i, event) in metrics.iter().enumerate() {
            poller.write_wait(event.clone(), None).await.unwrap();
            poller.write_wait(host_status(i as u32), None).await.unwrap();
        }

        assert_eq!(collect_events(&mut reader, 20).await.unwrap(), metrics);

        edge.shutdown(GRACE).await;
        central.shutdown(GRACE).await;
        assert_eq!(
            next_outcome(&mut reader, GRACE).await.unwrap(),
            ReadOutcome::Closed
        );
    }
}
