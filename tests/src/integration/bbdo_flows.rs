//! # BBDO Peer Flows
//!
//! Two protocol endpoints talking to each other, over in-memory pipes and
//! loopback TCP:
//!
//! 1. **Backpressure**: a writer bounded by a small ack window still
//!    delivers every event, in order
//! 2. **Negotiation**: extensions agreed over TCP, mandatory ones enforced
//! 3. **Mixed modes**: a coarse peer interoperates with a checking peer
//! 4. **Failure modes**: an interrupted handshake and an oversized event
//!    both close the stream instead of wedging it

#[cfg(test)]
mod tests {
    use crate::fixtures::{
        bbdo_pair, codec, collect_events, deadline_in, metric, next_outcome, service_status,
    };
    use mb_02_bbdo::{
        BbdoAcceptor, BbdoConfig, BbdoConnector, Extension, StreamState, TcpDialer, TcpServer,
    };
    use shared_types::catalogue::neb::ServiceStatus;
    use shared_types::{Acceptor, Connector, Event, ReadOutcome, Stream, StreamError, WriteOutcome};
    use std::sync::Arc;
    use std::time::Duration;

    // =============================================================================
    // BACKPRESSURE
    // =============================================================================

    #[tokio::test]
    async fn test_small_window_delivers_everything_in_order() {
        let config = BbdoConfig {
            ack_limit: 16,
            ..BbdoConfig::default()
        };
        let (mut writer, mut reader) = bbdo_pair(config.clone(), config);
        let sent: Vec<_> = (0..500).map(|i| service_status(1, i)).collect();

        let to_send = sent.clone();
        let write_all = async move {
            for event in to_send {
                writer.write_wait(event, None).await.unwrap();
            }
            writer
        };
        let (mut writer, received) = tokio::join!(write_all, collect_events(&mut reader, 500));

        assert_eq!(received.unwrap(), sent);
        assert_eq!(writer.window().limit(), 16);
        assert_eq!(reader.stats()["events_in"], "500");
        assert_eq!(writer.stats()["events_out"], "500");

        writer.close().await.unwrap();
        assert_eq!(
            next_outcome(&mut reader, Duration::from_secs(2)).await.unwrap(),
            ReadOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_writer_without_reader_stops_at_window() {
        let config = BbdoConfig {
            ack_limit: 8,
            ..BbdoConfig::default()
        };
        let (mut writer, mut reader) = bbdo_pair(config.clone(), config);
        let handshake = tokio::spawn(async move {
            reader.negotiate().await.unwrap();
            reader
        });
        writer.negotiate().await.unwrap();
        let _reader = handshake.await.unwrap();

        let mut accepted = 0;
        for i in 0..20 {
            match writer.write(metric(i, 1.0)).await.unwrap() {
                shared_types::WriteOutcome::Accepted(_) => accepted += 1,
                shared_types::WriteOutcome::WindowFull => break,
            }
        }
        assert_eq!(accepted, 8);
        assert_eq!(writer.stats()["unacknowledged"], "8");
    }

    #[tokio::test]
    async fn test_mismatched_windows_without_negotiation_still_flow() {
        let writer_config = BbdoConfig {
            negotiate: false,
            ack_limit: 4,
            ..BbdoConfig::default()
        };
        let reader_config = BbdoConfig {
            negotiate: false,
            ack_limit: 1000,
            ..BbdoConfig::default()
        };
        let (mut writer, mut reader) = bbdo_pair(writer_config, reader_config);
        let sent: Vec<_> = (0..200).map(|i| service_status(2, i)).collect();

        let to_send = sent.clone();
        let write_all = async move {
            for event in to_send {
                let outcome = writer.write_wait(event, deadline_in(2_000)).await.unwrap();
                assert!(matches!(outcome, WriteOutcome::Accepted(_)));
            }
            writer
        };
        let (writer, received) = tokio::join!(write_all, collect_events(&mut reader, 200));

        assert_eq!(received.unwrap(), sent);
        assert!(writer.window().acknowledged_total() >= 196);
    }

    // =============================================================================
    // NEGOTIATION OVER TCP
    // =============================================================================

    #[tokio::test]
    async fn test_tcp_negotiation_keeps_common_extensions() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        let server_config = BbdoConfig {
            extensions: vec![
                Extension::optional("compression").with_option("level", "6"),
                Extension::optional("tls"),
            ],
            ack_limit: 300,
            ..BbdoConfig::default()
        };
        let client_config = BbdoConfig {
            extensions: vec![Extension::mandatory("compression")],
            ack_limit: 1000,
            ..BbdoConfig::default()
        };
        let mut acceptor = BbdoAcceptor::new(server, codec(), server_config).unwrap();
        let connector = BbdoConnector::new(TcpDialer::new(address), codec(), client_config).unwrap();

        let (client, accepted) = tokio::join!(connector.open(), acceptor.accept());
        let client = client.unwrap();
        let accepted = accepted.unwrap();

        for stream in [&client, &accepted] {
            assert_eq!(stream.state(), StreamState::Established);
            let negotiated = stream.negotiated().unwrap();
            assert_eq!(negotiated.extension_names().collect::<Vec<_>>(), ["compression"]);
            assert_eq!(negotiated.ack_limit, 300);
            assert_eq!(stream.stats()["extensions"], "compression");
        }
        let compression = &client.negotiated().unwrap().extensions[0];
        assert_eq!(compression.peer_options.get("level").map(String::as_str), Some("6"));
    }

    #[tokio::test]
    async fn test_tcp_missing_mandatory_extension_fails_both_peers() {
        let server = TcpServer::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_addr().unwrap().to_string();
        let mut acceptor = BbdoAcceptor::new(server, codec(), BbdoConfig::default()).unwrap();
        let connector = BbdoConnector::new(
            TcpDialer::new(address),
            codec(),
            BbdoConfig {
                extensions: vec![Extension::mandatory("tls")],
                ..BbdoConfig::default()
            },
        )
        .unwrap();

        let (client, accepted) = tokio::join!(connector.open(), acceptor.accept());
        assert!(matches!(client, Err(StreamError::NegotiationFailed(_))));
        assert!(matches!(accepted, Err(StreamError::NegotiationFailed(_))));
    }

    // =============================================================================
    // MIXED MODES
    // =============================================================================

    #[tokio::test]
    async fn test_coarse_peer_talks_to_checking_peer() {
        let coarse = BbdoConfig {
            coarse: true,
            ..BbdoConfig::default()
        };
        let (mut client, mut server) = bbdo_pair(coarse, BbdoConfig::default());

        let up = service_status(4, 2).as_ref().clone().with_route(4, 1).into_shared();
        let down = metric(9, 42.5);
        let (sent_up, received_up) = tokio::join!(
            client.write(Arc::clone(&up)),
            next_outcome(&mut server, Duration::from_secs(2))
        );
        sent_up.unwrap();
        assert_eq!(received_up.unwrap(), ReadOutcome::Event(up));

        server.write(Arc::clone(&down)).await.unwrap();
        assert_eq!(
            next_outcome(&mut client, Duration::from_secs(2)).await.unwrap(),
            ReadOutcome::Event(down)
        );
        assert_eq!(client.stats()["coarse"], "true");
        assert_eq!(server.stats()["coarse"], "false");
    }

    // =============================================================================
    // FAILURE MODES
    // =============================================================================

    #[tokio::test]
    async fn test_interrupted_handshake_closes_the_stream() {
        let (mut client, _silent_server) = bbdo_pair(BbdoConfig::default(), BbdoConfig::default());

        let interrupted = tokio::time::timeout(Duration::from_millis(30), client.negotiate()).await;
        assert!(interrupted.is_err());

        let err = client.write(metric(1, 1.0)).await.unwrap_err();
        assert!(matches!(err, StreamError::NegotiationFailed(_)));
        assert_eq!(client.state(), StreamState::Closed);
        assert_eq!(client.stats()["state"], "closed");
    }

    #[tokio::test]
    async fn test_oversized_event_is_refused_by_the_reader() {
        let writer_config = BbdoConfig {
            negotiate: false,
            ..BbdoConfig::default()
        };
        let reader_config = BbdoConfig {
            negotiate: false,
            max_payload_size: 4096,
            ..BbdoConfig::default()
        };
        let (mut writer, mut reader) = bbdo_pair(writer_config, reader_config);

        let small = service_status(5, 1);
        let oversized = Event::new(ServiceStatus {
            host_id: 5,
            service_id: 2,
            perf_data: "load=0.1;".repeat(2_000),
            ..ServiceStatus::default()
        })
        .into_shared();
        writer.write(Arc::clone(&small)).await.unwrap();
        writer.write(oversized).await.unwrap();

        assert_eq!(
            next_outcome(&mut reader, Duration::from_secs(2)).await.unwrap(),
            ReadOutcome::Event(small)
        );
        let err = next_outcome(&mut reader, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidPayload(_)));
        assert_eq!(reader.state(), StreamState::Closed);
    }
}
