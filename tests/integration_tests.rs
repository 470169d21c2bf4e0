//! Integration tests across wisp-crypto, wisp-transport and wisp-core.
//!
//! Streams run over `tokio::io::duplex` or loopback TCP; datagrams go
//! through an in-memory transport so every sent packet can be inspected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wisp_core::protocol::unix_now;
use wisp_core::{
    ClientConn, ClientPacketCodec, Error, Method, Request, Service, ServiceConfig,
};
use wisp_integration_tests::{CaptureHandler, Captured, MemoryTransport, TEST_PSK, counted_closer};
use wisp_transport::endpoint::OwnedPacketRead;
use wisp_transport::{
    Buffer, CopyError, Destination, PacketSink, StreamParts, TcpEndpoint, Transport, copy_conn,
};

fn client_addr() -> SocketAddr {
    "198.51.100.20:40000".parse().unwrap()
}

fn service(method: Method) -> (Arc<Service>, Captured) {
    service_with(ServiceConfig::new(method, TEST_PSK.to_vec()))
}

fn service_with(config: ServiceConfig) -> (Arc<Service>, Captured) {
    let (handler, captured) = CaptureHandler::new();
    (Arc::new(Service::new(config, handler).unwrap()), captured)
}

/// Connect a client to the service over an in-memory duplex.
fn connect(service: &Arc<Service>, method: Method, request: Request) -> ClientConn {
    let (client, server) = duplex(64 * 1024);
    let service = service.clone();
    tokio::spawn(async move {
        let _ = service
            .new_connection(StreamParts::from_io(server), client_addr())
            .await;
    });
    ClientConn::with_request(method, &TEST_PSK, StreamParts::from_io(client), request).unwrap()
}

// ============================================================================
// Stream handshake
// ============================================================================

#[tokio::test]
async fn test_end_to_end_stream_every_method() {
    for method in Method::ALL {
        let (service, mut captured) = service(method);
        let destination = Destination::domain("example.com", 443).unwrap();
        let mut client = connect(&service, method, Request::new(destination.clone()));
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let (conn, metadata) = captured.streams.recv().await.unwrap();
        assert_eq!(metadata.destination, destination);
        assert_eq!(metadata.source, client_addr());

        let (mut source, mut sink, _closer) = conn.into_parts();
        let mut request = [0u8; 18];
        source.read_exact(&mut request).await.unwrap();
        assert_eq!(&request, b"GET / HTTP/1.1\r\n\r\n");
        assert!(!sink.is_established());

        sink.write_all(b"HTTP/1.1 200 OK").await.unwrap();
        let mut response = [0u8; 15];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"HTTP/1.1 200 OK", "method {method}");
    }
}

#[tokio::test]
async fn test_padding_is_discarded() {
    let (service, mut captured) = service(Method::Aes256Gcm);
    let destination: Destination = "203.0.113.9:8080".parse().unwrap();
    let mut client = connect(
        &service,
        Method::Aes256Gcm,
        Request::new(destination.clone()).with_padding(900),
    );
    client.write_all(b"x").await.unwrap();

    let (conn, metadata) = captured.streams.recv().await.unwrap();
    assert_eq!(metadata.destination, destination);
    let (mut source, _sink, _closer) = conn.into_parts();
    let mut byte = [0u8; 1];
    source.read_exact(&mut byte).await.unwrap();
    assert_eq!(&byte, b"x");
}

#[tokio::test]
async fn test_header_only_request_then_response() {
    let (service, mut captured) = service(Method::ChaCha20Poly1305);
    let mut client = connect(
        &service,
        Method::ChaCha20Poly1305,
        Request::new(Destination::domain("example.com", 443).unwrap()),
    );
    client.shutdown().await.unwrap();

    let (conn, _) = captured.streams.recv().await.unwrap();
    let (mut source, mut sink, _closer) = conn.into_parts();
    let mut empty = Buffer::new(64);
    assert_eq!(source.read_chunk(&mut empty).await.unwrap(), 0);

    sink.write_all(b"late answer").await.unwrap();
    let mut response = [0u8; 11];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"late answer");
}

#[tokio::test]
async fn test_salt_replay_rejected() {
    let (service, mut captured) = service(Method::Aes128Gcm);
    let destination = Destination::domain("example.com", 443).unwrap();
    let salt = [0x5Cu8; 32];

    for attempt in 0..2 {
        let (client, server) = duplex(4096);
        let mut client = ClientConn::with_request(
            Method::Aes128Gcm,
            &TEST_PSK,
            StreamParts::from_io(client),
            Request::new(destination.clone()).with_salt(salt),
        )
        .unwrap();
        client.write_all(b"hi").await.unwrap();

        let result = service
            .new_connection(StreamParts::from_io(server), client_addr())
            .await;
        if attempt == 0 {
            result.unwrap();
            assert!(captured.streams.recv().await.is_some());
        } else {
            assert!(matches!(result, Err(Error::ReplayDetected)));
        }
    }
}

#[tokio::test]
async fn test_timestamp_window() {
    let (service, _captured) = service(Method::Aes256Gcm);
    let destination = Destination::domain("example.com", 443).unwrap();

    for (skew, accepted) in [(-29i64, true), (30, true), (-31, false), (31, false)] {
        let (client, server) = duplex(4096);
        let mut client = ClientConn::with_request(
            Method::Aes256Gcm,
            &TEST_PSK,
            StreamParts::from_io(client),
            Request::new(destination.clone()).with_timestamp(unix_now().saturating_add_signed(skew)),
        )
        .unwrap();
        client.write_all(b"t").await.unwrap();

        let result = service.handshake(StreamParts::from_io(server)).await;
        if accepted {
            assert!(result.is_ok(), "skew {skew} should pass");
        } else {
            assert!(
                matches!(result, Err(Error::BadTimestamp { .. })),
                "skew {skew} should fail"
            );
        }
    }
}

#[tokio::test]
async fn test_wrong_key_fails_handshake_and_closes() {
    let (service, _captured) = service(Method::Aes256Gcm);
    let (client, server) = duplex(4096);
    let mut client = ClientConn::new(
        Method::Aes256Gcm,
        &[0x01; 32],
        StreamParts::from_io(client),
        Destination::domain("example.com", 443).unwrap(),
    )
    .unwrap();
    client.write_all(b"nope").await.unwrap();

    let (closer, closes) = counted_closer();
    let result = service
        .new_connection(StreamParts::from_io(server).with_closer(closer), client_addr())
        .await;
    assert!(matches!(result, Err(Error::DecryptFailure)));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Relay sessions
// ============================================================================

#[tokio::test]
async fn test_relay_through_server_conn() {
    let (service, mut captured) = service(Method::Aes128Gcm);
    let mut client = connect(
        &service,
        Method::Aes128Gcm,
        Request::new(Destination::domain("upstream.test", 80).unwrap()),
    );
    client.write_all(b"ping").await.unwrap();
    client.shutdown().await.unwrap();

    let (conn, _) = captured.streams.recv().await.unwrap();
    let (dest_side, upstream) = duplex(4096);
    let dest = StreamParts::from_io(dest_side).into_endpoint();
    let relay = tokio::spawn(async move {
        copy_conn(&CancellationToken::new(), conn.into_endpoint(), dest).await
    });

    let (mut up_rd, mut up_wr) = tokio::io::split(upstream);
    let mut request = Vec::new();
    up_rd.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"ping");
    up_wr.write_all(b"pong").await.unwrap();
    up_wr.shutdown().await.unwrap();

    let mut response = [0u8; 4];
    client.read_exact(&mut response).await.unwrap();
    assert_eq!(&response, b"pong");
    assert_eq!(relay.await.unwrap().unwrap(), 8);
}

#[tokio::test]
async fn test_relay_cancellation_closes_each_endpoint_once() {
    let (service, mut captured) = service(Method::Aes256Gcm);
    let (client, server) = duplex(4096);
    let (conn_closer, conn_closes) = counted_closer();
    let mut client = ClientConn::new(
        Method::Aes256Gcm,
        &TEST_PSK,
        StreamParts::from_io(client),
        Destination::domain("example.com", 443).unwrap(),
    )
    .unwrap();
    client.write_all(b"hold").await.unwrap();
    service
        .new_connection(StreamParts::from_io(server).with_closer(conn_closer), client_addr())
        .await
        .unwrap();

    let (conn, _) = captured.streams.recv().await.unwrap();
    let (dest_side, _upstream) = duplex(4096);
    let (dest_closer, dest_closes) = counted_closer();
    let dest = StreamParts::from_io(dest_side)
        .with_closer(dest_closer)
        .into_endpoint();

    let token = CancellationToken::new();
    let relay_token = token.clone();
    let relay =
        tokio::spawn(async move { copy_conn(&relay_token, conn.into_endpoint(), dest).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay stops after cancellation")
        .unwrap();
    assert!(matches!(result, Err(CopyError::Cancelled)));
    assert_eq!(conn_closes.load(Ordering::SeqCst), 1);
    assert_eq!(dest_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_loopback_tcp_relay() {
    let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = echo.accept().await.unwrap();
        let (mut rd, mut wr) = stream.split();
        tokio::io::copy(&mut rd, &mut wr).await.unwrap();
        wr.shutdown().await.unwrap();
    });

    let (service, mut captured) = service(Method::ChaCha20Poly1305);
    let client = connect(
        &service,
        Method::ChaCha20Poly1305,
        Request::new(Destination::from(echo_addr)),
    );
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let writer_payload = payload.clone();

    // The request header rides on the first write, so the server only
    // accepts once the writer has started.
    let (mut source, mut sink, _closer) = client.into_parts();
    let writer = tokio::spawn(async move {
        for piece in writer_payload.chunks(30_000) {
            sink.write_all(piece).await.unwrap();
        }
        wisp_transport::Sink::close_write(&mut sink).await.unwrap();
    });

    let (conn, metadata) = captured.streams.recv().await.unwrap();
    let upstream = TcpEndpoint::connect(&metadata.destination).await.unwrap();
    let relay = tokio::spawn(async move {
        copy_conn(
            &CancellationToken::new(),
            conn.into_endpoint(),
            upstream.into_endpoint(),
        )
        .await
    });

    let mut echoed = vec![0u8; payload.len()];
    source.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
    writer.await.unwrap();
    assert!(relay.await.unwrap().is_ok());
}

// ============================================================================
// Datagram sessions
// ============================================================================

fn packet(bytes: &[u8]) -> Buffer {
    Buffer::from_slice(bytes)
}

#[tokio::test]
async fn test_datagram_round_trip_every_method() {
    for method in Method::ALL {
        let (service, mut captured) = service(method);
        let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
        let mut codec = ClientPacketCodec::new(method, &TEST_PSK).unwrap();
        let target: Destination = "192.0.2.53:53".parse().unwrap();

        let sealed = codec.encode(&target, b"query").unwrap();
        service
            .new_packet(transport.clone(), packet(&sealed), client_addr())
            .unwrap();

        let (conn, metadata) = captured.packets.recv().await.unwrap();
        assert_eq!(conn.session_id(), codec.session_id());
        assert_eq!(metadata.destination, target);
        let (mut source, mut sink, _closer) = conn.into_parts();
        let (payload, destination) = source.read_packet_owned().await.unwrap().unwrap();
        assert_eq!(payload.bytes(), b"query");
        assert_eq!(destination, target);

        sink.write_packet(&mut Buffer::from_slice(b"answer"), &target)
            .await
            .unwrap();
        let (reply, to) = transport.next_sent().await.unwrap();
        assert_eq!(to, client_addr());
        let (from, body) = codec.decode(&reply).unwrap();
        assert_eq!(from, target);
        assert_eq!(body, b"answer", "method {method}");
        assert!(codec.server_session_id().is_some());
    }
}

#[tokio::test]
async fn test_packet_id_replay() {
    let (service, mut captured) = service(Method::Aes256Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let codec = ClientPacketCodec::new(Method::Aes256Gcm, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();
    let now = unix_now();

    let first = codec.encode_packet(1, now, &target, b"one").unwrap();
    let second = codec.encode_packet(2, now, &target, b"two").unwrap();

    service
        .new_packet(transport.clone(), packet(&first), client_addr())
        .unwrap();
    service
        .new_packet(transport.clone(), packet(&second), client_addr())
        .unwrap();
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&first), client_addr()),
        Err(Error::ReplayDetected)
    ));

    let (conn, _) = captured.packets.recv().await.unwrap();
    let (mut source, _sink, _closer) = conn.into_parts();
    let (one, _) = source.read_packet_owned().await.unwrap().unwrap();
    let (two, _) = source.read_packet_owned().await.unwrap().unwrap();
    assert_eq!((one.bytes(), two.bytes()), (&b"one"[..], &b"two"[..]));
    assert_eq!(service.session_count(), 1);
}

#[tokio::test]
async fn test_replay_does_not_move_peer_address() {
    let (service, _captured) = service(Method::Aes128Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let codec = ClientPacketCodec::new(Method::Aes128Gcm, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();
    let sealed = codec.encode_packet(0, unix_now(), &target, b"x").unwrap();

    service
        .new_packet(transport.clone(), packet(&sealed), client_addr())
        .unwrap();
    let attacker: SocketAddr = "203.0.113.66:9999".parse().unwrap();
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&sealed), attacker),
        Err(Error::ReplayDetected)
    ));

    let session = service.session(codec.session_id()).unwrap();
    assert_eq!(session.remote_addr(), client_addr());
}

#[tokio::test]
async fn test_peer_address_follows_valid_packets() {
    let (service, _captured) = service(Method::ChaCha20Poly1305);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let mut codec = ClientPacketCodec::new(Method::ChaCha20Poly1305, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();
    let roamed: SocketAddr = "198.51.100.21:40001".parse().unwrap();

    let first = codec.encode(&target, b"a").unwrap();
    service
        .new_packet(transport.clone(), packet(&first), client_addr())
        .unwrap();
    let second = codec.encode(&target, b"b").unwrap();
    service
        .new_packet(transport.clone(), packet(&second), roamed)
        .unwrap();

    let session = service.session(codec.session_id()).unwrap();
    assert_eq!(session.remote_addr(), roamed);
}

#[tokio::test]
async fn test_rejected_first_packet_leaves_no_session() {
    let (service, _captured) = service(Method::Aes256Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let codec = ClientPacketCodec::new(Method::Aes256Gcm, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();

    let mut tampered = codec.encode_packet(0, unix_now(), &target, b"body").unwrap();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&tampered), client_addr()),
        Err(Error::DecryptFailure)
    ));
    assert_eq!(service.session_count(), 0);

    let stale = codec
        .encode_packet(0, unix_now() - 120, &target, b"body")
        .unwrap();
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&stale), client_addr()),
        Err(Error::BadTimestamp { .. })
    ));
    assert_eq!(service.session_count(), 0);

    // The id from the rejected packet is still usable afterwards.
    let valid = codec.encode_packet(0, unix_now(), &target, b"body").unwrap();
    service
        .new_packet(transport.clone(), packet(&valid), client_addr())
        .unwrap();
    assert_eq!(service.session_count(), 1);
}

#[tokio::test]
async fn test_short_and_foreign_packets_rejected() {
    let (service, _captured) = service(Method::ChaCha20Poly1305);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());

    assert!(matches!(
        service.new_packet(transport.clone(), packet(&[0u8; 20]), client_addr()),
        Err(Error::PacketTooShort { .. })
    ));

    let mut stranger = ClientPacketCodec::new(Method::ChaCha20Poly1305, &[0x77; 32]).unwrap();
    let foreign = stranger
        .encode(&"192.0.2.1:1".parse().unwrap(), b"hello")
        .unwrap();
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&foreign), client_addr()),
        Err(Error::DecryptFailure)
    ));
    assert_eq!(service.session_count(), 0);
}

#[tokio::test]
async fn test_client_rejects_replayed_server_packet() {
    let (service, mut captured) = service(Method::Aes128Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let mut codec = ClientPacketCodec::new(Method::Aes128Gcm, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();

    let sealed = codec.encode(&target, b"q").unwrap();
    service
        .new_packet(transport.clone(), packet(&sealed), client_addr())
        .unwrap();
    let (conn, _) = captured.packets.recv().await.unwrap();
    let (_source, mut sink, _closer) = conn.into_parts();
    sink.write_packet(&mut Buffer::from_slice(b"r"), &target)
        .await
        .unwrap();

    let (reply, _) = transport.next_sent().await.unwrap();
    codec.decode(&reply).unwrap();
    assert!(matches!(codec.decode(&reply), Err(Error::ReplayDetected)));
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_evicted_and_connection_ends() {
    let (service, mut captured) = service_with(
        ServiceConfig::new(Method::Aes256Gcm, TEST_PSK.to_vec())
            .with_udp_timeout(Duration::from_secs(30)),
    );
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let mut codec = ClientPacketCodec::new(Method::Aes256Gcm, &TEST_PSK).unwrap();
    let sealed = codec.encode(&"192.0.2.53:53".parse().unwrap(), b"q").unwrap();
    service
        .new_packet(transport.clone(), packet(&sealed), client_addr())
        .unwrap();

    let (conn, _) = captured.packets.recv().await.unwrap();
    let (mut source, _sink, _closer) = conn.into_parts();
    assert!(source.read_packet_owned().await.unwrap().is_some());
    assert_eq!(service.packet_connection_count(), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(service.evict_idle(), 1);
    assert_eq!(service.session_count(), 0);
    assert_eq!(service.packet_connection_count(), 0);
    assert!(source.read_packet_owned().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_replayed_packet_does_not_extend_session() {
    let (service, _captured) = service_with(
        ServiceConfig::new(Method::Aes128Gcm, TEST_PSK.to_vec())
            .with_udp_timeout(Duration::from_secs(30)),
    );
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let codec = ClientPacketCodec::new(Method::Aes128Gcm, &TEST_PSK).unwrap();
    let sealed = codec
        .encode_packet(0, unix_now(), &"192.0.2.53:53".parse().unwrap(), b"q")
        .unwrap();
    service
        .new_packet(transport.clone(), packet(&sealed), client_addr())
        .unwrap();

    tokio::time::advance(Duration::from_secs(20)).await;
    assert!(matches!(
        service.new_packet(transport.clone(), packet(&sealed), client_addr()),
        Err(Error::ReplayDetected)
    ));

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(service.evict_idle(), 1);
    assert_eq!(service.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recreated_session_gets_fresh_connection() {
    let (service, mut captured) = service_with(
        ServiceConfig::new(Method::ChaCha20Poly1305, TEST_PSK.to_vec())
            .with_udp_timeout(Duration::from_secs(30)),
    );
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let mut codec = ClientPacketCodec::new(Method::ChaCha20Poly1305, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();
    let moved: SocketAddr = "198.51.100.30:41000".parse().unwrap();

    let first = codec.encode(&target, b"before").unwrap();
    service
        .new_packet(transport.clone(), packet(&first), client_addr())
        .unwrap();
    let (old_conn, _) = captured.packets.recv().await.unwrap();
    let (mut old_source, _old_sink, _old_closer) = old_conn.into_parts();
    assert!(old_source.read_packet_owned().await.unwrap().is_some());

    // Expired but not yet swept: the next packet recreates the session.
    tokio::time::advance(Duration::from_secs(31)).await;
    let second = codec.encode(&target, b"after").unwrap();
    service
        .new_packet(transport.clone(), packet(&second), moved)
        .unwrap();

    let (new_conn, metadata) = captured.packets.recv().await.unwrap();
    assert_eq!(new_conn.session_id(), codec.session_id());
    assert_eq!(metadata.source, moved);
    assert!(old_source.read_packet_owned().await.unwrap().is_none());
    assert_eq!(service.packet_connection_count(), 1);

    let (mut source, mut sink, _closer) = new_conn.into_parts();
    let (payload, _) = source.read_packet_owned().await.unwrap().unwrap();
    assert_eq!(payload.bytes(), b"after");

    sink.write_packet(&mut Buffer::from_slice(b"reply"), &target)
        .await
        .unwrap();
    let (reply, to) = transport.next_sent().await.unwrap();
    assert_eq!(to, moved);
    let (from, body) = codec.decode(&reply).unwrap();
    assert_eq!((from, body.as_slice()), (target, &b"reply"[..]));
}

#[tokio::test]
async fn test_dropped_connection_reopens_on_next_packet() {
    let (service, mut captured) = service(Method::Aes256Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let mut codec = ClientPacketCodec::new(Method::Aes256Gcm, &TEST_PSK).unwrap();
    let target: Destination = "192.0.2.53:53".parse().unwrap();

    let first = codec.encode(&target, b"one").unwrap();
    service
        .new_packet(transport.clone(), packet(&first), client_addr())
        .unwrap();
    let (conn, _) = captured.packets.recv().await.unwrap();
    drop(conn);

    let second = codec.encode(&target, b"two").unwrap();
    service
        .new_packet(transport.clone(), packet(&second), client_addr())
        .unwrap();
    let (conn, _) = captured.packets.recv().await.unwrap();
    let (mut source, _sink, _closer) = conn.into_parts();
    let (payload, _) = source.read_packet_owned().await.unwrap().unwrap();
    assert_eq!(payload.bytes(), b"two");
    assert_eq!(service.session_count(), 1);
    assert_eq!(service.packet_connection_count(), 1);
}

#[tokio::test]
async fn test_serve_packets_stops_on_close() {
    let (service, _captured) = service(Method::Aes256Gcm);
    let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
    let dyn_transport: Arc<dyn Transport> = transport.clone();
    let token = CancellationToken::new();

    let serving = {
        let service = service.clone();
        let token = token.clone();
        tokio::spawn(async move { service.serve_packets(dyn_transport, &token).await })
    };
    transport.close();
    assert!(serving.await.unwrap().is_ok());
}
