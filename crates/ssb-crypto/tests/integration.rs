//! Integration tests for the handshake and box-stream over real transports.

use std::sync::Arc;
use std::time::Duration;

use ssb_common::ErrorKind;
use ssb_crypto::handshake::{client_handshake, server_handshake, HandshakeConfig, HandshakeError};
use ssb_crypto::identity::{IdentityKeypair, NetworkKey};
use tokio::io::duplex;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Full handshake over TCP loopback, then messages both ways.
#[tokio::test]
async fn test_handshake_and_box_stream_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    let server_identity = Arc::new(IdentityKeypair::generate());
    let client_identity = IdentityKeypair::generate();
    let client_id = client_identity.feed_id();
    let server_public = server_identity.public();

    let server_handle = {
        let server_identity = server_identity.clone();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let outcome = server_handshake(
                &mut stream,
                &server_identity,
                &NetworkKey::main(),
                &HandshakeConfig::default(),
            )
            .await
            .unwrap();
            let remote = outcome.remote.feed_id();

            let (read_half, write_half) = stream.into_split();
            let (mut reader, mut writer) = outcome.into_box_stream(read_half, write_half);

            let request = reader.recv().await.unwrap().unwrap();
            assert_eq!(request, b"Hello from client!");
            writer.send(b"Hello from server!").await.unwrap();

            assert!(reader.recv().await.unwrap().is_none());
            writer.close().await.unwrap();
            remote
        })
    };

    let mut stream = TcpStream::connect(server_addr).await.unwrap();
    let outcome = client_handshake(
        &mut stream,
        &client_identity,
        &NetworkKey::main(),
        server_public,
        &HandshakeConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(outcome.remote, server_public);

    let (read_half, write_half) = stream.into_split();
    let (mut reader, mut writer) = outcome.into_box_stream(read_half, write_half);

    writer.send(b"Hello from client!").await.unwrap();
    let reply = timeout(Duration::from_secs(5), reader.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"Hello from server!");

    writer.close().await.unwrap();
    assert!(reader.recv().await.unwrap().is_none());

    assert_eq!(server_handle.await.unwrap(), client_id);
}

/// Both ends derive matching keys and nonces over an in-memory pipe.
#[tokio::test]
async fn test_session_contexts_cross_match() {
    let (mut client_io, mut server_io) = duplex(4096);
    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let network_key = NetworkKey::main();
    let config = HandshakeConfig::default();

    let (client, server) = tokio::join!(
        client_handshake(
            &mut client_io,
            &client_identity,
            &network_key,
            server_identity.public(),
            &config,
        ),
        server_handshake(&mut server_io, &server_identity, &network_key, &config),
    );
    let client = client.unwrap();
    let server = server.unwrap();

    assert_eq!(client.outbound, server.inbound);
    assert_eq!(client.inbound, server.outbound);
    assert_eq!(server.remote, client_identity.public());
}

#[tokio::test]
async fn test_unlisted_client_rejected() {
    let (mut client_io, mut server_io) = duplex(4096);
    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let network_key = NetworkKey::main();

    let server_config = HandshakeConfig::default()
        .allow_client(IdentityKeypair::generate().feed_id())
        .with_timeout(Duration::from_secs(2));
    let client_config = HandshakeConfig::default().with_timeout(Duration::from_secs(2));

    let server = async {
        let result = server_handshake(&mut server_io, &server_identity, &network_key, &server_config).await;
        drop(server_io);
        result
    };
    let (client, server) = tokio::join!(
        client_handshake(
            &mut client_io,
            &client_identity,
            &network_key,
            server_identity.public(),
            &client_config,
        ),
        server,
    );

    match server {
        Err(HandshakeError::Unauthorized(id)) => assert_eq!(id, client_identity.feed_id()),
        other => panic!("expected unauthorized, got {other:?}"),
    }
    // The server hangs up without an accept message.
    assert_eq!(client.unwrap_err().kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_listed_client_accepted() {
    let (mut client_io, mut server_io) = duplex(4096);
    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let network_key = NetworkKey::main();

    let client_config = HandshakeConfig::default();
    let server_config = HandshakeConfig::default().allow_client(client_identity.feed_id());

    let (client, server) = tokio::join!(
        client_handshake(
            &mut client_io,
            &client_identity,
            &network_key,
            server_identity.public(),
            &client_config,
        ),
        server_handshake(&mut server_io, &server_identity, &network_key, &server_config),
    );
    assert!(client.is_ok());
    assert!(server.is_ok());
}

#[tokio::test]
async fn test_network_key_mismatch() {
    let (mut client_io, mut server_io) = duplex(4096);
    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let client_network = NetworkKey::from_bytes([0x42; 32]);
    let config = HandshakeConfig::default().with_timeout(Duration::from_secs(2));

    let server = async {
        let result =
            server_handshake(&mut server_io, &server_identity, &NetworkKey::main(), &config).await;
        drop(server_io);
        result
    };
    let (client, server) = tokio::join!(
        client_handshake(
            &mut client_io,
            &client_identity,
            &client_network,
            server_identity.public(),
            &config,
        ),
        server,
    );

    let server_err = server.unwrap_err();
    assert!(matches!(server_err, HandshakeError::InvalidHello));
    assert_eq!(server_err.kind(), ErrorKind::Crypto);
    assert!(client.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out() {
    // Keep the server end open but never answer.
    let (mut client_io, _server_io) = duplex(4096);
    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let config = HandshakeConfig::default().with_timeout(Duration::from_millis(500));

    let err = client_handshake(
        &mut client_io,
        &client_identity,
        &NetworkKey::main(),
        server_identity.public(),
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HandshakeError::Timeout));
    assert_eq!(err.kind(), ErrorKind::Network);
}

#[tokio::test]
async fn test_peer_hangs_up_mid_handshake() {
    let (mut client_io, server_io) = duplex(4096);
    drop(server_io);

    let client_identity = IdentityKeypair::generate();
    let server_identity = IdentityKeypair::generate();
    let err = client_handshake(
        &mut client_io,
        &client_identity,
        &NetworkKey::main(),
        server_identity.public(),
        &HandshakeConfig::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HandshakeError::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Network);
}
