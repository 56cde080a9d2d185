//! Integration tests for the server and client engines
//!
//! Every test runs a real server and real clients over loopback UDP.

use client::config::ClientConfig;
use client::network::Client;
use client::transport::UdpClientTransport;
use server::config::ServerConfig;
use server::network::Server;
use server::transport::UdpServerTransport;
use shared::Error;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;

type TestServer = Server<UdpServerTransport>;
type TestClient = Client<UdpClientTransport>;

async fn start_server(config: ServerConfig) -> (TestServer, u16) {
    let server = Server::new(UdpServerTransport::new("127.0.0.1"), config);
    let addr = server.start(0).await.expect("server failed to start");
    (server, addr.port())
}

/// Connects a client and waits until the server has assigned its id.
async fn join(port: u16) -> (TestClient, String) {
    join_with(port, ClientConfig::default()).await
}

async fn join_with(port: u16, config: ClientConfig) -> (TestClient, String) {
    let client = Client::new(UdpClientTransport::new(), config);
    tokio_test::assert_ok!(client.connect("127.0.0.1", port).await);
    eventually("player id", || client.id().is_some()).await;
    let id = client.id().unwrap();
    (client, id)
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

/// HANDSHAKE TESTS
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn full_server_rejects_second_client() {
        let (server, port) = start_server(ServerConfig::new().with_max_players(1)).await;
        let (_first, _) = join(port).await;

        let second = Client::new(UdpClientTransport::new(), ClientConfig::default());
        match second.connect("127.0.0.1", port).await {
            Err(Error::Rejected(reason)) => assert_eq!(reason, "Server is full"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!second.is_connected());
        assert_eq!(server.player_count(), 1);
        server.stop();
    }

    #[tokio::test]
    async fn wrong_protocol_key_is_rejected() {
        let (server, port) = start_server(ServerConfig::new()).await;

        let client = Client::new(
            UdpClientTransport::new(),
            ClientConfig::new().with_protocol_key("someone-else"),
        );
        let result = client.connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(Error::Rejected(reason)) if reason == "Invalid key"));
        server.stop();
    }

    #[tokio::test]
    async fn init_states_are_seeded() {
        let (server, port) = start_server(ServerConfig::new()).await;

        let config = ClientConfig::new()
            .with_init_state("map", b"arena".to_vec())
            .with_player_init_state("name", b"alice".to_vec());
        let (client, id) = join_with(port, config).await;

        assert_eq!(server.get_state("map"), b"arena".to_vec());
        assert_eq!(server.get_player_state(&id, "name"), b"alice".to_vec());
        eventually("seeded mirror", || {
            client.get_player_state(&id, "name") == b"alice".to_vec()
        })
        .await;
        server.stop();
    }
}

/// STATE REPLICATION TESTS
mod state_tests {
    use super::*;

    #[tokio::test]
    async fn late_joiner_receives_snapshot() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (first, _) = join(port).await;

        first.set_state("score", vec![42]).unwrap();
        eventually("server state", || server.get_state("score") == vec![42]).await;

        let (second, _) = join(port).await;
        eventually("snapshot", || second.get_state("score") == vec![42]).await;
        server.stop();
    }

    #[tokio::test]
    async fn player_states_replicate_to_peers() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (first, first_id) = join(port).await;
        let (second, _) = join(port).await;
        eventually("roster", || first.players().len() == 2).await;

        first.set_player_state("hp", vec![5]).unwrap();
        eventually("peer mirror", || {
            second.get_player_state(&first_id, "hp") == vec![5]
        })
        .await;
        assert_eq!(server.get_player_state(&first_id, "hp"), vec![5]);
        server.stop();
    }

    #[tokio::test]
    async fn reserved_key_is_corrected() {
        let config = ServerConfig::new().with_reserved_states(vec!["round".to_string()]);
        let (server, port) = start_server(config).await;
        server.set_state("round", vec![1]);

        let (client, _) = join(port).await;
        eventually("snapshot", || client.get_state("round") == vec![1]).await;

        client.set_state("round", vec![9]).unwrap();
        assert_eq!(client.get_state("round"), vec![9]);
        eventually("correction", || client.get_state("round") == vec![1]).await;
        assert_eq!(server.get_state("round"), vec![1]);

        let (late, _) = join(port).await;
        eventually("late snapshot", || late.get_state("round") == vec![1]).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(late.get_state("round"), vec![1]);
        server.stop();
    }

    #[tokio::test]
    async fn reserved_delete_is_corrected() {
        let config = ServerConfig::new().with_reserved_states(vec!["round".to_string()]);
        let (server, port) = start_server(config).await;
        server.set_state("round", vec![1]);
        server.set_state("score", vec![2]);

        let (client, _) = join(port).await;
        eventually("snapshot", || client.get_state("round") == vec![1]).await;

        client.delete_state("round").unwrap();
        assert!(client.get_state("round").is_empty());
        eventually("delete correction", || client.get_state("round") == vec![1]).await;

        client.clear_states_except(&[]).unwrap();
        eventually("clear correction", || client.get_state("round") == vec![1]).await;
        assert!(client.get_state("score").is_empty());
        eventually("server clear", || server.get_state("score").is_empty()).await;
        assert_eq!(server.get_state("round"), vec![1]);
        server.stop();
    }

    #[tokio::test]
    async fn watcher_sees_remote_write() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (first, _) = join(port).await;
        let (second, _) = join(port).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        second.on("score", move |packet| sink.lock().unwrap().push(packet.payload.clone()));

        first.set_state("score", vec![7]).unwrap();
        eventually("watcher", || !seen.lock().unwrap().is_empty()).await;
        assert_eq!(seen.lock().unwrap()[0], vec![7]);
        server.stop();
    }
}

/// ROSTER AND RPC TESTS
mod rpc_tests {
    use super::*;

    #[tokio::test]
    async fn rosters_agree() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(join(port).await);
        }

        for (client, _) in &clients {
            eventually("full roster", || client.players().len() == 3).await;
        }
        let mut expected: Vec<String> = clients.iter().map(|(_, id)| id.clone()).collect();
        expected.sort();
        for (client, _) in &clients {
            let mut roster = client.players();
            roster.sort();
            assert_eq!(roster, expected);
        }
        assert_eq!(server.player_count(), 3);

        let (leaver, leaver_id) = clients.pop().unwrap();
        leaver.disconnect();
        for (client, _) in &clients {
            eventually("departure", || !client.players().contains(&leaver_id)).await;
        }
        server.stop();
    }

    #[tokio::test]
    async fn others_rpc_carries_sender() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (caller, caller_id) = join(port).await;
        let (callee, _) = join(port).await;
        eventually("roster", || caller.players().len() == 2).await;

        let calls = Arc::new(Mutex::new(Vec::new()));
        for client in [&caller, &callee] {
            let sink = Arc::clone(&calls);
            client.register_rpc("wave", move |sender, args| {
                sink.lock().unwrap().push((sender.to_string(), args.to_vec()));
            });
        }

        caller.rpc_others("wave", vec![1]).unwrap();
        eventually("rpc", || !calls.lock().unwrap().is_empty()).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(*calls.lock().unwrap(), vec![(caller_id, vec![1])]);
        server.stop();
    }

    #[tokio::test]
    async fn server_rpc_reaches_handler() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        server.register_rpc("restart", move |caller, args| {
            sink.lock().unwrap().push((caller.is_some(), args.to_vec()));
        });

        let (client, _) = join(port).await;
        client.rpc_server("restart", vec![3]).unwrap();
        eventually("server rpc", || !calls.lock().unwrap().is_empty()).await;
        assert_eq!(*calls.lock().unwrap(), vec![(true, vec![3])]);
        server.stop();
    }

    #[tokio::test]
    async fn pings_round_trip() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (first, _) = join(port).await;
        let (_second, second_id) = join(port).await;

        let rtt = first.ping_server(Duration::from_secs(2)).await.unwrap();
        assert!(rtt < Duration::from_secs(2));

        let rtt = first
            .ping_player(&second_id, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(rtt < Duration::from_secs(2));
        server.stop();
    }
}

/// MODERATION TESTS
mod moderation_tests {
    use super::*;

    #[tokio::test]
    async fn kicked_client_is_notified() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (client, id) = join(port).await;

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        client.on_kicked(move |reason| sink.lock().unwrap().push(reason.to_string()));

        server.kick(&id, "spam");
        eventually("disconnect", || !client.is_connected()).await;
        assert_eq!(*reasons.lock().unwrap(), vec!["spam".to_string()]);
        eventually("registry cleanup", || server.player_count() == 0).await;
        server.stop();
    }

    #[tokio::test]
    async fn stopped_server_disconnects_clients() {
        let (server, port) = start_server(ServerConfig::new()).await;
        let (client, _) = join(port).await;

        let reasons = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reasons);
        client.on_disconnected(move |info| sink.lock().unwrap().push(info.reason.clone()));

        server.stop();
        eventually("disconnect", || !client.is_connected()).await;
        assert_eq!(*reasons.lock().unwrap(), vec!["Server stopped".to_string()]);
    }
}
