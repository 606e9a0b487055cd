//! End-to-end tests against a real listener on an ephemeral port.

use serde_json::{json, Value};
use std::net::SocketAddr;
use tem_sim::record::{decode_waveform, RECV_AUX_SAMPLES, RECV_SAMPLES, SEND_SAMPLES};
use tem_sim::{SimConfig, SimulatorServer};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn send(&mut self, command: &str) {
        self.writer
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "connection closed while waiting for a response");
        assert!(line.ends_with('\n'));
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, command: &str) -> Value {
        self.send(command).await;
        self.recv().await
    }

    async fn collect(&mut self) -> Vec<Value> {
        self.send("START_COLLECT").await;
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(self.recv().await);
        }
        records
    }
}

async fn start_server() -> SocketAddr {
    let mut config = SimConfig::default();
    config.collect.interval_ms = 0;
    config.collect.noise_seed = Some(2024);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = SimulatorServer::from_listener(listener, &config);
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

#[tokio::test]
async fn test_reset_then_collect_point_ids() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    let reset = client.request("RESET_POINT").await;
    assert_eq!(reset, json!({"status": "success", "reset_point": 1}));

    let records = client.collect().await;
    let points: Vec<i64> = records
        .iter()
        .map(|r| r["Data_PointID"].as_i64().unwrap())
        .collect();
    assert_eq!(points, vec![1, 6, 11]);

    let ids: Vec<i64> = records.iter().map(|r| r["ID"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let start_times: Vec<i64> = records
        .iter()
        .map(|r| r["StartTime"].as_i64().unwrap())
        .collect();
    assert!(start_times.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_record_waveforms_decode() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    let records = client.collect().await;
    for record in &records {
        let len = |field: &str| decode_waveform(record[field].as_str().unwrap()).unwrap().len();
        assert_eq!(len("DATA_RECV"), RECV_SAMPLES);
        assert_eq!(len("DATA_RECV_LEN"), RECV_AUX_SAMPLES);
        assert_eq!(len("DATA_RECV_POS"), RECV_AUX_SAMPLES);
        assert_eq!(len("DATA_SEND"), SEND_SAMPLES);
        assert_eq!(len("DATA_SOFF"), SEND_SAMPLES);

        let send = decode_waveform(record["DATA_SEND"].as_str().unwrap()).unwrap();
        assert!(send.iter().all(|v| v.abs() <= 40.0));
        assert!(send[0] > 36.0);
        assert!(send[SEND_SAMPLES - 1] < -36.0);

        assert_eq!(record["RecvFs"], 51200.0);
        assert_eq!(record["SendCurrent"], 10.0);
        assert_eq!(record["StackCount"], 16);
        assert!(record["NOTE"].is_null());
    }
}

#[tokio::test]
async fn test_reset_point_then_next_point() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    client.collect().await;
    let next = client.request("NEXT_POINT").await;
    assert_eq!(next, json!({"status": "success", "next_point": 16}));

    client.request("RESET_POINT").await;
    let next = client.request("NEXT_POINT").await;
    assert_eq!(next, json!({"status": "success", "next_point": 1}));
}

#[tokio::test]
async fn test_set_params_and_status() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client
        .request(r#"SET_PARAMS:{"sample_rate": 204800, "custom": "line:7", "unknown_key": 1}"#)
        .await;
    assert_eq!(resp, json!({"status": "success", "msg": "params_updated"}));

    let status = client.request("GET_STATUS").await;
    assert_eq!(status["status"], "connected");
    assert_eq!(status["current_point"], 1);
    assert_eq!(status["params"]["sample_rate"], 204800);
    assert_eq!(status["params"]["custom"], "line:7");
    assert_eq!(status["params"]["send_current"], 10.0);
    assert!(status["params"].get("unknown_key").is_none());
}

#[tokio::test]
async fn test_malformed_params_leave_state_unchanged() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    let before = client.request("GET_STATUS").await;
    let resp = client.request("SET_PARAMS:not-json").await;
    assert_eq!(resp, json!({"error": "parse_failed"}));

    let after = client.request("GET_STATUS").await;
    assert_eq!(before["params"], after["params"]);
}

#[tokio::test]
async fn test_unknown_command_keeps_connection_open() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    let resp = client.request("FOO_BAR").await;
    assert_eq!(resp, json!({"error": "unknown_command"}));

    let next = client.request("NEXT_POINT").await;
    assert_eq!(next["status"], "success");
}

#[tokio::test]
async fn test_empty_line_closes_connection() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send("").await;
    let mut line = String::new();
    let n = client.reader.read_line(&mut line).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_state_is_shared_between_connections() {
    let addr = start_server().await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;

    let a = first.collect().await;
    let b = second.collect().await;

    let ids: Vec<i64> = a
        .iter()
        .chain(b.iter())
        .map(|r| r["ID"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    // Point ids continue where the other connection left off
    assert_eq!(b[0]["Data_PointID"], 16);

    second
        .request(r#"SET_PARAMS:{"stack_count": 32}"#)
        .await;
    let status = first.request("GET_STATUS").await;
    assert_eq!(status["params"]["stack_count"], 32);
    assert_eq!(status["current_point"], 31);
}

#[tokio::test]
async fn test_concurrent_collections_keep_ids_unique() {
    let addr = start_server().await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr).await;
            client
                .collect()
                .await
                .into_iter()
                .map(|r| r["ID"].as_i64().unwrap())
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let mine = task.await.unwrap();
        // Ids within one collection are increasing
        assert!(mine.windows(2).all(|w| w[0] < w[1]));
        ids.extend(mine);
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=12).collect::<Vec<i64>>());
}
