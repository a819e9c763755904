//! In-process RPC server used by the integration tests.
//!
//! Implements the five operations over the same framing the client uses,
//! and can be told to misbehave (wrong id, garbage, silence, slow replies, slow
//! reads).

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};

use sockrpc::ipc::{read_message, write_message, MAX_MESSAGE_SIZE};
use sockrpc::{CallRequest, Framing, Reply};

/// Test timeout to prevent hanging tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How the server answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    /// Correct replies.
    Conforming,
    /// Correct payload but `id + 1`.
    WrongId,
    /// Framed bytes that are not JSON.
    Garbage,
    /// Reads the request and never answers.
    Silent,
    /// Reads the request and hangs up.
    HangUp,
    /// `floor` answers after the given delay, everything else immediately.
    SlowFloor(Duration),
    /// Waits before reading anything, then answers correctly.
    SlowReader(Duration),
}

/// Handle on a running test server.
pub struct TestServer {
    pub socket_path: PathBuf,
    /// Ids in the order requests arrived.
    pub seen_ids: Arc<Mutex<Vec<u64>>>,
    /// Methods in the order replies were written.
    pub reply_order: Arc<Mutex<Vec<String>>>,
    /// Number of accepted connections.
    pub connections: Arc<Mutex<usize>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn seen_ids(&self) -> Vec<u64> {
        self.seen_ids.lock().unwrap().clone()
    }

    pub fn reply_order(&self) -> Vec<String> {
        self.reply_order.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Generate a unique socket path for this test to avoid conflicts.
pub fn test_socket_path(test_name: &str) -> PathBuf {
    let pid = std::process::id();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    PathBuf::from(format!(
        "/tmp/sockrpc-test-{}-{}-{}.sock",
        test_name, pid, timestamp
    ))
}

/// Bind a server on a fresh socket path and start accepting.
pub fn spawn_server(test_name: &str, behavior: Behavior, framing: Framing) -> TestServer {
    let socket_path = test_socket_path(test_name);
    let listener = UnixListener::bind(&socket_path).expect("Failed to bind test socket");

    let seen_ids = Arc::new(Mutex::new(Vec::new()));
    let reply_order = Arc::new(Mutex::new(Vec::new()));
    let connections = Arc::new(Mutex::new(0));

    let handle = {
        let seen_ids = Arc::clone(&seen_ids);
        let reply_order = Arc::clone(&reply_order);
        let connections = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                *connections.lock().unwrap() += 1;
                tokio::spawn(serve_connection(
                    stream,
                    behavior,
                    framing,
                    Arc::clone(&seen_ids),
                    Arc::clone(&reply_order),
                ));
            }
        })
    };

    TestServer {
        socket_path,
        seen_ids,
        reply_order,
        connections,
        handle,
    }
}

async fn serve_connection(
    stream: UnixStream,
    behavior: Behavior,
    framing: Framing,
    seen_ids: Arc<Mutex<Vec<u64>>>,
    reply_order: Arc<Mutex<Vec<String>>>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));

    if let Behavior::SlowReader(delay) = behavior {
        tokio::time::sleep(delay).await;
    }

    // Serve every request on the connection until the client hangs up.
    while let Ok(frame) = read_message(&mut reader, framing, MAX_MESSAGE_SIZE).await {
        let request: CallRequest = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(_) => return,
        };
        seen_ids.lock().unwrap().push(request.id);

        match behavior {
            Behavior::Silent => continue,
            Behavior::HangUp => return,
            _ => {}
        }

        let writer = Arc::clone(&writer);
        let reply_order = Arc::clone(&reply_order);
        tokio::spawn(async move {
            if let Behavior::SlowFloor(delay) = behavior {
                if request.method == "floor" {
                    tokio::time::sleep(delay).await;
                }
            }

            let body = match behavior {
                Behavior::Garbage => b"this is not json".to_vec(),
                Behavior::WrongId => {
                    let mut reply = dispatch(&request);
                    reply.id = Some(json!(request.id + 1));
                    serde_json::to_vec(&reply).unwrap()
                }
                _ => serde_json::to_vec(&dispatch(&request)).unwrap(),
            };

            let mut writer = writer.lock().await;
            reply_order.lock().unwrap().push(request.method.clone());
            let _ = write_message(&mut *writer, framing, &body).await;
        });
    }
}

/// Reference implementation of the server's operations.
pub fn dispatch(request: &CallRequest) -> Reply {
    let p = &request.params;
    let result: Result<Value, String> = match request.method.as_str() {
        "floor" => p
            .first()
            .and_then(Value::as_f64)
            .map(|x| json!(x.floor() as i64))
            .ok_or_else(|| "floor expects a number".to_string()),
        "nroot" => match (p.first().and_then(Value::as_i64), p.get(1).and_then(Value::as_f64)) {
            (Some(n), Some(x)) if n != 0 => Ok(json!(x.powf(1.0 / n as f64).round())),
            _ => Err("nroot expects two integers".to_string()),
        },
        "reverse" => p
            .first()
            .and_then(Value::as_str)
            .map(|s| json!(s.chars().rev().collect::<String>()))
            .ok_or_else(|| "reverse expects a string".to_string()),
        "validAnagram" => match (p.first().and_then(Value::as_str), p.get(1).and_then(Value::as_str)) {
            (Some(a), Some(b)) => {
                let mut a: Vec<char> = a.chars().collect();
                let mut b: Vec<char> = b.chars().collect();
                a.sort_unstable();
                b.sort_unstable();
                Ok(json!(a == b))
            }
            _ => Err("validAnagram expects two strings".to_string()),
        },
        "sort" => p
            .first()
            .and_then(Value::as_array)
            .map(|items| {
                let mut items: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                items.sort();
                json!(items)
            })
            .ok_or_else(|| "sort expects a list".to_string()),
        other => Err(format!("Method {} not found", other)),
    };

    match result {
        Ok(value) => Reply::success(request.id, value),
        Err(message) => Reply::failure(request.id, message),
    }
}
