//! Connection server over a real loopback TCP socket.
//!
//! The server is polled from the test thread exactly as the main loop
//! would, while a plain `TcpStream` plays the controller host.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, sleep};
use std::time::{Duration, Instant};

use embedded_hal::digital::PinState;
use pinlink::adapters::tcp_transport::TcpTransport;
use pinlink::app::events::AppEvent;
use pinlink::rpc::server::{MAX_OUTBOUND, Server};
use pinlink::rpc::transport::{NullTransport, Transport, TransportError};
use serde_json::{Value, json};

use crate::mock_hw::Rig;

const POLL_STEP_MS: u64 = 10;
const MAX_POLLS: usize = 400;

struct Harness {
    rig: Rig,
    server: Server<TcpTransport>,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    port: u16,
    now: u64,
}

impl Harness {
    fn connect() -> Self {
        let transport = TcpTransport::bind(0).unwrap();
        let port = transport.local_addr().unwrap().port();
        let writer = TcpStream::connect(("127.0.0.1", port)).unwrap();
        writer
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());

        let mut h = Self {
            rig: Rig::new(),
            server: Server::new(transport),
            reader,
            writer,
            port,
            now: 0,
        };
        for _ in 0..MAX_POLLS {
            h.poll();
            if h.server.session().is_some() {
                return h;
            }
            sleep(Duration::from_millis(5));
        }
        panic!("server never accepted the client");
    }

    fn poll(&mut self) -> usize {
        self.now += POLL_STEP_MS;
        let (service, mut ports) = self.rig.parts();
        self.server.poll(self.now, service, &mut ports)
    }

    /// Poll until `expected` responses went out, then a few more rounds to
    /// catch extras.  Returns the total.
    fn pump(&mut self, expected: usize) -> usize {
        let mut total = 0;
        for _ in 0..MAX_POLLS {
            total += self.poll();
            if total >= expected {
                break;
            }
            sleep(Duration::from_millis(5));
        }
        for _ in 0..5 {
            sleep(Duration::from_millis(5));
            total += self.poll();
        }
        total
    }

    fn pump_until_closed(&mut self) {
        for _ in 0..MAX_POLLS {
            self.poll();
            if self.server.session().is_none() {
                return;
            }
            sleep(Duration::from_millis(5));
        }
        panic!("session never ended");
    }

    fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
    }

    fn send_json(&mut self, request: Value) {
        let mut line = serde_json::to_vec(&request).unwrap();
        line.push(b'\n');
        self.send(&line);
    }

    fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "connection closed while waiting for a response");
        assert!(line.ends_with('\n'));
        serde_json::from_str(&line).unwrap()
    }

    fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line), Ok(0))
    }
}

#[test]
fn commands_then_blank_line_get_answers_and_close() {
    let mut h = Harness::connect();

    h.send(b"{\"action\":\"ping\",\"n\":1}\n{\"action\":\"ping\",\"n\":2}\r\n{\"action\":\"ping\",\"n\":3}\n\n");
    h.pump_until_closed();

    for n in 1..=3 {
        let res = h.recv();
        assert_eq!(res["n"], n);
        assert!(res.get("error").is_none());
    }
    assert!(h.at_eof(), "server must close after the blank line");

    assert_eq!(h.server.engine().failed(), 0);
    assert_eq!(
        h.rig.sink.count(|e| matches!(e, AppEvent::ClientDisconnected { commands: 3 })),
        1
    );
    assert!(!h.server.transport().is_connected());
}

#[test]
fn payload_split_over_reads_yields_one_response() {
    let mut h = Harness::connect();

    let pad = "x".repeat(1_500);
    let mut line = serde_json::to_vec(&json!({"action": "ping", "pad": pad})).unwrap();
    line.push(b'\n');
    assert!(line.len() > 1_024);

    let (head, tail) = line.split_at(700);
    h.send(head);
    assert_eq!(h.pump(0), 0, "partial line must not be answered");
    h.send(tail);
    assert_eq!(h.pump(1), 1);

    let res = h.recv();
    assert_eq!(res["pad"].as_str().map(str::len), Some(1_500));
    assert_eq!(h.server.session().map(|s| s.commands()), Some(1));
}

#[test]
fn unknown_action_keeps_session_open() {
    let mut h = Harness::connect();

    h.send_json(json!({"action": "blink", "pin": 2}));
    h.send_json(json!({"action": "ping"}));
    assert_eq!(h.pump(2), 2);

    let res = h.recv();
    assert_eq!(res["exception"], "ValidationError");
    assert_eq!(res["action"], "blink");
    assert_eq!(
        res["error"],
        "unknown action \"blink\", use \"list_actions\" to list available actions"
    );

    let res = h.recv();
    assert_eq!(res["action"], "ping");
    assert!(res.get("error").is_none());
    assert!(h.server.session().is_some());
}

#[test]
fn list_actions_is_exact() {
    let mut h = Harness::connect();

    h.send_json(json!({"action": "list_actions"}));
    h.pump(1);
    let res = h.recv();
    assert_eq!(
        res["actions"],
        json!([
            "setup_pin",
            "write_pin",
            "read_pin",
            "ping",
            "reset",
            "sleep",
            "get_resource_info",
            "get_version",
            "list_actions",
            "update"
        ])
    );
}

#[test]
fn failsafe_fires_after_client_vanishes() {
    let mut h = Harness::connect();

    h.send_json(json!({"action": "setup_pin", "pin": 4, "mode": "output", "value": 0}));
    h.send_json(json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 1}));
    assert_eq!(h.pump(2), 2);
    assert_eq!(h.rig.gpio.level(4), Some(PinState::High));

    let Harness {
        mut rig,
        mut server,
        reader,
        writer,
        mut now,
        ..
    } = h;
    drop(reader);
    drop(writer);

    for _ in 0..MAX_POLLS {
        now += POLL_STEP_MS;
        let (service, mut ports) = rig.parts();
        server.poll(now, service, &mut ports);
        if server.session().is_none() {
            break;
        }
        sleep(Duration::from_millis(5));
    }
    assert!(server.session().is_none(), "peer close must drop the session");

    let (service, mut ports) = rig.parts();
    service.tick(now + 1_000, &mut ports);
    assert_eq!(rig.gpio.level(4), Some(PinState::Low));
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::ClientDisconnected { commands: 2 })),
        1
    );
}

#[test]
fn next_client_is_served_after_disconnect() {
    let mut h = Harness::connect();
    h.send(b"\n");
    h.pump_until_closed();
    assert!(h.at_eof());

    let mut second = TcpStream::connect(("127.0.0.1", h.port)).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    second.write_all(b"{\"action\":\"get_version\"}\n").unwrap();

    assert_eq!(h.pump(1), 1);
    let mut line = String::new();
    BufReader::new(&second).read_line(&mut line).unwrap();
    let res: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(res["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn null_transport_never_accepts() {
    let mut rig = Rig::new();
    let mut server = Server::new(NullTransport);
    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(0, service, &mut ports), 0);
    assert!(server.session().is_none());
    assert!(rig.sink.events.is_empty());
}

#[test]
fn stalled_reader_does_not_block_polling() {
    let mut h = Harness::connect();
    h.send_json(json!({"action": "setup_pin", "pin": 4, "mode": "output", "value": 0}));
    h.send_json(json!({"action": "write_pin", "pin": 4, "value": 1, "timeout": 0.5}));
    assert_eq!(h.pump(2), 2);
    h.recv();
    h.recv();
    let deadline = h.rig.service.next_deadline().unwrap();

    // Floods requests and never reads a single response.
    let mut flooder = h.writer.try_clone().unwrap();
    flooder
        .set_write_timeout(Some(Duration::from_millis(100)))
        .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let burst = b"{\"action\":\"get_resource_info\"}\n".repeat(64);
    let flood = thread::spawn(move || {
        while !flag.load(Ordering::Relaxed) {
            if flooder.write_all(&burst).is_err() {
                sleep(Duration::from_millis(5));
            }
        }
    });

    let started = Instant::now();
    let mut slowest = Duration::ZERO;
    let mut reverted_at = None;
    while started.elapsed() < Duration::from_millis(1_500) {
        let t = Instant::now();
        h.poll();
        slowest = slowest.max(t.elapsed());

        let (service, mut ports) = h.rig.parts();
        service.tick(h.now, &mut ports);
        if reverted_at.is_none() && h.rig.gpio.level(4) == Some(PinState::Low) {
            reverted_at = Some(h.now);
        }
        sleep(Duration::from_millis(1));
    }
    stop.store(true, Ordering::Relaxed);
    flood.join().unwrap();

    assert!(slowest < Duration::from_millis(250), "poll blocked for {:?}", slowest);
    let reverted_at = reverted_at.expect("fail-safe never fired");
    assert!(reverted_at >= deadline);
    assert!(reverted_at < deadline + 2 * POLL_STEP_MS);
}

// ── Backpressure over a scripted link ─────────────────────────

/// Transport fed from canned read chunks, accepting at most `budget`
/// outbound bytes.
struct ScriptedLink {
    connected: bool,
    accepted: bool,
    chunks: VecDeque<Vec<u8>>,
    reads: usize,
    budget: Cell<usize>,
    sent: Vec<u8>,
}

impl ScriptedLink {
    fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            connected: false,
            accepted: false,
            chunks: chunks.into(),
            reads: 0,
            budget: Cell::new(0),
            sent: Vec::new(),
        }
    }

    fn lines_sent(&self) -> usize {
        self.sent.iter().filter(|b| **b == b'\n').count()
    }
}

impl Transport for ScriptedLink {
    fn accept(&mut self) -> Option<SocketAddr> {
        if self.accepted {
            return None;
        }
        self.accepted = true;
        self.connected = true;
        Some(SocketAddr::from(([10, 0, 0, 2], 40_000)))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.reads += 1;
        let Some(chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = data.len().min(self.budget.get());
        self.budget.set(self.budget.get() - n);
        self.sent.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

fn pings(n: usize) -> Vec<u8> {
    b"{\"action\":\"ping\"}\n".repeat(n)
}

#[test]
fn input_waits_until_responses_drain() {
    let mut rig = Rig::new();
    let mut server = Server::new(ScriptedLink::new(vec![pings(3), pings(2)]));

    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(0, service, &mut ports), 3);
    assert!(server.session().unwrap().pending() > 0);
    assert_eq!(server.transport().reads, 1);

    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(10, service, &mut ports), 0);
    assert_eq!(server.transport().reads, 1, "no reads while responses are queued");

    server.transport().budget.set(usize::MAX);
    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(20, service, &mut ports), 2);
    assert_eq!(server.session().unwrap().pending(), 0);
    assert_eq!(server.transport().lines_sent(), 5);
    assert_eq!(server.session().unwrap().commands(), 5);
}

#[test]
fn partial_writes_resume_where_they_stopped() {
    let mut rig = Rig::new();
    let mut server = Server::new(ScriptedLink::new(vec![pings(4)]));
    server.transport().budget.set(7);

    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(0, service, &mut ports), 4);
    assert_eq!(server.transport().sent.len(), 7);

    for now in 1..=50 {
        server.transport().budget.set(7);
        let (service, mut ports) = rig.parts();
        server.poll(now, service, &mut ports);
    }
    let text = String::from_utf8(server.transport().sent.clone()).unwrap();
    let replies: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(replies.len(), 4);
    assert!(replies.iter().all(|r| r["action"] == "ping"));
}

#[test]
fn runaway_backlog_drops_client() {
    let mut rig = Rig::new();
    // 512 ParseError replies from one read, far beyond the cap.
    let garbage = b"x\n".repeat(512);
    assert!(512 * 64 > MAX_OUTBOUND);
    let mut server = Server::new(ScriptedLink::new(vec![garbage]));

    let (service, mut ports) = rig.parts();
    assert_eq!(server.poll(0, service, &mut ports), 512);

    assert!(server.session().is_none());
    assert!(!server.transport().is_connected());
    assert!(server.transport().sent.is_empty());
    assert_eq!(
        rig.sink
            .count(|e| matches!(e, AppEvent::ClientDisconnected { commands: 512 })),
        1
    );
}
