//! End-to-end tests: a real server on loopback, driven by plain TCP clients.

use sockd::{Config, Server};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn config(sections: &str) -> Config {
    let config: Config = toml::from_str(sections).unwrap();
    config.validate().unwrap();
    config
}

fn single_endpoint(workers: &str) -> Config {
    config(&format!(
        r#"
        {}

        [[endpoint]]
        name = "ping"
        address = "127.0.0.1:0"
        drain_timeout_ms = 500
        "#,
        workers
    ))
}

struct Client {
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, data: &[u8]) {
        self.reader.get_mut().write_all(data).unwrap();
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line
    }

    fn request(&mut self, data: &[u8]) -> String {
        self.send(data);
        self.line()
    }

    /// Read until the server closes the connection.
    fn expect_eof(&mut self) {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes: {:?}", rest);
    }
}

#[test]
fn test_ping_pong_keep_alive() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 2")).unwrap();
    let addr = server.local_addr("ping").unwrap();

    let mut client = Client::connect(addr);
    for _ in 0..3 {
        assert_eq!(client.request(b"PING\r\n"), "PONG\r\n");
    }
    assert_eq!(client.request(b"ping\n"), "PONG\r\n");

    assert_eq!(client.request(b"QUIT\r\n"), "BYE\r\n");
    client.expect_eof();

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_invalid_line_keeps_session() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 1")).unwrap();
    let addr = server.local_addr("ping").unwrap();

    let mut client = Client::connect(addr);
    assert_eq!(client.request(b"HELLO\r\n"), "-ERR\r\n");
    assert_eq!(client.request(b"PING\r\n"), "PONG\r\n");

    server.shutdown();
    assert_eq!(client.request(b"QUIT\r\n"), "BYE\r\n");
    client.expect_eof();
    server.wait().unwrap();
}

#[test]
fn test_overlong_line_ends_session() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 1")).unwrap();
    let addr = server.local_addr("ping").unwrap();

    let mut client = Client::connect(addr);
    client.send(&[b'x'; 200]);
    assert_eq!(client.line(), "-ERR\r\n");

    // Bytes were received since the last response, so the close drains.
    client.expect_eof();

    let handle = server.handle();
    assert!(wait_for(Duration::from_secs(5), || {
        handle.stats().drain_started == 1
    }));

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_pipelined_requests() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 1")).unwrap();
    let addr = server.local_addr("ping").unwrap();

    let mut client = Client::connect(addr);
    client.send(b"PING\r\nping\nBOGUS\r\nQUIT\r\n");
    assert_eq!(client.line(), "PONG\r\n");
    assert_eq!(client.line(), "PONG\r\n");
    assert_eq!(client.line(), "-ERR\r\n");
    assert_eq!(client.line(), "BYE\r\n");
    client.expect_eof();

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_request_split_across_writes() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 1")).unwrap();
    let addr = server.local_addr("ping").unwrap();

    let mut client = Client::connect(addr);
    client.send(b"PI");
    thread::sleep(Duration::from_millis(50));
    client.send(b"NG\r");
    thread::sleep(Duration::from_millis(50));
    client.send(b"\n");
    assert_eq!(client.line(), "PONG\r\n");

    server.shutdown();
    assert_eq!(client.request(b"QUIT\r\n"), "BYE\r\n");
    server.wait().unwrap();
}

#[test]
fn test_peer_close_ends_session() {
    let server = Server::start(&single_endpoint("[workers]\nthreads = 1")).unwrap();
    let addr = server.local_addr("ping").unwrap();
    let handle = server.handle();

    let mut client = Client::connect(addr);
    assert_eq!(client.request(b"PING\r\n"), "PONG\r\n");
    drop(client);

    // Nothing arrived after the last response, so no drain is needed.
    assert!(wait_for(Duration::from_secs(5), || {
        handle.stats().sockets_closed == 1
    }));
    let stats = handle.stats();
    assert_eq!(stats.released_direct, 1);
    assert_eq!(stats.drain_started, 0);
    assert_eq!(handle.active_connections(), 0);

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_idle_session_times_out() {
    let config = config(
        r#"
        [workers]
        threads = 1

        [[endpoint]]
        name = "ping"
        address = "127.0.0.1:0"
        io_timeout_secs = 1
        "#,
    );
    let server = Server::start(&config).unwrap();
    let addr = server.local_addr("ping").unwrap();
    let handle = server.handle();

    let mut client = Client::connect(addr);
    assert_eq!(client.request(b"PING\r\n"), "PONG\r\n");

    let start = Instant::now();
    client.expect_eof();
    assert!(start.elapsed() >= Duration::from_millis(900));

    assert!(wait_for(Duration::from_secs(5), || {
        handle.stats().released_direct == 1
    }));

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_multiple_endpoints() {
    let config = config(
        r#"
        [workers]
        threads = 2

        [[endpoint]]
        name = "a"
        address = "127.0.0.1:0"

        [[endpoint]]
        name = "b"
        address = "127.0.0.1:0"
        "#,
    );
    let server = Server::start(&config).unwrap();
    assert_eq!(server.local_addrs().len(), 2);

    for name in ["a", "b"] {
        let mut client = Client::connect(server.local_addr(name).unwrap());
        assert_eq!(client.request(b"PING\r\n"), "PONG\r\n");
        assert_eq!(client.request(b"QUIT\r\n"), "BYE\r\n");
        client.expect_eof();
    }

    let handle = server.handle();
    assert!(wait_for(Duration::from_secs(5), || {
        handle.stats().sockets_closed == 2
    }));

    server.shutdown();
    server.wait().unwrap();
}

#[test]
fn test_full_queue_holds_one_connection() {
    let config = config(
        r#"
        [driver]
        admission_retry_ms = 50

        [workers]
        threads = 1
        queue_depth = 1

        [[endpoint]]
        name = "ping"
        address = "127.0.0.1:0"
        backlog = 16
        "#,
    );
    let server = Server::start(&config).unwrap();
    let addr = server.local_addr("ping").unwrap();
    let handle = server.handle();

    // Occupies the only worker.
    let mut first = Client::connect(addr);
    assert_eq!(first.request(b"PING\r\n"), "PONG\r\n");

    // One fills the queue, the next is held by the acceptor, the rest wait
    // in the listen backlog.
    let mut waiting: Vec<Client> = (0..3).map(|_| Client::connect(addr)).collect();
    assert!(wait_for(Duration::from_secs(5), || handle.stats().held == 1));
    assert_eq!(handle.stats().accepted, 3);

    for client in &mut waiting {
        client.send(b"PING\r\n");
    }
    waiting[0]
        .reader
        .get_ref()
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut byte = [0u8; 1];
    let err = waiting[0].reader.read(&mut byte).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut));
    waiting[0]
        .reader
        .get_ref()
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    // Each QUIT frees the worker for the next client, in arrival order.
    assert_eq!(first.request(b"QUIT\r\n"), "BYE\r\n");
    for client in &mut waiting {
        assert_eq!(client.line(), "PONG\r\n");
        assert_eq!(client.request(b"QUIT\r\n"), "BYE\r\n");
        client.expect_eof();
    }

    let stats = handle.stats();
    assert_eq!(stats.accepted, 4);
    assert_eq!(stats.max_held, 1);
    assert!(stats.admission_refused >= 1);

    server.shutdown();
    server.wait().unwrap();
}
