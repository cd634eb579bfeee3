//! Integration tests for the socket driver.
//!
//! These tests run a real acceptor thread against loopback connections.

use crossbeam_channel::Receiver;
use sock_driver::{
    Connection, Driver, DriverConfig, EndpointConfig, Error, Phase, QueueAdmission,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Get an address that lets the OS assign a port.
fn get_test_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Poll `cond` until it holds or `timeout` passes.
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

fn start(endpoint: EndpointConfig) -> (Driver, SocketAddr, Receiver<Connection>) {
    let (admission, queue) = QueueAdmission::bounded(16);
    let driver = Driver::spawn(DriverConfig::new().endpoint(endpoint), admission).unwrap();
    let addr = driver.local_addrs()[0].1;
    (driver, addr, queue)
}

fn recv(queue: &Receiver<Connection>) -> Connection {
    queue.recv_timeout(Duration::from_secs(5)).unwrap()
}

#[test]
fn test_serve_and_close() {
    let (driver, addr, queue) = start(EndpointConfig::new("echo", get_test_addr()));
    let handle = driver.handle();
    assert!(wait_for(Duration::from_secs(5), || handle.phase() == Phase::Running));

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"hello").unwrap();

    let mut conn = recv(&queue);
    assert_eq!(conn.endpoint_name(), "echo");
    assert_eq!(handle.active_connections(), 1);

    let mut buf = [0u8; 16];
    let n = conn.read(&mut buf).unwrap();
    conn.write_all(&buf[..n]).unwrap();
    handle.submit_for_close(conn);

    let mut echoed = Vec::new();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed, b"hello");
    drop(client);

    assert!(wait_for(Duration::from_secs(5), || handle.stats().drain_finished() == 1));
    let stats = handle.stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.drain_started, 1);
    assert_eq!(stats.sockets_closed, 1);
    assert_eq!(handle.active_connections(), 0);

    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_idle_close_never_drains() {
    let (driver, addr, queue) = start(EndpointConfig::new("idle", get_test_addr()));
    let handle = driver.handle();

    let mut client = TcpStream::connect(addr).unwrap();
    let conn = recv(&queue);
    assert_eq!(conn.bytes_received(), 0);
    handle.submit_for_close(conn);

    // The server closes straight away: the client sees EOF.
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).unwrap(), 0);

    assert!(wait_for(Duration::from_secs(5), || handle.stats().sockets_closed == 1));
    let stats = handle.stats();
    assert_eq!(stats.released_direct, 1);
    assert_eq!(stats.drain_started, 0);

    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_drain_bounded_by_timeout() {
    let drain_timeout = Duration::from_millis(200);
    let (driver, addr, queue) = start(
        EndpointConfig::new("slow", get_test_addr()).drain_timeout(drain_timeout),
    );
    let handle = driver.handle();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"request").unwrap();

    let mut conn = recv(&queue);
    let mut buf = [0u8; 1];
    conn.read(&mut buf).unwrap();

    // The client never closes, so only the deadline can end the drain.
    let submitted = Instant::now();
    handle.submit_for_close(conn);
    assert!(wait_for(Duration::from_secs(5), || handle.stats().drain_timed_out == 1));
    let elapsed = submitted.elapsed();

    assert!(elapsed >= drain_timeout - Duration::from_millis(20), "{elapsed:?}");
    assert!(elapsed < drain_timeout + Duration::from_secs(1), "{elapsed:?}");
    assert_eq!(handle.stats().draining(), 0);

    drop(client);
    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_peer_close_ends_drain_early() {
    let (driver, addr, queue) = start(
        EndpointConfig::new("quick", get_test_addr()).drain_timeout(Duration::from_secs(30)),
    );
    let handle = driver.handle();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"request plus trailing bytes").unwrap();

    let mut conn = recv(&queue);
    let mut buf = [0u8; 7];
    conn.read(&mut buf).unwrap();
    let submitted = Instant::now();
    handle.submit_for_close(conn);

    // Half-close from the server shows up as EOF; then the client closes.
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).unwrap();
    drop(client);

    assert!(wait_for(Duration::from_secs(5), || handle.stats().drain_peer_closed == 1));
    assert!(submitted.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.stats().drain_timed_out, 0);

    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_shutdown_stops_accepting_but_finishes_work() {
    let (driver, addr, queue) = start(
        EndpointConfig::new("main", get_test_addr()).drain_timeout(Duration::from_millis(300)),
    );
    let handle = driver.handle();

    // One connection draining, one still with the service layer.
    let mut draining_client = TcpStream::connect(addr).unwrap();
    draining_client.write_all(b"x").unwrap();
    let mut conn = recv(&queue);
    let mut buf = [0u8; 1];
    conn.read(&mut buf).unwrap();
    handle.submit_for_close(conn);
    assert!(wait_for(Duration::from_secs(5), || handle.stats().drain_started == 1));

    let _active_client = TcpStream::connect(addr).unwrap();
    let active = recv(&queue);

    driver.shutdown();
    assert!(handle.is_shutdown());
    assert!(wait_for(Duration::from_secs(5), || handle.phase() == Phase::Draining));
    assert!(TcpStream::connect(addr).is_err());

    // The drain still runs to its deadline.
    assert!(wait_for(Duration::from_secs(5), || handle.stats().drain_finished() == 1));

    // The acceptor waits for the admitted connection.
    thread::sleep(Duration::from_millis(100));
    assert!(!driver.is_finished());
    assert_eq!(handle.active_connections(), 1);

    handle.submit_for_close(active);
    driver.join().unwrap();
    assert_eq!(handle.phase(), Phase::Terminated);

    let stats = handle.stats();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.sockets_closed, 2);
    drop(draining_client);
}

#[test]
fn test_dropped_connection_releases_lease() {
    let (driver, addr, queue) = start(EndpointConfig::new("drop", get_test_addr()));
    let handle = driver.handle();

    let _client = TcpStream::connect(addr).unwrap();
    let conn = recv(&queue);
    assert_eq!(handle.active_connections(), 1);

    driver.shutdown();
    thread::sleep(Duration::from_millis(50));
    assert!(!driver.is_finished());

    drop(conn);
    assert_eq!(handle.active_connections(), 0);
    driver.join().unwrap();
}

/// One endpoint with backlog 5 and an admission function that refuses the
/// first offer. Three concurrent clients must all be admitted, with never
/// more than one held, within two retry intervals.
#[test]
fn test_backpressure_scenario() {
    let retry = Duration::from_millis(100);
    let (tx, admitted) = crossbeam_channel::unbounded();
    let mut offers = 0usize;
    let admission = move |conn: Connection| {
        offers += 1;
        if offers == 1 {
            return Err(conn);
        }
        tx.send(conn).map_err(|e| e.into_inner())
    };

    let config = DriverConfig::new()
        .endpoint(EndpointConfig::new("bp", get_test_addr()).backlog(5))
        .admission_retry(Some(retry));
    let driver = Driver::spawn(config, admission).unwrap();
    let addr = driver.local_addrs()[0].1;

    let start = Instant::now();
    let clients: Vec<_> = (0..3)
        .map(|_| thread::spawn(move || TcpStream::connect(addr).unwrap()))
        .collect();

    let mut conns = Vec::new();
    for _ in 0..3 {
        conns.push(admitted.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    let elapsed = start.elapsed();

    let stats = driver.stats();
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.admitted, 3);
    assert_eq!(stats.admission_refused, 1);
    assert_eq!(stats.max_held, 1);
    assert_eq!(stats.held, 0);
    assert!(elapsed < 2 * retry + Duration::from_millis(300), "{elapsed:?}");

    let _clients: Vec<TcpStream> = clients.into_iter().map(|c| c.join().unwrap()).collect();
    let handle = driver.handle();
    for conn in conns {
        handle.submit_for_close(conn);
    }
    driver.shutdown();
    driver.join().unwrap();
}

/// A held connection is admitted promptly on a capacity signal even without
/// a retry timer.
#[test]
fn test_notify_ready_retries_held() {
    let open = Arc::new(AtomicBool::new(false));
    let (tx, admitted) = crossbeam_channel::unbounded();
    let gate = open.clone();
    let admission = move |conn: Connection| {
        if !gate.load(Ordering::SeqCst) {
            return Err(conn);
        }
        tx.send(conn).map_err(|e| e.into_inner())
    };

    let config = DriverConfig::new()
        .endpoint(EndpointConfig::new("gated", get_test_addr()))
        .admission_retry(None);
    let driver = Driver::spawn(config, admission).unwrap();
    let handle = driver.handle();
    let addr = driver.local_addrs()[0].1;

    let _client = TcpStream::connect(addr).unwrap();
    assert!(wait_for(Duration::from_secs(5), || handle.stats().held == 1));
    assert!(admitted.recv_timeout(Duration::from_millis(200)).is_err());

    open.store(true, Ordering::SeqCst);
    handle.notify_ready();
    let conn = admitted.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(handle.stats().held, 0);

    handle.submit_for_close(conn);
    driver.shutdown();
    driver.join().unwrap();
}

/// Both endpoints have connections queued when the held connection is
/// admitted. Accepts then alternate between them.
#[test]
fn test_round_robin_across_endpoints() {
    let open = Arc::new(AtomicBool::new(false));
    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, admitted) = crossbeam_channel::unbounded();

    let gate = open.clone();
    let seen = order.clone();
    let admission = move |conn: Connection| {
        if !gate.load(Ordering::SeqCst) {
            return Err(conn);
        }
        seen.lock().unwrap().push(conn.endpoint_name().to_string());
        tx.send(conn).map_err(|e| e.into_inner())
    };

    let config = DriverConfig::new()
        .endpoint(EndpointConfig::new("a", get_test_addr()))
        .endpoint(EndpointConfig::new("b", get_test_addr()))
        .admission_retry(None);
    let driver = Driver::spawn(config, admission).unwrap();
    let handle = driver.handle();
    let addr_a = driver.local_addr("a").unwrap();
    let addr_b = driver.local_addr("b").unwrap();

    let mut clients = vec![TcpStream::connect(addr_a).unwrap()];
    assert!(wait_for(Duration::from_secs(5), || handle.stats().held == 1));

    // Listeners are paused; these wait in the backlogs.
    for _ in 0..8 {
        clients.push(TcpStream::connect(addr_a).unwrap());
        clients.push(TcpStream::connect(addr_b).unwrap());
    }

    open.store(true, Ordering::SeqCst);
    handle.notify_ready();

    let mut conns = Vec::new();
    for _ in 0..17 {
        conns.push(admitted.recv_timeout(Duration::from_secs(5)).unwrap());
    }

    let order = order.lock().unwrap().clone();
    let (mut a, mut b) = (0usize, 0usize);
    for name in &order {
        match name.as_str() {
            "a" => a += 1,
            _ => b += 1,
        }
        assert!(a.abs_diff(b) <= 1, "unfair order: {order:?}");
    }
    assert_eq!((a, b), (9, 8));

    for conn in conns {
        handle.submit_for_close(conn);
    }
    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_bind_failure_leaves_other_endpoints_up() {
    let taken = TcpListener::bind(get_test_addr()).unwrap();

    let (admission, queue) = QueueAdmission::bounded(4);
    let config = DriverConfig::new()
        .endpoint(EndpointConfig::new("taken", taken.local_addr().unwrap()))
        .endpoint(EndpointConfig::new("free", get_test_addr()));
    let driver = Driver::spawn(config, admission).unwrap();

    assert_eq!(driver.local_addrs().len(), 1);
    assert!(driver.local_addr("taken").is_none());
    let addr = driver.local_addr("free").unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    let conn = recv(&queue);
    assert_eq!(conn.endpoint_name(), "free");

    driver.handle().submit_for_close(conn);
    driver.shutdown();
    driver.join().unwrap();
}

#[test]
fn test_spawn_fails_when_no_endpoint_binds() {
    let taken = TcpListener::bind(get_test_addr()).unwrap();

    let (admission, _queue) = QueueAdmission::bounded(4);
    let config =
        DriverConfig::new().endpoint(EndpointConfig::new("taken", taken.local_addr().unwrap()));
    let err = Driver::spawn(config, admission).err().unwrap();
    assert!(matches!(err, Error::Bind { .. }));
}

#[test]
fn test_spawn_rejects_invalid_config() {
    let (admission, _queue) = QueueAdmission::bounded(4);
    let err = Driver::spawn(DriverConfig::new(), admission).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_keep_alive_detach() {
    let (driver, addr, queue) = start(EndpointConfig::new("ka", get_test_addr()));
    let handle = driver.handle();

    let mut client = TcpStream::connect(addr).unwrap();
    let mut conn = recv(&queue);

    for round in 0..3u8 {
        client.write_all(&[round]).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(conn.read(&mut buf).unwrap(), 1);
        conn.write_all(&buf).unwrap();
        assert_eq!(conn.bytes_received(), 1);
        conn.detach();
        assert_eq!(conn.bytes_received(), 0);

        let mut reply = [0u8; 1];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply[0], round);
    }

    // Nothing received since the last detach: no drain.
    handle.submit_for_close(conn);
    assert!(wait_for(Duration::from_secs(5), || handle.stats().sockets_closed == 1));
    assert_eq!(handle.stats().drain_started, 0);

    driver.shutdown();
    driver.join().unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn test_accept_async_waits_for_data() {
    let endpoint = EndpointConfig::new("defer", get_test_addr())
        .io_timeout(Duration::from_secs(5))
        .accept_async(true);
    let (driver, addr, queue) = start(endpoint);
    let handle = driver.handle();
    assert!(wait_for(Duration::from_secs(5), || handle.phase() == Phase::Running));

    // Connected but silent: the kernel keeps it out of the accept queue.
    let mut client = TcpStream::connect(addr).unwrap();
    assert!(queue.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(handle.stats().accepted, 0);

    client.write_all(b"x").unwrap();
    let mut conn = recv(&queue);
    assert_eq!(conn.endpoint_name(), "defer");

    let mut buf = [0u8; 8];
    assert_eq!(conn.read(&mut buf).unwrap(), 1);
    assert_eq!(buf[0], b'x');
    assert_eq!(conn.bytes_received(), 1);
    assert_eq!(handle.stats().accepted, 1);

    handle.submit_for_close(conn);
    drop(client);
    driver.shutdown();
    driver.join().unwrap();
}

#[cfg(not(target_os = "linux"))]
#[test]
fn test_accept_async_starts() {
    let endpoint = EndpointConfig::new("defer", get_test_addr()).accept_async(true);
    let (driver, _addr, _queue) = start(endpoint);
    driver.shutdown();
    driver.join().unwrap();
}
