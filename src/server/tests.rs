//! Tests for the HTTP server implementation.

#[cfg(test)]
mod expiry_tests {
    use std::time::{Duration, Instant};

    use crate::server::ExpiryList;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn order(list: &ExpiryList<u32>) -> Vec<u32> {
        list.iter().map(|(_, _, data)| *data).collect()
    }

    fn assert_sorted(list: &ExpiryList<u32>) {
        let deadlines: Vec<Instant> = list.iter().map(|(_, deadline, _)| deadline).collect();
        assert!(deadlines.windows(2).all(|w| w[0] <= w[1]), "list out of order");
        assert_eq!(deadlines.len(), list.len());
    }

    #[test]
    fn test_sweep_removes_in_deadline_order() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        list.attach_at(3, base + secs(3));
        list.attach_at(1, base + secs(1));
        list.attach_at(2, base + secs(2));
        assert_eq!(order(&list), vec![1, 2, 3]);
        assert_eq!(list.next_deadline(), Some(base + secs(1)));

        // Deadlines equal to `now` expire
        let mut expired = Vec::new();
        let count = list.sweep(base + secs(2), |data| expired.push(data));
        assert_eq!(count, 2);
        assert_eq!(expired, vec![1, 2]);
        assert_eq!(order(&list), vec![3]);

        assert_eq!(list.sweep(base, |_| panic!("nothing is due")), 0);
    }

    #[test]
    fn test_equal_deadlines_keep_insertion_order() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        let deadline = base + secs(5);
        list.attach_at(1, deadline);
        list.attach_at(2, deadline);
        list.attach_at(3, base + secs(1));
        list.attach_at(4, deadline);
        assert_eq!(order(&list), vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_refresh_moves_entry_later() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        let a = list.attach_at(1, base + secs(1));
        list.attach_at(2, base + secs(2));
        list.attach_at(3, base + secs(3));

        // Past its successor
        assert!(list.refresh_at(a, base + secs(10)));
        assert_eq!(order(&list), vec![2, 3, 1]);
        assert_eq!(list.deadline(a), Some(base + secs(10)));

        // Tail stays the tail
        assert!(list.refresh_at(a, base + secs(20)));
        assert_eq!(order(&list), vec![2, 3, 1]);
        assert_sorted(&list);
    }

    #[test]
    fn test_refresh_to_equal_deadline_goes_after_peer() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        let a = list.attach_at(1, base + secs(1));
        list.attach_at(2, base + secs(2));
        list.refresh_at(a, base + secs(2));
        assert_eq!(order(&list), vec![2, 1]);
    }

    #[test]
    fn test_refresh_earlier_than_predecessor_rescans() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        list.attach_at(1, base + secs(2));
        list.attach_at(2, base + secs(4));
        let c = list.attach_at(3, base + secs(6));

        assert!(list.refresh_at(c, base + secs(1)));
        assert_eq!(order(&list), vec![3, 1, 2]);

        assert!(list.refresh_at(c, base + secs(3)));
        assert_eq!(order(&list), vec![1, 3, 2]);
        assert_sorted(&list);
    }

    #[test]
    fn test_stale_ids_are_ignored() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        let a = list.attach_at(1, base + secs(1));
        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(a), None);
        assert!(!list.refresh_at(a, base + secs(5)));
        assert!(list.is_empty());

        // The slot is reused, but the old id must not reach the new entry
        let b = list.attach_at(2, base + secs(2));
        assert_ne!(a, b);
        assert_eq!(list.remove(a), None);
        assert_eq!(list.len(), 1);

        list.sweep(base + secs(2), |_| {});
        assert_eq!(list.deadline(b), None);
        assert!(!list.refresh_at(b, base + secs(9)));
    }

    #[test]
    fn test_random_operations_keep_list_sorted() {
        let base = Instant::now();
        let mut list = ExpiryList::new();
        let mut live = Vec::new();

        // Small LCG so the run is reproducible
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            seed >> 33
        };

        for step in 0..2000u32 {
            match next() % 4 {
                0 | 1 => live.push(list.attach_at(step, base + secs(next() % 50))),
                2 if !live.is_empty() => {
                    let id = live[(next() as usize) % live.len()];
                    list.refresh_at(id, base + secs(next() % 50));
                }
                3 if !live.is_empty() => {
                    let id = live.swap_remove((next() as usize) % live.len());
                    assert!(list.remove(id).is_some());
                }
                _ => {}
            }
            assert_sorted(&list);
            assert_eq!(list.len(), live.len());
        }

        let now = base + secs(25);
        list.sweep(now, |_| {});
        assert!(list.iter().all(|(_, deadline, _)| deadline > now));
    }
}

#[cfg(test)]
mod pool_tests {
    use std::sync::mpsc::{self, Sender};
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::server::{Error, Process, SubmitError, WorkerPool};

    struct Square(u64);

    impl Process for Square {
        type Output = u64;

        fn process(&mut self) -> u64 {
            self.0 * self.0
        }
    }

    /// Blocks its worker until the gate opens.
    struct Gated {
        id: u32,
        gate: Arc<(Mutex<bool>, Condvar)>,
        started: Sender<u32>,
    }

    impl Process for Gated {
        type Output = ();

        fn process(&mut self) {
            let _ = self.started.send(self.id);
            let (open, cvar) = &*self.gate;
            let mut open = open.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
        }
    }

    fn open_gate(gate: &Arc<(Mutex<bool>, Condvar)>) {
        let (open, cvar) = &**gate;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    #[test]
    fn test_pool_processes_items() {
        let (tx, rx) = mpsc::channel();
        let pool = WorkerPool::new(4, 100, move |item: Square, output: u64| {
            tx.send((item.0, output)).unwrap();
        })
        .unwrap();
        assert_eq!(pool.threads(), 4);
        assert_eq!(pool.capacity(), 100);

        for n in 0..20 {
            pool.submit(Square(n)).unwrap();
        }

        let mut results: Vec<(u64, u64)> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        results.sort();
        for (n, (input, output)) in results.into_iter().enumerate() {
            assert_eq!(input, n as u64);
            assert_eq!(output, input * input);
        }
    }

    #[test]
    fn test_pool_rejects_when_full() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let pool = WorkerPool::new(1, 1, move |item: Gated, _: ()| {
            done_tx.send(item.id).unwrap();
        })
        .unwrap();

        let job = |id| Gated {
            id,
            gate: Arc::clone(&gate),
            started: started_tx.clone(),
        };

        // Occupy the only worker, then fill the queue
        pool.submit(job(1)).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        pool.submit(job(2)).unwrap();
        assert_eq!(pool.len(), 1);

        // The rejected item comes back intact
        match pool.submit(job(3)) {
            Err(SubmitError::Full(item)) => assert_eq!(item.id, 3),
            other => panic!("expected a full queue, got {other:?}"),
        }

        open_gate(&gate);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }

    #[test]
    fn test_shutdown_returns_unstarted_items() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let mut pool = WorkerPool::new(1, 4, move |item: Gated, _: ()| {
            done_tx.send(item.id).unwrap();
        })
        .unwrap();

        let job = |id| Gated {
            id,
            gate: Arc::clone(&gate),
            started: started_tx.clone(),
        };
        pool.submit(job(1)).unwrap();
        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        pool.submit(job(2)).unwrap();
        pool.submit(job(3)).unwrap();

        // Let the in-flight item finish while shutdown waits for it
        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                open_gate(&gate);
            })
        };
        let pending: Vec<u32> = pool.shutdown().into_iter().map(|item| item.id).collect();
        opener.join().unwrap();

        assert_eq!(pending, vec![2, 3]);
        assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        assert!(done_rx.try_recv().is_err());

        match pool.submit(job(4)) {
            Err(SubmitError::Stopped(item)) => assert_eq!(item.id, 4),
            other => panic!("expected a stopped pool, got {other:?}"),
        }
    }

    #[test]
    fn test_pool_rejects_zero_sizes() {
        let result = WorkerPool::new(0, 10, |_: Square, _: u64| {});
        assert!(matches!(result, Err(Error::PoolError(_))));

        let result = WorkerPool::new(2, 0, |_: Square, _: u64| {});
        assert!(matches!(result, Err(Error::PoolError(_))));
    }
}

#[cfg(test)]
mod response_tests {
    use std::fs;
    use std::path::Path;

    use crate::server::{Error, HttpResponse, MappedFile, ServerConfig, StatusCode, resolve_path};

    #[test]
    fn test_file_response_head() {
        let mut buf = [0u8; 1024];
        let len = HttpResponse::file(100)
            .with_keep_alive(true)
            .write_head(&mut buf)
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..len]).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\nContent-Type: text/html\r\n\
             Connection: keep-alive\r\n\r\n"
        );
    }

    #[test]
    fn test_error_response_carries_form() {
        let mut buf = [0u8; 1024];
        let len = HttpResponse::new(StatusCode::NotFound)
            .write_to(&mut buf)
            .unwrap();
        let text = std::str::from_utf8(&buf[..len]).unwrap();
        let form = StatusCode::NotFound.form();

        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains(&format!("Content-Length: {}\r\n", form.len())));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(&format!("\r\n\r\n{form}")));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::Ok.code(), 200);
        assert_eq!(StatusCode::Forbidden.code(), 403);
        assert_eq!(StatusCode::InternalServerError.reason_phrase(), "Internal Server Error");
        assert!(StatusCode::Ok.form().is_empty());
        assert!(!StatusCode::BadRequest.form().is_empty());
    }

    #[test]
    fn test_response_too_large_for_buffer() {
        let mut buf = [0u8; 16];
        let result = HttpResponse::new(StatusCode::BadRequest).write_to(&mut buf);
        assert!(matches!(result, Err(Error::WriteBufferFull(16))));

        // Head fits, canned body does not
        let mut buf = [0u8; 100];
        let result = HttpResponse::new(StatusCode::BadRequest).write_to(&mut buf);
        assert!(matches!(result, Err(Error::WriteBufferFull(100))));
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/srv/www");
        assert_eq!(
            resolve_path(root, "/index.html").unwrap(),
            Path::new("/srv/www/index.html")
        );
        assert_eq!(
            resolve_path(root, "/a/./b.html?x=1#top").unwrap(),
            Path::new("/srv/www/a/b.html")
        );
        assert_eq!(resolve_path(root, "/").unwrap(), root);
        assert_eq!(resolve_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_path(root, "/a/../../b"), None);
    }

    #[test]
    fn test_empty_file_maps_to_empty_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.html");
        fs::write(&path, b"").unwrap();

        let file = MappedFile::open(&path).unwrap();
        assert!(file.is_empty());
        assert_eq!(file.as_bytes(), b"");

        let path = dir.path().join("page.html");
        fs::write(&path, b"<p>hi</p>").unwrap();
        assert_eq!(MappedFile::open(&path).unwrap().as_bytes(), b"<p>hi</p>");
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config = ServerConfig::default();
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.max_requests, 10_000);
        assert_eq!(config.max_connections, 65_535);
        assert_eq!(config.idle_timeout().as_secs(), 15);
        assert!(config.validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        fs::write(&path, r#"{ "addr": "127.0.0.1:9000", "worker_threads": 2 }"#).unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.read_buffer_size, 2048);

        let config = ServerConfig {
            max_events: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}

#[cfg(test)]
mod connection_tests {
    use std::fs;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::server::{Connection, ProcessOutcome, ReadOutcome, StatusCode, WriteOutcome};

    fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, server, peer)
    }

    fn doc_root() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("index.html");
        fs::write(&index, vec![b'a'; 100]).unwrap();
        fs::set_permissions(&index, fs::Permissions::from_mode(0o644)).unwrap();
        dir
    }

    fn connection(dir: &TempDir) -> (TcpStream, Connection) {
        let (client, server, peer) = socket_pair();
        let mut conn = Connection::new(Arc::from(dir.path()), 2048, 1024);
        conn.init(server, peer);
        (client, conn)
    }

    /// Reads until at least `expected` bytes are buffered.
    fn read_at_least(conn: &mut Connection, expected: usize) {
        for _ in 0..200 {
            match conn.read() {
                ReadOutcome::Ready if conn.read_idx() >= expected => return,
                ReadOutcome::Ready => thread::sleep(Duration::from_millis(5)),
                other => panic!("unexpected read outcome: {other:?}"),
            }
        }
        panic!("only {} of {expected} bytes arrived", conn.read_idx());
    }

    fn request(conn: &mut Connection, client: &mut TcpStream, raw: &[u8]) -> ProcessOutcome {
        client.write_all(raw).unwrap();
        read_at_least(conn, raw.len());
        conn.process()
    }

    fn status_of(dir: &TempDir, target: &str) -> ProcessOutcome {
        let (mut client, mut conn) = connection(dir);
        let raw = format!("GET {target} HTTP/1.1\r\nHost: test\r\n\r\n");
        request(&mut conn, &mut client, raw.as_bytes())
    }

    #[test]
    fn test_connection_serves_file() {
        let dir = doc_root();
        let (mut client, mut conn) = connection(&dir);

        // Process a keep-alive request
        let outcome = request(
            &mut conn,
            &mut client,
            b"GET /index.html HTTP/1.1\r\nHost: test\r\nConnection: keep-alive\r\n\r\n",
        );
        assert!(matches!(outcome, ProcessOutcome::Respond(StatusCode::Ok)));
        assert!(conn.has_mapping());
        assert_eq!(conn.file_stat().unwrap().size, 100);
        assert_eq!(conn.real_file(), dir.path().join("index.html"));

        // Write it out and check the connection is ready for the next request
        let total = conn.bytes_to_send();
        assert!(matches!(conn.write(), WriteOutcome::KeepAlive));
        assert!(!conn.has_mapping());
        assert_eq!(conn.read_idx(), 0);
        assert!(conn.is_open());

        let mut response = vec![0u8; total];
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.read_exact(&mut response).unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with(&"a".repeat(100)));
    }

    #[test]
    fn test_connection_without_keep_alive_closes() {
        let dir = doc_root();
        let (mut client, mut conn) = connection(&dir);
        let outcome = request(&mut conn, &mut client, b"GET /index.html HTTP/1.1\r\n\r\n");
        assert!(matches!(outcome, ProcessOutcome::Respond(StatusCode::Ok)));
        assert!(matches!(conn.write(), WriteOutcome::Close));
        assert!(!conn.has_mapping());
    }

    #[test]
    fn test_connection_status_codes() {
        let dir = doc_root();

        let private = dir.path().join("private.html");
        fs::write(&private, b"secret").unwrap();
        fs::set_permissions(&private, fs::Permissions::from_mode(0o600)).unwrap();

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

        let cases = [
            ("/missing.html", StatusCode::NotFound),
            ("/private.html", StatusCode::Forbidden),
            ("/sub", StatusCode::BadRequest),
            ("/../index.html", StatusCode::Forbidden),
            ("/index.html?v=2", StatusCode::Ok),
        ];
        for (target, expected) in cases {
            match status_of(&dir, target) {
                ProcessOutcome::Respond(status) => assert_eq!(status, expected, "{target}"),
                other => panic!("{target}: unexpected outcome {other:?}"),
            }
        }
    }

    #[test]
    fn test_connection_rejects_bad_request() {
        let dir = doc_root();
        let (mut client, mut conn) = connection(&dir);
        let outcome = request(&mut conn, &mut client, b"FOO / HTTP/1.1\r\n\r\n");
        assert!(matches!(outcome, ProcessOutcome::Respond(StatusCode::BadRequest)));
        assert!(!conn.has_mapping());

        let form = StatusCode::BadRequest.form();
        assert!(conn.bytes_to_send() > form.len());
        assert!(matches!(conn.write(), WriteOutcome::Close));

        let mut response = String::new();
        drop(conn);
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with(form));
    }

    #[test]
    fn test_connection_waits_for_body() {
        let dir = doc_root();
        let (mut client, mut conn) = connection(&dir);

        let head = b"GET /index.html HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
        let mut partial = head.to_vec();
        partial.extend_from_slice(b"12345");
        assert!(matches!(
            request(&mut conn, &mut client, &partial),
            ProcessOutcome::Incomplete
        ));

        client.write_all(b"67890").unwrap();
        read_at_least(&mut conn, partial.len() + 5);
        assert!(matches!(conn.process(), ProcessOutcome::Respond(StatusCode::Ok)));
    }

    #[test]
    fn test_peer_close_and_single_close() {
        let dir = doc_root();
        let (client, mut conn) = connection(&dir);
        drop(client);

        let mut closed = false;
        for _ in 0..200 {
            match conn.read() {
                ReadOutcome::PeerClosed => {
                    closed = true;
                    break;
                }
                ReadOutcome::Ready => thread::sleep(Duration::from_millis(5)),
                other => panic!("unexpected read outcome: {other:?}"),
            }
        }
        assert!(closed);

        assert!(conn.close());
        assert!(!conn.close());
        assert!(!conn.is_open());
        assert_eq!(conn.raw_fd(), None);
    }

    #[test]
    fn test_oversized_request_fills_buffer() {
        let dir = doc_root();
        let (mut client, server, peer) = socket_pair();
        let mut conn = Connection::new(Arc::from(dir.path()), 64, 1024);
        conn.init(server, peer);

        // The Host line runs past the end of a 64-byte buffer
        client
            .write_all(b"GET /index.html HTTP/1.1\r\nHost: a-very-long-host-name.example.com\r\n\r\n")
            .unwrap();
        read_at_least(&mut conn, 64);
        assert!(matches!(conn.process(), ProcessOutcome::Incomplete));
        assert!(matches!(conn.read(), ReadOutcome::BufferFull));
    }
}

#[cfg(test)]
mod server_tests {
    use std::fs;
    use std::io::{self, Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::os::unix::fs::PermissionsExt;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::server::{Error, HttpServer, ServerConfig, ServerHandle};

    struct TestServer {
        addr: SocketAddr,
        handle: ServerHandle,
        thread: Option<JoinHandle<Result<(), Error>>>,
        _root: TempDir,
    }

    impl TestServer {
        fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
            let root = tempfile::tempdir().unwrap();
            let index = root.path().join("index.html");
            fs::write(&index, vec![b'x'; 100]).unwrap();
            fs::set_permissions(&index, fs::Permissions::from_mode(0o644)).unwrap();

            let mut config = ServerConfig {
                addr: "127.0.0.1:0".parse().unwrap(),
                doc_root: root.path().to_path_buf(),
                worker_threads: 2,
                max_requests: 16,
                max_connections: 64,
                handle_signals: false,
                ..ServerConfig::default()
            };
            configure(&mut config);

            let server = HttpServer::new(config).unwrap();
            let addr = server.local_addr().unwrap();
            let handle = server.handle();
            let thread = thread::spawn(move || server.start());
            Self {
                addr,
                handle,
                thread: Some(thread),
                _root: root,
            }
        }

        fn connect(&self) -> TcpStream {
            let stream = TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream
        }

        fn stop(mut self) -> Result<(), Error> {
            self.handle.shutdown().unwrap();
            self.thread.take().unwrap().join().unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            if let Some(thread) = self.thread.take() {
                let _ = self.handle.shutdown();
                let _ = thread.join();
            }
        }
    }

    /// Reads one response, returning the head and the body.
    fn read_response(stream: &mut TcpStream) -> (String, Vec<u8>) {
        let mut data = Vec::new();
        let mut buf = [0u8; 512];
        let head_end = loop {
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before the response head");
            data.extend_from_slice(&buf[..n]);
        };

        let head = String::from_utf8(data[..head_end].to_vec()).unwrap();
        let length: usize = head
            .lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        while data.len() < head_end + length {
            let n = stream.read(&mut buf).unwrap();
            assert!(n > 0, "connection closed before the response body");
            data.extend_from_slice(&buf[..n]);
        }
        (head, data[head_end..head_end + length].to_vec())
    }

    fn assert_closed(stream: &mut TcpStream) {
        let mut buf = [0u8; 16];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
            other => panic!("expected the server to close the connection, got {other:?}"),
        }
    }

    #[test]
    fn test_serves_file_with_keep_alive() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        // Two requests over the same connection
        for _ in 0..2 {
            client
                .write_all(b"GET /index.html HTTP/1.1\r\nHost: test\r\nConnection: keep-alive\r\n\r\n")
                .unwrap();
            let (head, body) = read_response(&mut client);
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert_eq!(body, vec![b'x'; 100]);
        }

        assert!(server.stop().is_ok());
    }

    #[test]
    fn test_missing_file_closes_connection() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        client
            .write_all(b"GET /nope.html HTTP/1.1\r\nHost: test\r\n\r\n")
            .unwrap();
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert_eq!(body, b"The requested file was not found on this server.\n");
        assert_closed(&mut client);
    }

    #[test]
    fn test_unknown_method_is_bad_request() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        client.write_all(b"FOO /index.html HTTP/1.1\r\n\r\n").unwrap();
        let (head, _) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert_closed(&mut client);
    }

    #[test]
    fn test_request_split_across_writes() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        for chunk in [&b"GET /index.ht"[..], b"ml HTTP/1.1\r", b"\nHost: test\r\n", b"\r\n"] {
            client.write_all(chunk).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body.len(), 100);
    }

    #[test]
    fn test_partial_body_waits_for_rest() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        client
            .write_all(b"GET /index.html HTTP/1.1\r\nContent-Length: 10\r\n\r\n12345")
            .unwrap();

        // Nothing comes back until the declared body is complete
        client
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let mut buf = [0u8; 16];
        let err = client.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(b"67890").unwrap();
        let (head, _) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_idle_connection_is_evicted() {
        let server = TestServer::start(|config| {
            config.timeslot_secs = 1;
            config.idle_timeslots = 1;
        });
        let mut idle = server.connect();

        // Past the one second deadline, then tick the sweep by hand
        thread::sleep(Duration::from_millis(1300));
        server.handle.tick().unwrap();
        assert_closed(&mut idle);

        // The server keeps accepting after an eviction
        let mut client = server.connect();
        client.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
        let (head, _) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_connection_limit_rejects_extra_clients() {
        let server = TestServer::start(|config| config.max_connections = 1);
        let mut first = server.connect();
        thread::sleep(Duration::from_millis(100));

        let mut second = server.connect();
        assert_closed(&mut second);

        first.write_all(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
        let (head, _) = read_response(&mut first);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[test]
    fn test_shutdown_closes_open_connections() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();
        thread::sleep(Duration::from_millis(100));

        assert!(server.stop().is_ok());
        assert_closed(&mut client);
    }

    #[test]
    fn test_large_file_over_keep_alive() {
        let contents: Vec<u8> = (0..8 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        let server = TestServer::start(|config| {
            let path = config.doc_root.join("large.bin");
            fs::write(&path, &contents).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        });
        let mut client = server.connect();
        client
            .set_read_timeout(Some(Duration::from_secs(30)))
            .unwrap();

        for _ in 0..2 {
            client
                .write_all(b"GET /large.bin HTTP/1.1\r\nHost: test\r\nConnection: keep-alive\r\n\r\n")
                .unwrap();

            // Let the socket buffer fill so the server has to wait for writability
            thread::sleep(Duration::from_millis(100));
            let (head, body) = read_response(&mut client);
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(head.contains(&format!("Content-Length: {}\r\n", contents.len())));
            assert!(head.contains("Connection: keep-alive\r\n"));
            assert!(body == contents, "body differs from the file on disk");
        }

        assert!(server.stop().is_ok());
    }

    #[test]
    fn test_lowercase_request_line_is_served() {
        let server = TestServer::start(|_| {});
        let mut client = server.connect();

        client.write_all(b"get /index.html http/1.1\r\n\r\n").unwrap();
        let (head, body) = read_response(&mut client);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body.len(), 100);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            worker_threads: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(HttpServer::new(config), Err(Error::InvalidConfig(_))));
    }
}
