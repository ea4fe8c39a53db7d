#![allow(dead_code)]

pub mod test_runtime {
    use std::sync::Once;

    static MAY_INIT: Once = Once::new();

    /// Configure the coroutine runtime once per test binary.
    pub fn setup() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }
}

pub mod net {
    use std::net::TcpListener;

    /// Reserve an ephemeral port. The listener is dropped before the server
    /// binds, which is racy in theory and dependable in practice for tests.
    pub fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Send a raw HTTP/1.1 request and return the full response as a
    /// string. Reads headers, then honors Content-Length for the body.
    pub fn send_request(addr: &SocketAddr, req: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(req.as_bytes()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut buf = Vec::new();
        let mut header_end = None;
        while header_end.is_none() {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => {
                    buf.extend_from_slice(&tmp[..n]);
                    header_end = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
                }
                Err(e) => panic!("read error: {e:?}"),
            }
        }

        let header_end = header_end.unwrap_or(buf.len());
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let mut tmp = [0u8; 1024];
            match stream.read(&mut tmp) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
                Err(e) => panic!("read error: {e:?}"),
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// GET helper with optional extra headers.
    pub fn get(addr: &SocketAddr, path: &str, headers: &[(&str, &str)]) -> String {
        let mut req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n");
        for (name, value) in headers {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        req.push_str("Connection: close\r\n\r\n");
        send_request(addr, &req)
    }

    pub fn post(
        addr: &SocketAddr,
        path: &str,
        content_type: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> String {
        let mut req = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n",
            body.len()
        );
        for (name, value) in headers {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        req.push_str("Connection: close\r\n\r\n");
        req.push_str(body);
        send_request(addr, &req)
    }

    pub fn status_of(response: &str) -> u16 {
        response
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    pub fn body_of(response: &str) -> &str {
        response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or("")
    }
}

pub mod mock_backend {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Minimal HTTP/1.1 responder that answers every request with the given
    /// JSON body. Counts requests so tests can assert it was (not) hit.
    pub struct MockHttpBackend {
        pub addr: std::net::SocketAddr,
        pub hits: Arc<AtomicUsize>,
    }

    impl MockHttpBackend {
        pub fn serve_json(body: &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let hits = Arc::new(AtomicUsize::new(0));
            let hits_counter = hits.clone();
            std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    hits_counter.fetch_add(1, Ordering::SeqCst);
                    // Read until the end of headers plus any Content-Length
                    // body; enough for test traffic.
                    let mut buf = [0u8; 8192];
                    let _ = stream.read(&mut buf);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
            });
            Self { addr, hits }
        }
    }
}

pub mod registry_tree {
    use std::path::Path;

    /// Write one endpoint node into the registry tree.
    pub fn write_endpoint(base: &Path, file: &str, payload: &str) {
        let dir = base.join("gantry-endpoint");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), payload).unwrap();
    }

    /// Write one backend-service node into the registry tree.
    pub fn write_service(base: &Path, file: &str, payload: &str) {
        let dir = base.join("gantry-service");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), payload).unwrap();
    }
}

pub mod gateway {
    use gantry::config::{GatewayConfig, RegistryBackendConfig};
    use gantry::server::GatewayServer;
    use std::path::Path;
    use std::time::{Duration, Instant};

    /// Configuration pointing at a temp registry tree and an ephemeral port.
    pub fn config_for(registry_base: &Path, port: u16) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.http_server.address = "127.0.0.1".to_string();
        config.http_server.port = port;
        config.endpoint_registry.backends.insert(
            "default".to_string(),
            RegistryBackendConfig {
                address: registry_base.display().to_string(),
                ..RegistryBackendConfig::default()
            },
        );
        config
    }

    /// Wait until the routing table has at least `routes` entries.
    pub fn await_routes(gateway: &GatewayServer, routes: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while gateway.router().len() < routes {
            assert!(
                Instant::now() < deadline,
                "routing table never reached {routes} entries"
            );
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Wait until a routing key holds `versions` version slots.
    pub fn await_versions(gateway: &GatewayServer, method: &http::Method, path: &str, versions: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(matched) = gateway.router().route(method, path) {
                if matched.entry.endpoints.len() >= versions {
                    return;
                }
            }
            assert!(
                Instant::now() < deadline,
                "route {path} never reached {versions} versions"
            );
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}
