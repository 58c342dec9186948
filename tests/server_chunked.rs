use hearth_http::config::ServerConfig;
use hearth_http::error::ConnectionStatus;
use hearth_http::http::{HttpRequest, HttpResponse};
use hearth_http::router::UrlRouter;
use hearth_http::server::Server;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn loopback_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.ports = vec![0];
    config.server_name = "localhost".to_string();
    config
}

fn echo_body_handler(req: &mut HttpRequest, res: &mut HttpResponse) -> ConnectionStatus {
    res.set_body(req.body.clone(), "text/plain");
    ConnectionStatus::Processed
}

#[test]
fn test_server_assembles_a_chunked_upload_body() {
    let mut router = UrlRouter::new();
    router.add("/upload", echo_body_handler);

    let mut server = Server::new(vec![loopback_config()], Arc::new(router)).unwrap();
    let addr = server.local_addrs()[0];
    thread::spawn(move || server.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(addr).expect("failed to connect to test server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let headers = "POST /upload HTTP/1.1\r\n\
                   Host: localhost\r\n\
                   Transfer-Encoding: chunked\r\n\
                   Content-Type: text/plain\r\n\r\n";
    stream.write_all(headers.as_bytes()).unwrap();

    // Two chunks, split across separate writes to exercise the fragmented path.
    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"0\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).expect("failed to read response from server");
    let response = String::from_utf8_lossy(&buffer[..n]);

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("Hello World!"));
}

#[test]
fn test_pipelined_requests_are_answered_in_order_on_one_connection() {
    let mut router = UrlRouter::new();
    router.add_static("/", b"Hello".to_vec(), 200);

    let mut server = Server::new(vec![loopback_config()], Arc::new(router)).unwrap();
    let addr = server.local_addrs()[0];
    thread::spawn(move || server.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipeline_data = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n\
                         GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
    stream.write_all(pipeline_data.as_bytes()).unwrap();

    let mut collected = Vec::new();
    let mut buffer = [0u8; 4096];
    // Both responses may arrive as one read or two; keep reading until we've
    // seen two status lines.
    while collected.iter().filter(|&&b| b == b'\n').count() < 4 {
        let n = stream.read(&mut buffer).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&buffer[..n]);
    }
    let combined = String::from_utf8_lossy(&collected);
    assert_eq!(combined.matches("HTTP/1.1 200 OK").count(), 2);
}

#[test]
fn test_streaming_chunked_upload_tolerates_size_and_data_split_across_writes() {
    let mut router = UrlRouter::new();
    router.add("/upload", echo_body_handler);

    let mut server = Server::new(vec![loopback_config()], Arc::new(router)).unwrap();
    let addr = server.local_addrs()[0];
    thread::spawn(move || server.run().unwrap());
    thread::sleep(Duration::from_millis(100));

    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let headers = "POST /upload HTTP/1.1\r\n\
                   Host: localhost\r\n\
                   Transfer-Encoding: chunked\r\n\
                   Content-Type: text/plain\r\n\r\n";
    stream.write_all(headers.as_bytes()).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));

    // Split the chunk size line, the data, and the terminator each across
    // their own writes to make sure the parser resumes correctly mid-chunk.
    stream.write_all(b"B\r\n").unwrap(); // hex B = 11 bytes
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));

    stream.write_all(b"Rust Stream").unwrap();
    stream.write_all(b"\r\n").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));

    stream.write_all(b"0\r\n").unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    stream.write_all(b"\r\n").unwrap();
    stream.flush().unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).expect("failed to read response from server");
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.ends_with("Rust Stream"));
}
