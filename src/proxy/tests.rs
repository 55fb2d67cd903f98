use super::*;
use crate::config;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream as StdTcpStream};
use std::thread;

fn core() -> ProxyCore {
    ProxyCore::new(CoreOptions {
        worker_threads: 1,
        shutdown_grace: Duration::from_millis(200),
        ..CoreOptions::default()
    })
}

fn build(json: &str) -> CoreConfig {
    config::from_str(json).expect("test config builds")
}

fn local_config(protocol: &str, outbound: &str) -> CoreConfig {
    build(&format!(
        r#"{{
            "inbounds": [{{"port": 0, "listen": "127.0.0.1", "protocol": "{protocol}"}}],
            "outbounds": [{{"protocol": "{outbound}"}}]
        }}"#
    ))
}

/// Echo server answering a single connection.
fn spawn_echo() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind echo");
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 1024];
            while let Ok(read) = stream.read(&mut buf) {
                if read == 0 || stream.write_all(&buf[..read]).is_err() {
                    break;
                }
            }
        }
    });
    addr
}

fn connect(addr: SocketAddr) -> StdTcpStream {
    let stream = StdTcpStream::connect(addr).expect("connect to inbound");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

#[test]
fn create_requires_an_outbound() {
    let config = build(r#"{"inbounds":[{"port":0,"protocol":"http"}]}"#);
    assert!(matches!(core().create(config), Err(EngineError::NoOutbound)));
}

#[test]
fn create_rejects_duplicate_tags() {
    let config = build(
        r#"{
            "inbounds": [
                {"port": 0, "protocol": "http", "tag": "in"},
                {"port": 0, "protocol": "socks", "tag": "in"}
            ],
            "outbounds": [{"protocol": "freedom"}]
        }"#,
    );
    match core().create(config) {
        Err(EngineError::DuplicateTag(tag)) => assert_eq!(tag, "in"),
        other => panic!("expected duplicate tag, got {:?}", other.err()),
    }
}

#[test]
fn start_and_close_release_the_port() {
    let mut instance = core()
        .create(local_config("socks", "freedom"))
        .expect("instance");
    assert!(instance.local_addrs().is_empty());
    instance.start().expect("start");
    let addr = instance.local_addrs()[0];
    assert_ne!(addr.port(), 0);
    assert!(matches!(instance.start(), Err(EngineError::AlreadyStarted)));

    instance.close().expect("close");
    assert!(instance.local_addrs().is_empty());
    assert!(matches!(instance.close(), Err(EngineError::Closed)));
    assert!(matches!(instance.start(), Err(EngineError::Closed)));

    let rebound = std::net::TcpListener::bind(addr);
    assert!(rebound.is_ok(), "port should be free after close");
}

#[test]
fn close_from_async_context_releases_the_port() {
    let mut instance = core()
        .create(local_config("http", "freedom"))
        .expect("instance");
    instance.start().expect("start");
    let addr = instance.local_addrs()[0];

    let host = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("host runtime");
    host.block_on(async { instance.close() }).expect("close inside a runtime");
    drop(instance);

    assert!(std::net::TcpListener::bind(addr).is_ok());
}

#[test]
fn start_fails_on_busy_port() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let config = build(&format!(
        r#"{{
            "inbounds": [{{"port": {port}, "listen": "127.0.0.1", "protocol": "http"}}],
            "outbounds": [{{"protocol": "freedom"}}]
        }}"#
    ));
    let mut instance = core().create(config).expect("instance");
    match instance.start() {
        Err(EngineError::Listen { addr, .. }) => assert_eq!(addr.port(), port),
        other => panic!("expected listen failure, got {other:?}"),
    }
    assert!(instance.local_addrs().is_empty());
}

#[test]
fn socks_inbound_relays_through_freedom() {
    let echo = spawn_echo();
    let mut instance = core()
        .create(local_config("socks", "freedom"))
        .expect("instance");
    instance.start().expect("start");
    let mut client = connect(instance.local_addrs()[0]);

    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let ip = match echo.ip() {
        std::net::IpAddr::V4(ip) => ip.octets(),
        std::net::IpAddr::V6(_) => unreachable!("echo binds IPv4"),
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&ip);
    request.extend_from_slice(&echo.port().to_be_bytes());
    client.write_all(&request).unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply[1], socks::REPLY_SUCCEEDED);

    client.write_all(b"ping").unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"ping");

    let _ = client.shutdown(Shutdown::Both);
    instance.close().expect("close");
}

#[test]
fn http_connect_relays_through_freedom() {
    let echo = spawn_echo();
    let mut instance = core()
        .create(local_config("http", "freedom"))
        .expect("instance");
    instance.start().expect("start");
    let mut client = connect(instance.local_addrs()[0]);

    write!(client, "CONNECT {echo} HTTP/1.1\r\nHost: {echo}\r\n\r\n").unwrap();
    let mut status = vec![0u8; http::TUNNEL_ESTABLISHED.len()];
    client.read_exact(&mut status).unwrap();
    assert_eq!(status, http::TUNNEL_ESTABLISHED);

    client.write_all(b"over the tunnel").unwrap();
    let mut echoed = [0u8; 15];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"over the tunnel");

    instance.close().expect("close");
}

#[test]
fn dokodemo_forwards_to_fixed_destination() {
    let echo = spawn_echo();
    let config = build(&format!(
        r#"{{
            "inbounds": [{{"port": 0, "listen": "127.0.0.1", "protocol": "dokodemo-door",
                "settings": {{"address": "127.0.0.1", "port": {}}}}}],
            "outbounds": [{{"protocol": "freedom"}}]
        }}"#,
        echo.port()
    ));
    let mut instance = core().create(config).expect("instance");
    instance.start().expect("start");
    let mut client = connect(instance.local_addrs()[0]);

    client.write_all(b"direct").unwrap();
    let mut echoed = [0u8; 6];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(&echoed, b"direct");

    instance.close().expect("close");
}

#[test]
fn blackhole_answers_then_closes() {
    let mut instance = core()
        .create(local_config("socks", "blackhole"))
        .expect("instance");
    instance.start().expect("start");
    let mut client = connect(instance.local_addrs()[0]);

    client.write_all(&[0x05, 0x01, 0x00]).unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).unwrap();
    client
        .write_all(&[0x05, 0x01, 0x00, 0x01, 192, 0, 2, 1, 0, 80])
        .unwrap();
    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).unwrap();
    assert_eq!(reply[1], socks::REPLY_SUCCEEDED);

    let mut rest = Vec::new();
    let read = client.read_to_end(&mut rest).expect("orderly close");
    assert_eq!(read, 0);

    instance.close().expect("close");
}

#[test]
fn target_parsing_handles_brackets_and_defaults() {
    assert_eq!(
        Target::parse("example.com", 443),
        Some(Target::new("example.com", 443))
    );
    assert_eq!(
        Target::parse("[2001:db8::1]:8443", 443),
        Some(Target::new("2001:db8::1", 8443))
    );
    assert_eq!(Target::parse("2001:db8::1", 443), None);
    assert_eq!(Target::parse(":80", 443), None);
    assert_eq!(Target::parse("host:0", 443), None);
    assert_eq!(Target::new("::1", 53).to_string(), "[::1]:53");
    assert_eq!(Target::new("a.b", 53).to_string(), "a.b:53");
}
