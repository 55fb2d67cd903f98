//! SOCKS5 server handshake (RFC 1928, RFC 1929). CONNECT only.

use super::{invalid_data, Reply, Request, Target};
use crate::config::Account;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const VER_SOCKS5: u8 = 0x05;
const VER_AUTH: u8 = 0x01;

const METHOD_NONE: u8 = 0x00;
const METHOD_USERNAME: u8 = 0x02;
const METHOD_INVALID: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ADDR_TYPE_IPV4: u8 = 0x01;
const ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
const ADDR_TYPE_IPV6: u8 = 0x04;

pub(crate) const REPLY_SUCCEEDED: u8 = 0x00;
pub(crate) const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Reply with an unspecified bound address.
pub(crate) fn reply(code: u8) -> [u8; 10] {
    [VER_SOCKS5, code, 0x00, ADDR_TYPE_IPV4, 0, 0, 0, 0, 0, 0]
}

pub(crate) async fn negotiate<S>(stream: &mut S, accounts: &[Account]) -> io::Result<Request>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != VER_SOCKS5 {
        return Err(invalid_data(format!(
            "unsupported SOCKS version: {}",
            greeting[0]
        )));
    }
    let mut methods = vec![0u8; usize::from(greeting[1])];
    stream.read_exact(&mut methods).await?;

    let wanted = if accounts.is_empty() {
        METHOD_NONE
    } else {
        METHOD_USERNAME
    };
    if !methods.contains(&wanted) {
        stream.write_all(&[VER_SOCKS5, METHOD_INVALID]).await?;
        return Err(invalid_data("no acceptable authentication method"));
    }
    stream.write_all(&[VER_SOCKS5, wanted]).await?;
    if wanted == METHOD_USERNAME {
        authenticate(stream, accounts).await?;
    }

    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != VER_SOCKS5 {
        return Err(invalid_data(format!(
            "unsupported SOCKS version: {}",
            request[0]
        )));
    }
    if request[1] != CMD_CONNECT {
        stream.write_all(&reply(REPLY_COMMAND_NOT_SUPPORTED)).await?;
        return Err(invalid_data(format!("unsupported command: {}", request[1])));
    }
    let host = match request[3] {
        ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ADDR_TYPE_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ADDR_TYPE_DOMAIN_NAME => {
            let len = stream.read_u8().await?;
            read_string(stream, len).await?
        }
        other => {
            stream.write_all(&reply(REPLY_ADDRESS_NOT_SUPPORTED)).await?;
            return Err(invalid_data(format!("unsupported address type: {other}")));
        }
    };
    let port = stream.read_u16().await?;

    Ok(Request {
        target: Target::new(host, port),
        reply: Reply::Socks,
        preface: Vec::new(),
    })
}

async fn authenticate<S>(stream: &mut S, accounts: &[Account]) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VER_AUTH {
        return Err(invalid_data(format!("unsupported auth version: {version}")));
    }
    let user_len = stream.read_u8().await?;
    let user = read_string(stream, user_len).await?;
    let pass_len = stream.read_u8().await?;
    let pass = read_string(stream, pass_len).await?;

    let accepted = accounts
        .iter()
        .any(|account| account.user == user && account.pass == pass);
    stream
        .write_all(&[VER_AUTH, if accepted { 0x00 } else { 0x01 }])
        .await?;
    if accepted {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("rejected credentials for {user}"),
        ))
    }
}

async fn read_string<S>(stream: &mut S, len: u8) -> io::Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut bytes = vec![0u8; usize::from(len)];
    stream.read_exact(&mut bytes).await?;
    String::from_utf8(bytes).map_err(|_| invalid_data("field is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Builder;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime")
            .block_on(future)
    }

    #[test]
    fn connect_by_domain() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(256);
            let task = tokio::spawn(async move { negotiate(&mut server, &[]).await });

            client.write_all(&[0x05, 0x01, METHOD_NONE]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [0x05, METHOD_NONE]);

            let mut request = vec![0x05, CMD_CONNECT, 0x00, ADDR_TYPE_DOMAIN_NAME, 11];
            request.extend_from_slice(b"example.com");
            request.extend_from_slice(&443u16.to_be_bytes());
            client.write_all(&request).await.unwrap();

            let parsed = task.await.unwrap().expect("handshake succeeds");
            assert_eq!(parsed.target, Target::new("example.com", 443));
            assert_eq!(parsed.reply, Reply::Socks);
        });
    }

    #[test]
    fn password_auth_rejects_wrong_credentials() {
        block_on(async {
            let accounts = vec![Account {
                user: "alice".into(),
                pass: "secret".into(),
            }];
            let (mut client, mut server) = tokio::io::duplex(256);
            let task = tokio::spawn(async move { negotiate(&mut server, &accounts).await });

            client
                .write_all(&[0x05, 0x01, METHOD_USERNAME])
                .await
                .unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [0x05, METHOD_USERNAME]);

            let mut auth = vec![VER_AUTH, 5];
            auth.extend_from_slice(b"alice");
            auth.push(5);
            auth.extend_from_slice(b"wrong");
            client.write_all(&auth).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();
            assert_eq!(status, [VER_AUTH, 0x01]);

            let error = task.await.unwrap().unwrap_err();
            assert_eq!(error.kind(), io::ErrorKind::PermissionDenied);
        });
    }

    #[test]
    fn missing_method_is_refused() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(64);
            let task = tokio::spawn(async move { negotiate(&mut server, &[]).await });

            client
                .write_all(&[0x05, 0x01, METHOD_USERNAME])
                .await
                .unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [0x05, METHOD_INVALID]);
            assert!(task.await.unwrap().is_err());
        });
    }

    #[test]
    fn udp_associate_is_not_supported() {
        block_on(async {
            let (mut client, mut server) = tokio::io::duplex(64);
            let task = tokio::spawn(async move { negotiate(&mut server, &[]).await });

            client.write_all(&[0x05, 0x01, METHOD_NONE]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            client
                .write_all(&[0x05, 0x03, 0x00, ADDR_TYPE_IPV4, 127, 0, 0, 1, 0, 53])
                .await
                .unwrap();
            let mut answer = [0u8; 10];
            client.read_exact(&mut answer).await.unwrap();
            assert_eq!(answer[1], REPLY_COMMAND_NOT_SUPPORTED);
            assert!(task.await.unwrap().is_err());
        });
    }
}
