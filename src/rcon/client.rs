//! Source RCON client over tokio TCP

use crate::ACTION_TARGET;
use crate::rcon::{RconConnection, RconDialer, RconError, RconResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// id + type + two terminating nulls
const PACKET_HEADER: i32 = 10;
const MAX_PACKET_SIZE: i32 = 1 << 16;

/// Dials game servers over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl RconDialer for TcpDialer {
    async fn dial(
        &self,
        addr: &str,
        password: &str,
        timeout: Duration,
    ) -> RconResult<Box<dyn RconConnection>> {
        let connect = async {
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| RconError::Dial {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })?;
            let mut conn = TcpConnection {
                stream,
                next_id: i32::from(rand::random::<u16>()) + 1,
            };
            conn.authenticate(addr, password).await?;
            Ok::<_, RconError>(conn)
        };

        let conn = tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| RconError::Timeout(timeout))??;
        debug!(target: ACTION_TARGET, addr = %addr, "RCON connection established");
        Ok(Box::new(conn))
    }
}

/// An authenticated Source RCON session
struct TcpConnection {
    stream: TcpStream,
    next_id: i32,
}

struct Packet {
    id: i32,
    kind: i32,
    body: String,
}

impl TcpConnection {
    fn take_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn authenticate(&mut self, addr: &str, password: &str) -> RconResult<()> {
        let id = self.take_id();
        self.write_packet(id, SERVERDATA_AUTH, password).await?;

        // Source servers send an empty RESPONSE_VALUE ahead of the auth result
        loop {
            let packet = self.read_packet().await?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == -1 {
                return Err(RconError::Auth(addr.to_string()));
            }
            if packet.id == id {
                return Ok(());
            }
        }
    }

    async fn write_packet(&mut self, id: i32, kind: i32, body: &str) -> RconResult<()> {
        let size = i32::try_from(body.len())
            .ok()
            .and_then(|len| len.checked_add(PACKET_HEADER))
            .filter(|size| *size <= MAX_PACKET_SIZE)
            .ok_or_else(|| RconError::Exec(format!("command too long ({} bytes)", body.len())))?;

        let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or_default() + 4);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(body.as_bytes());
        buf.extend_from_slice(&[0, 0]);
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> RconResult<Packet> {
        let size = self.stream.read_i32_le().await?;
        if !(PACKET_HEADER..=MAX_PACKET_SIZE).contains(&size) {
            return Err(RconError::Protocol(format!("invalid packet size {size}")));
        }
        let id = self.stream.read_i32_le().await?;
        let kind = self.stream.read_i32_le().await?;

        let mut body = vec![0u8; usize::try_from(size - 8).unwrap_or_default()];
        self.stream.read_exact(&mut body).await?;
        while body.last() == Some(&0) {
            body.pop();
        }

        Ok(Packet {
            id,
            kind,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

#[async_trait]
impl RconConnection for TcpConnection {
    async fn exec(&mut self, command: &str) -> RconResult<String> {
        let id = self.take_id();
        let sentinel = self.take_id();
        self.write_packet(id, SERVERDATA_EXECCOMMAND, command).await?;
        // The server echoes an empty RESPONSE_VALUE once the command output is complete
        self.write_packet(sentinel, SERVERDATA_RESPONSE_VALUE, "")
            .await?;

        let mut output = String::new();
        loop {
            let packet = self.read_packet().await?;
            if packet.id == sentinel {
                break;
            }
            if packet.id == id && packet.kind == SERVERDATA_RESPONSE_VALUE {
                output.push_str(&packet.body);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn read_raw(stream: &mut TcpStream) -> (i32, i32, String) {
        let size = stream.read_i32_le().await.unwrap();
        let id = stream.read_i32_le().await.unwrap();
        let kind = stream.read_i32_le().await.unwrap();
        let mut body = vec![0u8; (size - 8) as usize];
        stream.read_exact(&mut body).await.unwrap();
        body.truncate(body.len() - 2);
        (id, kind, String::from_utf8(body).unwrap())
    }

    async fn write_raw(stream: &mut TcpStream, id: i32, kind: i32, body: &str) {
        let size = body.len() as i32 + PACKET_HEADER;
        let mut buf = Vec::new();
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(body.as_bytes());
        buf.extend_from_slice(&[0, 0]);
        stream.write_all(&buf).await.unwrap();
    }

    /// Minimal server: accepts one password and answers every command with `echo:<cmd>`
    async fn spawn_server(password: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (id, kind, body) = read_raw(&mut stream).await;
            assert_eq!(kind, SERVERDATA_AUTH);
            write_raw(&mut stream, id, SERVERDATA_RESPONSE_VALUE, "").await;
            let auth_id = if body == password { id } else { -1 };
            write_raw(&mut stream, auth_id, SERVERDATA_AUTH_RESPONSE, "").await;

            loop {
                let (id, kind, body) = read_raw(&mut stream).await;
                if kind == SERVERDATA_EXECCOMMAND {
                    write_raw(&mut stream, id, SERVERDATA_RESPONSE_VALUE, &format!("echo:{body}"))
                        .await;
                } else {
                    write_raw(&mut stream, id, SERVERDATA_RESPONSE_VALUE, "").await;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_dial_and_exec() {
        let addr = spawn_server("hunter2").await;
        let mut conn = TcpDialer
            .dial(&addr, "hunter2", Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(conn.exec("status").await.unwrap(), "echo:status");
        assert_eq!(conn.exec("say hi").await.unwrap(), "echo:say hi");
    }

    #[tokio::test]
    async fn test_bad_password() {
        let addr = spawn_server("hunter2").await;
        let result = TcpDialer.dial(&addr, "wrong", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(RconError::Auth(_))));
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpDialer.dial(&addr, "x", Duration::from_secs(2)).await;
        assert!(matches!(result, Err(RconError::Dial { .. })));
    }
}
