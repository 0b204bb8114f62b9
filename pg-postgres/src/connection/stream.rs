use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use pg_core::net::{connect_tcp, Framed, Socket};

use crate::message::{
    BackendMessage, BackendMessageFormat, FrontendMessage, Notice, Notification, ParameterStatus,
    PostgresCodec, ReceivedMessage,
};
use crate::options::PgConnectOptions;

const SSL_REQUEST_CODE: i32 = 80877103;

/// The framed socket plus the bits of session state that get updated as a
/// side effect of reading messages off the wire, regardless of what the
/// caller was actually waiting for: notifications, `ParameterStatus`
/// updates, and notices.
pub struct PgStream {
    framed: Framed<Box<dyn Socket>, PostgresCodec>,
    pub server_version_num: Option<u32>,
    pub parameters: std::collections::HashMap<String, String>,
    pending_notifications: VecDeque<Notification>,
}

impl PgStream {
    pub async fn connect(options: &PgConnectOptions) -> crate::Result<Self> {
        let tcp = connect_tcp(&options.host, options.port).await?;

        let socket: Box<dyn Socket> = if options.ssl_mode.requires_attempt() {
            negotiate_tls(tcp, options).await?
        } else {
            Box::new(tcp)
        };

        Ok(PgStream {
            framed: Framed::new(socket, PostgresCodec),
            server_version_num: None,
            parameters: std::collections::HashMap::new(),
            pending_notifications: VecDeque::new(),
        })
    }

    pub async fn send(&mut self, message: &impl FrontendMessage) -> crate::Result<()> {
        let mut buf = Vec::new();
        message.encode(&mut buf)?;
        self.framed.send(buf).await?;
        Ok(())
    }

    /// Queue a message's bytes without flushing. Used to batch the
    /// Parse/Bind/Describe/Execute/Sync sequence into a single write.
    pub fn write(&mut self, message: &impl FrontendMessage, buf: &mut Vec<u8>) -> crate::Result<()> {
        message.encode(buf)
    }

    pub async fn send_raw(&mut self, buf: Vec<u8>) -> crate::Result<()> {
        self.framed.send(buf).await?;
        Ok(())
    }

    /// Read the next message that the caller actually cares about,
    /// transparently handling the messages that can arrive at any time:
    /// `ParameterStatus` updates session state, `NoticeResponse` is logged,
    /// and `NotificationResponse` is buffered for `PgConnection::next_notification`.
    ///
    /// An `ErrorResponse` is turned into `Err` immediately, same as ever —
    /// this is the right behavior for callers that expect exactly one
    /// message back (`recv_expect`, a fresh COPY/cursor response). Callers
    /// that must keep draining up to the next `ReadyForQuery` even after an
    /// error (the simple/extended query drain loops) use
    /// [`recv_message_raw`][Self::recv_message_raw] instead, which leaves
    /// `ErrorResponse` for them to see as ordinary data.
    pub async fn recv_message(&mut self) -> crate::Result<ReceivedMessage> {
        let message = self.recv_message_raw().await?;
        if message.format == BackendMessageFormat::ErrorResponse {
            let err: crate::error::PgDatabaseError = message.decode()?;
            return Err(err.into());
        }
        Ok(message)
    }

    /// Like [`recv_message`][Self::recv_message], but passes `ErrorResponse`
    /// through as an ordinary message instead of converting it to `Err`. The
    /// simple/extended query drain loops need this: the wire protocol still
    /// owes a `ReadyForQuery` after an `ErrorResponse`, and bailing out via
    /// `?` before consuming it leaves that frame buffered for the next
    /// command to misread as its own response.
    pub async fn recv_message_raw(&mut self) -> crate::Result<ReceivedMessage> {
        loop {
            let message = self
                .framed
                .next()
                .await
                .ok_or(pg_core::Error::ConnectionClosed)??;

            match message.format {
                BackendMessageFormat::ParameterStatus => {
                    let status: ParameterStatus = message.decode()?;
                    if status.name == "server_version" {
                        self.server_version_num = parse_server_version(&status.value);
                    }
                    self.parameters.insert(status.name, status.value);
                }
                BackendMessageFormat::NoticeResponse => {
                    let notice: Notice = message.decode()?;
                    tracing::info!(
                        target: "pg_postgres::notice",
                        severity = %notice.error.detail.severity,
                        code = %notice.error.detail.sqlstate,
                        "{}",
                        notice.error.detail.message
                    );
                }
                BackendMessageFormat::NotificationResponse => {
                    let notification: Notification = message.decode()?;
                    self.pending_notifications.push_back(notification);
                }
                _ => return Ok(message),
            }
        }
    }

    /// Like [`recv_message`][Self::recv_message], but returns as soon as a
    /// `NotificationResponse` arrives instead of queueing it and continuing
    /// to wait for something else. Used while listening, where a
    /// notification *is* the awaited event rather than a side channel.
    pub async fn recv_notification(&mut self) -> crate::Result<Notification> {
        if let Some(n) = self.pending_notifications.pop_front() {
            return Ok(n);
        }

        loop {
            let message = self
                .framed
                .next()
                .await
                .ok_or(pg_core::Error::ConnectionClosed)??;

            match message.format {
                BackendMessageFormat::NotificationResponse => return message.decode(),
                BackendMessageFormat::ParameterStatus => {
                    let status: ParameterStatus = message.decode()?;
                    if status.name == "server_version" {
                        self.server_version_num = parse_server_version(&status.value);
                    }
                    self.parameters.insert(status.name, status.value);
                }
                BackendMessageFormat::NoticeResponse => {
                    let notice: Notice = message.decode()?;
                    tracing::info!(
                        target: "pg_postgres::notice",
                        severity = %notice.error.detail.severity,
                        code = %notice.error.detail.sqlstate,
                        "{}",
                        notice.error.detail.message
                    );
                }
                BackendMessageFormat::ErrorResponse => {
                    let err: crate::error::PgDatabaseError = message.decode()?;
                    return Err(err.into());
                }
                _ => {
                    // Anything else while listening (shouldn't normally
                    // happen outside of a connection shared with query
                    // execution) is ignored rather than surfaced.
                }
            }
        }
    }

    pub async fn recv_expect<T: BackendMessage>(&mut self) -> crate::Result<T> {
        self.recv_message().await?.decode()
    }

    pub fn take_notification(&mut self) -> Option<Notification> {
        self.pending_notifications.pop_front()
    }

    pub fn has_buffered_notifications(&self) -> bool {
        !self.pending_notifications.is_empty()
    }

    pub fn shrink_buffers(&mut self) {
        self.framed.shrink_buffers();
    }
}

async fn negotiate_tls(
    mut tcp: tokio::net::TcpStream,
    options: &PgConnectOptions,
) -> crate::Result<Box<dyn Socket>> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut request = Vec::with_capacity(8);
    request.extend_from_slice(&8i32.to_be_bytes());
    request.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    tcp.write_all(&request).await?;

    let mut response = [0u8; 1];
    tcp.read_exact(&mut response).await?;

    match response[0] {
        b'S' => {
            let tls_config = options.tls_config();
            pg_core::net::upgrade(tcp, &tls_config).await
        }
        b'N' => {
            if options.ssl_mode.requires_tls() {
                Err(pg_core::Error::Protocol(
                    "server refused to negotiate TLS but sslmode requires it".into(),
                )
                .into())
            } else {
                Ok(Box::new(tcp))
            }
        }
        other => Err(pg_core::err_protocol!(
            "unexpected response to SSLRequest: {:?}",
            other as char
        )
        .into()),
    }
}

/// Parse the leading `N.N` (or `N.N.N`) out of a `server_version` string
/// (e.g. `"16.2 (Debian 16.2-1)"`) into `major * 10_000 + minor * 100 + patch`.
pub fn parse_server_version(value: &str) -> Option<u32> {
    let head = value.split_whitespace().next()?;
    let mut parts = head.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let patch: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Some(major * 10_000 + minor * 100 + patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modern_three_part_version() {
        assert_eq!(parse_server_version("16.2"), Some(160200));
    }

    #[test]
    fn parses_version_with_trailing_platform_info() {
        assert_eq!(
            parse_server_version("12.11 (Debian 12.11-1.pgdg110+1)"),
            Some(121_100)
        );
    }

    #[test]
    fn parses_two_part_version() {
        assert_eq!(parse_server_version("9.6"), Some(90600));
    }

    #[test]
    fn rejects_empty_string() {
        assert_eq!(parse_server_version(""), None);
    }
}
