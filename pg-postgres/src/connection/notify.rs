//! `LISTEN`/`NOTIFY`: a single-channel listener, and a multiplexer that fans
//! a connection's incoming notifications out to per-channel handler tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::ident::quote_ident;
use crate::message::Notification;
use crate::options::PgConnectOptions;

use super::PgConnection;

/// A decoded `NotificationResponse`: the channel it arrived on, its
/// payload, and the backend process ID of whichever session ran `NOTIFY`.
#[derive(Debug, Clone)]
pub struct PgNotification {
    pub channel: String,
    pub payload: String,
    pub process_id: u32,
}

impl From<Notification> for PgNotification {
    fn from(n: Notification) -> Self {
        PgNotification {
            channel: n.channel,
            payload: n.payload,
            process_id: n.process_id,
        }
    }
}

impl PgConnection {
    /// Wait for at least one notification, then opportunistically drain any
    /// further notifications already sitting in the read buffer so a burst
    /// of `NOTIFY`s delivered in one TCP read comes back as one batch.
    pub async fn notification_wait(&mut self) -> crate::Result<Vec<PgNotification>> {
        let first = self.stream_mut().recv_notification().await?;
        let mut batch = vec![PgNotification::from(first)];

        while let Some(result) = self.stream_mut().recv_notification().now_or_never() {
            batch.push(PgNotification::from(result?));
        }

        Ok(batch)
    }
}

/// Holds a [`PgConnection`] pinned to `LISTEN`ing on a fixed set of
/// channels. Unlike an ordinary query connection this one is never
/// returned to a pool: its whole purpose is to sit idle, waiting on
/// notifications, for as long as the caller wants to keep listening.
pub struct PgListener {
    conn: PgConnection,
    channels: Vec<String>,
}

impl PgListener {
    pub async fn connect(options: &PgConnectOptions) -> crate::Result<Self> {
        Ok(PgListener {
            conn: PgConnection::connect(options).await?,
            channels: Vec::new(),
        })
    }

    pub async fn listen(&mut self, channel: &str) -> crate::Result<()> {
        let sql = format!("LISTEN {}", quote_ident(channel));
        self.conn.exec_simple(&sql).await?;
        self.channels.push(channel.to_string());
        Ok(())
    }

    pub async fn unlisten(&mut self, channel: &str) -> crate::Result<()> {
        let sql = format!("UNLISTEN {}", quote_ident(channel));
        self.conn.exec_simple(&sql).await?;
        self.channels.retain(|c| c != channel);
        Ok(())
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Wait for the next notification on any listened channel. A fatal
    /// connection error here means the listener is done: there's no
    /// automatic reconnect at this layer, the caller has to build a new
    /// [`PgListener`] and re-`listen` if it wants one.
    pub async fn recv(&mut self) -> crate::Result<PgNotification> {
        let batch = self.conn.notification_wait().await?;
        Ok(batch.into_iter().next().expect("notification_wait returns at least one"))
    }

    /// Run `handler` for every incoming notification, each invocation on
    /// its own spawned task so a slow handler never holds up draining the
    /// socket. Returns (rather than retries) on the first fatal connection
    /// error.
    pub async fn run<F, Fut>(&mut self, handler: F) -> crate::Result<()>
    where
        F: Fn(PgNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let batch = self.conn.notification_wait().await?;
            for notification in batch {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler(notification).await });
            }
        }
    }
}

type HandlerFn = dyn Fn(PgNotification) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Multiplexes one `LISTEN`ing connection across many channels, each with
/// its own set of independent handlers. Adding a handler for a channel
/// that's not yet listened-to sends `LISTEN`; adding another handler for an
/// existing channel only appends — the `LISTEN` stays in effect from the
/// first registration.
///
/// Every arriving notification spawns one detached task per handler
/// registered on its channel. Ordering within a channel matches server
/// delivery order; there's no ordering guarantee across channels, or
/// between handlers on the same channel once their tasks are spawned.
pub struct NotificationMultiplexer {
    conn: PgConnection,
    handlers: HashMap<String, Vec<Arc<HandlerFn>>>,
}

impl NotificationMultiplexer {
    pub async fn connect(options: &PgConnectOptions) -> crate::Result<Self> {
        Ok(NotificationMultiplexer {
            conn: PgConnection::connect(options).await?,
            handlers: HashMap::new(),
        })
    }

    /// Register `handler` for `channel`, sending `LISTEN` the first time
    /// this channel gets a handler.
    pub async fn register<F, Fut>(&mut self, channel: &str, handler: F) -> crate::Result<()>
    where
        F: Fn(PgNotification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: Arc<HandlerFn> = Arc::new(move |n| Box::pin(handler(n)));

        if let Some(existing) = self.handlers.get_mut(channel) {
            existing.push(boxed);
            return Ok(());
        }

        let sql = format!("LISTEN {}", quote_ident(channel));
        self.conn.exec_simple(&sql).await?;
        self.handlers.insert(channel.to_string(), vec![boxed]);
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.handlers.len()
    }

    /// Drive dispatch until the connection hits a fatal error. Each
    /// registered handler for an arriving notification's channel is spawned
    /// as its own task with an owned copy of the notification; a channel
    /// with no registered handlers is drained and ignored.
    pub async fn run(mut self) -> crate::Result<()> {
        loop {
            let batch = self.conn.notification_wait().await?;
            for notification in batch {
                let Some(handlers) = self.handlers.get(&notification.channel) else {
                    continue;
                };
                for handler in handlers {
                    let handler = Arc::clone(handler);
                    let notification = notification.clone();
                    tokio::spawn(async move { handler(notification).await });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_converts_field_names() {
        let raw = Notification {
            process_id: 42,
            channel: "orders".into(),
            payload: "7".into(),
        };
        let n = PgNotification::from(raw);
        assert_eq!(n.process_id, 42);
        assert_eq!(n.channel, "orders");
        assert_eq!(n.payload, "7");
    }
}
