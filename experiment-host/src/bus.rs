//! TCP side of the command bus.
//!
//! Every robot connects, sends a single `subscribe <topic>...` line and then
//! receives the directives matching its topics, one per line. The
//! orchestrator publishes into a broadcast channel; each connection task owns
//! a receiver and applies its own filter. A subscriber that falls behind loses
//! the oldest directives, and directives published before its handshake are
//! never delivered.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use experiment_core::bus::{BusError, Directive, DirectivePublisher, Subscription, parse_subscription};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Directives buffered per subscriber before it starts lagging.
pub const BUS_CAPACITY: usize = 256;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishing half handed to the orchestrator.
#[derive(Clone, Debug)]
pub struct BusPublisher {
    tx: broadcast::Sender<Directive>,
}

impl BusPublisher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Directive> {
        self.tx.subscribe()
    }

    /// Connections that completed the handshake and are still open.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BusPublisher {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl DirectivePublisher for BusPublisher {
    fn publish(&mut self, directive: &Directive) -> Result<(), BusError> {
        match self.tx.send(*directive) {
            Ok(receivers) => trace!(%directive, receivers, "directive fanned out"),
            // Nobody listening is not a failure on a fire-and-forget bus.
            Err(_) => debug!(%directive, "no subscribers connected"),
        }
        Ok(())
    }
}

/// Listening socket plus the publisher its connections subscribe to.
pub struct BusServer {
    listener: TcpListener,
    publisher: BusPublisher,
}

impl BusServer {
    pub async fn bind(addr: SocketAddr, publisher: BusPublisher) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            publisher,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts subscribers until the listener fails.
    pub async fn serve(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let publisher = self.publisher.clone();
            tokio::spawn(async move {
                if let Err(err) = serve_subscriber(stream, peer, &publisher).await {
                    warn!(%peer, %err, "subscriber connection failed");
                }
            });
        }
    }
}

async fn serve_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    publisher: &BusPublisher,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Ok(handshake) = timeout(HANDSHAKE_TIMEOUT, lines.next_line()).await else {
        warn!(%peer, "no subscription received, closing");
        return Ok(());
    };
    let Some(handshake) = handshake? else {
        return Ok(());
    };
    let subscription = match parse_subscription(&handshake) {
        Ok(subscription) => subscription,
        Err(err) => {
            warn!(%peer, %err, "rejected subscription");
            return Ok(());
        }
    };

    let mut rx = publisher.subscribe();
    info!(%peer, %subscription, "subscriber joined");
    let result = forward(&mut rx, &subscription, &mut lines, &mut writer, peer).await;
    info!(%peer, "subscriber left");
    result
}

async fn forward<R, W>(
    rx: &mut broadcast::Receiver<Directive>,
    subscription: &Subscription,
    lines: &mut tokio::io::Lines<R>,
    writer: &mut W,
    peer: SocketAddr,
) -> io::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(directive) if subscription.accepts(&directive) => {
                    writer.write_all(format!("{directive}\n").as_bytes()).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%peer, skipped, "subscriber lagged, directives dropped");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            inbound = lines.next_line() => match inbound? {
                Some(line) => debug!(%peer, %line, "ignoring inbound line"),
                None => return Ok(()),
            },
        }
    }
}
