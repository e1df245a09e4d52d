//! Robot end of the command bus.
//!
//! A background task owns the socket, decodes each received line and queues
//! the directive for the control loop, which drains the queue without
//! blocking through [`LinkSource`]. Malformed lines never leave this module.

use std::io;

use experiment_core::bus::{
    BusError, Directive, DirectiveSource, RobotId, Subscription, parse_directive,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Directives queued between the socket task and the control loop.
pub const LINK_CAPACITY: usize = 64;

/// Non-blocking directive queue fed by the socket task.
#[derive(Debug)]
pub struct LinkSource {
    rx: mpsc::Receiver<Directive>,
}

impl LinkSource {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Directive>) -> Self {
        Self { rx }
    }
}

impl DirectiveSource for LinkSource {
    fn try_next(&mut self) -> Result<Option<Directive>, BusError> {
        match self.rx.try_recv() {
            Ok(directive) => Ok(Some(directive)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Disconnected),
        }
    }
}

/// Connects to the bus at `addr` and subscribes to the topics of `id`.
///
/// The returned task ends when the publisher closes the connection; the
/// source then reports [`BusError::Disconnected`] once the queue is empty.
pub async fn connect(
    addr: &str,
    id: RobotId,
) -> io::Result<(LinkSource, JoinHandle<io::Result<()>>)> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();

    let subscription = Subscription::for_robot(id);
    writer
        .write_all(format!("{subscription}\n").as_bytes())
        .await?;
    info!(%addr, %subscription, "subscribed to command bus");

    let (tx, rx) = mpsc::channel(LINK_CAPACITY);
    let task = tokio::spawn(receive(BufReader::new(reader), writer, tx));
    Ok((LinkSource::new(rx), task))
}

/// Forwards decoded lines until EOF or until the control loop goes away.
///
/// `_peer` keeps the write half open so the publisher does not see a
/// half-closed peer.
async fn receive<R, W>(mut reader: R, _peer: W, tx: mpsc::Sender<Directive>) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!(bytes = buf.len(), "dropping line that is not UTF-8");
            continue;
        };
        let line = line.trim_end_matches(['\n', '\r']);
        let directive = match parse_directive(line) {
            Ok(directive) => directive,
            Err(err) => {
                warn!(%line, %err, "dropping malformed directive");
                continue;
            }
        };
        debug!(%directive, "directive received");
        if tx.send(directive).await.is_err() {
            return Ok(());
        }
    }
    info!("command bus closed the connection");
    Ok(())
}
