//! Read and write loops shared by server connections and the client connector.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::Liveness;
use crate::error::TransportError;
use crate::frame::{
    CloseReason, Frame, FrameSink, FrameStream, OutboundMessage, CLOSE_NORMAL,
};
use crate::payload::Payload;

/// Why a read pump stopped.
#[derive(Debug)]
pub(crate) enum Disconnect {
    /// Nothing arrived within the idle-read deadline.
    IdleTimeout,
    /// The peer sent a close frame.
    Remote(Option<CloseReason>),
    /// The stream ended without a close frame.
    EndOfStream,
    /// The transport failed.
    Transport(TransportError),
    /// Local teardown (hub unregister, explicit close, write pump exit).
    Shutdown,
}

impl Disconnect {
    /// Whether this closure is reported through an error event.
    pub(crate) fn is_abnormal(&self) -> bool {
        match self {
            Disconnect::Remote(Some(reason)) => !reason.is_expected(),
            Disconnect::Transport(TransportError::Protocol(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disconnect::IdleTimeout => write!(f, "idle timeout"),
            Disconnect::Remote(Some(reason)) => write!(f, "remote closed ({})", reason),
            Disconnect::Remote(None) => write!(f, "remote closed"),
            Disconnect::EndOfStream => write!(f, "end of stream"),
            Disconnect::Transport(e) => write!(f, "{}", e),
            Disconnect::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Why a write pump stopped.
#[derive(Debug)]
pub(crate) enum WriteExit {
    Shutdown,
    QueueClosed,
    Failed(TransportError),
    TimedOut,
}

/// Read frames until the socket fails or `shutdown` fires.
///
/// Application frames are decoded leniently and handed to `on_payload`;
/// control frames only reset the idle deadline.
pub(crate) async fn read_loop<F>(
    stream: &mut FrameStream,
    read_deadline: Option<Duration>,
    shutdown: &CancellationToken,
    mut on_payload: F,
) -> Disconnect
where
    F: FnMut(Payload),
{
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Disconnect::Shutdown,
            next = next_frame(stream, read_deadline) => next,
        };

        match next {
            Ok(Frame::Text(text)) => on_payload(Payload::from_bytes(text.as_bytes())),
            Ok(Frame::Binary(data)) => on_payload(Payload::from_bytes(&data)),
            Ok(Frame::Ping(_)) | Ok(Frame::Pong(_)) => {
                tracing::trace!("Control frame received");
            }
            Ok(Frame::Close(reason)) => return Disconnect::Remote(reason),
            Err(disconnect) => return disconnect,
        }
    }
}

async fn next_frame(
    stream: &mut FrameStream,
    read_deadline: Option<Duration>,
) -> Result<Frame, Disconnect> {
    let item = match read_deadline {
        Some(deadline) => match tokio::time::timeout(deadline, stream.next()).await {
            Ok(item) => item,
            Err(_) => return Err(Disconnect::IdleTimeout),
        },
        None => stream.next().await,
    };

    match item {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(TransportError::Closed)) | None => Err(Disconnect::EndOfStream),
        Some(Err(e)) => Err(Disconnect::Transport(e)),
    }
}

/// Drain `queue` onto the socket, interleaving pings, until shutdown or failure.
///
/// With `drain_on_shutdown`, frames already queued when `shutdown` fires are
/// written before the close frame and the queue is closed to new senders.
pub(crate) async fn write_loop(
    sink: &mut FrameSink,
    queue: &mut mpsc::Receiver<Bytes>,
    liveness: Liveness,
    shutdown: &CancellationToken,
    drain_on_shutdown: bool,
) -> WriteExit {
    let mut ticker = liveness.ping_interval.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                if drain_on_shutdown {
                    queue.close();
                    while let Ok(data) = queue.try_recv() {
                        let frame = OutboundMessage::from(data).into_frame();
                        if write_frame(sink, frame, liveness.write_wait).await.is_err() {
                            return WriteExit::Shutdown;
                        }
                    }
                }
                send_close(sink, liveness.write_wait).await;
                return WriteExit::Shutdown;
            }
            next = queue.recv() => match next {
                Some(data) => {
                    let frame = OutboundMessage::from(data).into_frame();
                    if let Err(exit) = write_frame(sink, frame, liveness.write_wait).await {
                        return exit;
                    }
                }
                None => {
                    send_close(sink, liveness.write_wait).await;
                    return WriteExit::QueueClosed;
                }
            },
            _ = next_tick(&mut ticker) => {
                let ping = Frame::Ping(Bytes::new());
                if let Err(exit) = write_frame(sink, ping, liveness.write_wait).await {
                    return exit;
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn write_frame(
    sink: &mut FrameSink,
    frame: Frame,
    write_wait: Duration,
) -> Result<(), WriteExit> {
    match tokio::time::timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteExit::Failed(e)),
        Err(_) => Err(WriteExit::TimedOut),
    }
}

async fn send_close(sink: &mut FrameSink, write_wait: Duration) {
    let frame = Frame::Close(Some(CloseReason::new(CLOSE_NORMAL, "")));
    if let Err(exit) = write_frame(sink, frame, write_wait).await {
        tracing::trace!(?exit, "Close frame not delivered");
    }
}

/// Flush and release the outbound half.
pub(crate) async fn close_sink(sink: &mut FrameSink, write_wait: Duration) {
    let _ = tokio::time::timeout(write_wait, sink.close()).await;
}
