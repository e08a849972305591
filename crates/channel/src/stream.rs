//! [`Channel`] implementation over any byte stream.
//!
//! Each channel runs two pumps: the write pump drains the send queue into
//! the stream, the read pump decodes frames and forwards them as events.
//! `buffered_amount` counts payload bytes accepted by [`send`] that the
//! write pump has not yet written.
//!
//! [`send`]: Channel::send

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::wire::{Frame, read_frame, write_frame};
use crate::{Channel, ChannelEvent, Connection, DrainFuture};

#[derive(Debug)]
struct Shared {
    buffered: AtomicU64,
    open: AtomicBool,
    close_reported: AtomicBool,
    drained: Notify,
    cancel: CancellationToken,
}

impl Shared {
    /// Marks the channel closed and reports `Close` exactly once.
    fn shut(&self, events_tx: &mpsc::UnboundedSender<ChannelEvent>) {
        self.open.store(false, Ordering::Release);
        self.cancel.cancel();
        self.drained.notify_waiters();
        if !self.close_reported.swap(true, Ordering::AcqRel) {
            let _ = events_tx.send(ChannelEvent::Close);
        }
    }
}

/// A channel that frames messages over an `AsyncRead + AsyncWrite` stream.
#[derive(Debug, Clone)]
pub struct StreamChannel {
    remote_id: Arc<str>,
    write_tx: mpsc::UnboundedSender<Frame>,
    shared: Arc<Shared>,
}

impl StreamChannel {
    /// Starts the pumps for `stream` and returns the open channel.
    ///
    /// The first event delivered is always [`ChannelEvent::Open`].
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(stream: S, remote_id: impl Into<String>) -> Connection<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let remote_id: Arc<str> = Arc::from(remote_id.into());
        let (reader, writer) = tokio::io::split(stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            buffered: AtomicU64::new(0),
            open: AtomicBool::new(true),
            close_reported: AtomicBool::new(false),
            drained: Notify::new(),
            cancel: CancellationToken::new(),
        });

        let _ = events_tx.send(ChannelEvent::Open);

        tokio::spawn(write_pump(
            writer,
            write_rx,
            Arc::clone(&shared),
            events_tx.clone(),
        ));
        tokio::spawn(read_pump(
            reader,
            Arc::clone(&shared),
            events_tx,
            Arc::clone(&remote_id),
        ));

        debug!(remote = %remote_id, "stream channel opened");

        Connection {
            channel: Self {
                remote_id,
                write_tx,
                shared,
            },
            events,
        }
    }
}

impl Channel for StreamChannel {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let len = frame.len() as u64;
        self.shared.buffered.fetch_add(len, Ordering::AcqRel);
        if self.write_tx.send(frame).is_err() {
            self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> u64 {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            debug!(remote = %self.remote_id, "closing stream channel");
        }
        self.shared.cancel.cancel();
    }

    fn drained(&self) -> DrainFuture<'_> {
        Box::pin(self.shared.drained.notified())
    }
}

async fn write_pump<S: AsyncWrite>(
    mut writer: WriteHalf<S>,
    mut write_rx: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            frame = write_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let len = frame.len() as u64;
        let result = write_frame(&mut writer, &frame).await;
        shared.buffered.fetch_sub(len, Ordering::AcqRel);
        shared.drained.notify_waiters();

        if let Err(e) = result {
            warn!(error = %e, "stream channel write failed");
            let _ = events_tx.send(ChannelEvent::Error(e.to_string()));
            break;
        }
    }

    let _ = writer.shutdown().await;
    shared.shut(&events_tx);
}

async fn read_pump<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    remote_id: Arc<str>,
) {
    loop {
        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            result = read_frame(&mut reader) => result,
        };

        match result {
            Ok(Some(frame)) => {
                if events_tx.send(ChannelEvent::Data(frame)).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(remote = %remote_id, "stream channel closed by peer");
                break;
            }
            Err(e) => {
                warn!(remote = %remote_id, error = %e, "stream channel read failed");
                let _ = events_tx.send(ChannelEvent::Error(e.to_string()));
                break;
            }
        }
    }

    shared.shut(&events_tx);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_data(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> Frame {
        loop {
            match events.recv().await {
                Some(ChannelEvent::Data(frame)) => return frame,
                Some(ChannelEvent::Open) => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = StreamChannel::spawn(a, "right");
        let mut right = StreamChannel::spawn(b, "left");

        assert_eq!(left.events.recv().await, Some(ChannelEvent::Open));

        left.channel.send(Frame::Text("hello".into())).unwrap();
        right.channel.send(Frame::Binary(vec![1, 2, 3])).unwrap();

        assert_eq!(next_data(&mut right.events).await, Frame::Text("hello".into()));
        assert_eq!(next_data(&mut left.events).await, Frame::Binary(vec![1, 2, 3]));
        assert_eq!(left.channel.remote_id(), "right");
    }

    #[tokio::test]
    async fn close_is_reported_to_both_sides() {
        let (a, b) = tokio::io::duplex(1024);
        let mut left = StreamChannel::spawn(a, "right");
        let mut right = StreamChannel::spawn(b, "left");

        left.channel.close();
        left.channel.close();
        assert!(!left.channel.is_open());

        assert_eq!(right.events.recv().await, Some(ChannelEvent::Open));
        assert_eq!(right.events.recv().await, Some(ChannelEvent::Close));
        assert!(!right.channel.is_open());

        assert_eq!(left.events.recv().await, Some(ChannelEvent::Open));
        assert_eq!(left.events.recv().await, Some(ChannelEvent::Close));
        assert!(matches!(
            left.channel.send(Frame::Text("late".into())),
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn buffered_amount_grows_while_peer_is_slow() {
        // Pipe smaller than one frame: the write pump stalls until the peer reads.
        let (a, b) = tokio::io::duplex(64);
        let left = StreamChannel::spawn(a, "right");

        for _ in 0..4 {
            left.channel.send(Frame::Binary(vec![0u8; 1024])).unwrap();
        }
        tokio::task::yield_now().await;
        assert!(left.channel.buffered_amount() > 0);

        let mut right = StreamChannel::spawn(b, "left");
        for _ in 0..4 {
            assert_eq!(next_data(&mut right.events).await.len(), 1024);
        }

        while left.channel.buffered_amount() > 0 {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                left.channel.drained(),
            )
            .await;
        }
        assert_eq!(left.channel.buffered_amount(), 0);
    }
}
