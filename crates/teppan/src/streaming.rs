//! Synchronous token streaming.
//!
//! A caller may attach a [`TokenSink`] to a generation request. The decode
//! loop pushes each newly produced token into the sink in order, before the
//! next step begins, and closes the sink once decoding is done. No hidden
//! event loop: `push` runs on the decode task.

use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Destination for tokens as they are produced.
pub trait TokenSink: Send + Sync {
    /// Accept one newly produced token.
    fn push(&self, token: i64);

    /// Signal that no further tokens will arrive.
    fn close(&self);
}

/// [`TokenSink`] backed by a Tokio unbounded channel.
///
/// Closing drops the sender so the paired [`TokenStream`] terminates; pushes
/// after close (or after the receiver is gone) are silently discarded.
pub struct ChannelSink {
    sender: Mutex<Option<mpsc::UnboundedSender<i64>>>,
}

impl TokenSink for ChannelSink {
    fn push(&self, token: i64) {
        if let Some(sender) = self.sender.lock().expect("sink poisoned").as_ref() {
            let _ = sender.send(token);
        }
    }

    fn close(&self) {
        self.sender.lock().expect("sink poisoned").take();
    }
}

/// An asynchronous stream of generated tokens.
///
/// Wraps the receiving half of the channel behind a [`ChannelSink`] so it can
/// be consumed with `futures` stream combinators. Returns `None` once the
/// sink is closed.
pub struct TokenStream {
    receiver: mpsc::UnboundedReceiver<i64>,
}

impl Stream for TokenStream {
    type Item = i64;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_recv(cx)
    }
}

/// Create a connected sink/stream pair.
pub fn token_channel() -> (ChannelSink, TokenStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ChannelSink {
            sender: Mutex::new(Some(tx)),
        },
        TokenStream { receiver: rx },
    )
}
