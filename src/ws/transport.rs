//! Physical socket establishment.
//!
//! The [`ConnectionManager`](super::ConnectionManager) never talks to `tokio-tungstenite`
//! directly; it asks a [`Transport`] for a [`Socket`] (a sink/stream pair of frames).
//! This keeps socket lifecycle logic independent of the wire library and lets tests
//! drive the state machine with an in-memory transport.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::error::WsError;

/// Outbound half of a socket.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
/// Inbound half of a socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// An established connection, split into its outbound and inbound halves.
#[non_exhaustive]
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Socket {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Message, Error = WsError> + Send + 'static,
        St: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}

/// Opens physical sockets.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a socket to `url`. Errors are logged by the caller and retried later.
    async fn connect(&self, url: &Url) -> crate::Result<Socket>;
}

/// [`Transport`] backed by `tokio-tungstenite`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &Url) -> crate::Result<Socket> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        Ok(Socket::new(
            write.sink_map_err(WsError::Connection),
            read.map(|frame| frame.map_err(WsError::Connection)),
        ))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use futures::Sink;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;

    use super::{Socket, Transport};
    use crate::ws::WsError;

    /// One server-side view of a socket handed out by [`MockTransport`].
    #[derive(Default)]
    pub(crate) struct MockSession {
        sent: Mutex<Vec<String>>,
        inbound: Mutex<Option<mpsc::UnboundedSender<Result<Message, WsError>>>>,
        closed_by_client: AtomicBool,
        hang_on_close: AtomicBool,
    }

    impl MockSession {
        /// Deliver a text frame to the client.
        pub(crate) fn push_text(&self, text: &str) {
            if let Some(tx) = self
                .inbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
            {
                drop(tx.send(Ok(Message::Text(text.into()))));
            }
        }

        /// Simulate the server dropping the connection.
        pub(crate) fn drop_connection(&self) {
            self.inbound
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
        }

        /// Text frames the client wrote to this socket, in order.
        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Text frames the client wrote, excluding heartbeat traffic.
        pub(crate) fn sent_payloads(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter(|text| text != "ping" && text != "pong")
                .collect()
        }

        pub(crate) fn closed_by_client(&self) -> bool {
            self.closed_by_client.load(Ordering::SeqCst)
        }
    }

    struct MockSink {
        session: Arc<MockSession>,
    }

    impl Sink<Message> for MockSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), WsError> {
            if let Message::Text(text) = item {
                self.session
                    .sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(text.to_string());
            }
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            if self.session.hang_on_close.load(Ordering::SeqCst) {
                return Poll::Pending;
            }
            self.session.closed_by_client.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    /// In-memory [`Transport`] that records every connect call.
    #[derive(Default)]
    pub(crate) struct MockTransport {
        connects: AtomicUsize,
        refuse: AtomicBool,
        hang_on_close: AtomicBool,
        sessions: Mutex<Vec<Arc<MockSession>>>,
    }

    impl MockTransport {
        pub(crate) fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        /// Make subsequent connect attempts fail.
        pub(crate) fn refuse(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Make sockets handed out from now on never acknowledge a close.
        pub(crate) fn hang_on_close(&self, hang: bool) {
            self.hang_on_close.store(hang, Ordering::SeqCst);
        }

        pub(crate) fn sessions(&self) -> Vec<Arc<MockSession>> {
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub(crate) fn last_session(&self) -> Arc<MockSession> {
            self.sessions()
                .pop()
                .expect("at least one session should have been opened")
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, _url: &Url) -> crate::Result<Socket> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse.load(Ordering::SeqCst) {
                return Err(WsError::ConnectionClosed.into());
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let session = Arc::new(MockSession {
                inbound: Mutex::new(Some(tx)),
                hang_on_close: AtomicBool::new(self.hang_on_close.load(Ordering::SeqCst)),
                ..MockSession::default()
            });
            self.sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&session));

            let stream = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            });

            Ok(Socket::new(MockSink { session }, stream))
        }
    }
}
