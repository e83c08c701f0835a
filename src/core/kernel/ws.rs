use crate::core::config::DebugFilter;
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{self, Frame};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Classify a stream-level failure. The gateway reports throttling through
/// an HTTP 429 rejection of the upgrade request, which surfaces here as an
/// error message containing the status code.
pub fn classify_stream_error(error: impl Display) -> DxtradeError {
    let message = error.to_string();
    if message.contains("429") {
        DxtradeError::RateLimited
    } else {
        DxtradeError::Transport(message)
    }
}

/// A single-purpose, receive-only stream connection: opened for one
/// operation (handshake, snapshot fetch, order listener) and discarded.
/// Several may be open concurrently; they are independent.
pub struct EphemeralStream {
    write: WsSink,
    read: WsSource,
    tracking_id: Option<String>,
    saw_first_frame: bool,
    debug: DebugFilter,
}

impl EphemeralStream {
    /// Open the connection with the session cookie header, resolving once
    /// the transport handshake completes.
    #[instrument(skip(cookie_header, debug), fields(url = %url))]
    pub async fn open(
        url: &str,
        cookie_header: &str,
        connect_timeout: Duration,
        debug: DebugFilter,
    ) -> Result<Self, DxtradeError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| DxtradeError::Transport(format!("invalid stream url: {e}")))?;
        if !cookie_header.is_empty() {
            request.headers_mut().insert(
                COOKIE,
                cookie_header
                    .parse()
                    .map_err(|_| DxtradeError::Transport("invalid cookie header".to_string()))?,
            );
        }

        let (stream, _) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| DxtradeError::Timeout("stream connect".to_string()))?
            .map_err(classify_stream_error)?;

        let (write, read) = stream.split();
        Ok(Self {
            write,
            read,
            tracking_id: None,
            saw_first_frame: false,
            debug,
        })
    }

    /// Tracking id captured from the first raw frame, if one was present.
    pub fn tracking_id(&self) -> Option<&str> {
        self.tracking_id.as_deref()
    }

    /// Next decoded frame. `None` means the connection is gone (close frame
    /// or EOF); transport errors are classified (429 → `RateLimited`).
    /// Control traffic at the websocket level (ping/pong) is handled here.
    pub async fn next_frame(&mut self) -> Option<Result<Frame, DxtradeError>> {
        loop {
            let message = match self.read.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(classify_stream_error(error))),
            };

            let raw = match message {
                Message::Text(text) => text,
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Message::Ping(data) => {
                    let _ = self.write.send(Message::Pong(data)).await;
                    continue;
                }
                Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => return None,
            };

            if !self.saw_first_frame {
                self.saw_first_frame = true;
                self.tracking_id = codec::extract_tracking_id(&raw);
            }

            let frame = codec::decode_frame(&raw);
            match &frame {
                Frame::Envelope(envelope) => {
                    if self.debug.should_log(envelope.kind.as_wire()) {
                        debug!(kind = %envelope.kind, body = %envelope.body, "stream envelope");
                    }
                }
                Frame::Control(raw) => {
                    if self.debug == DebugFilter::All {
                        debug!(frame = %raw, "stream control frame");
                    }
                }
            }

            return Some(Ok(frame));
        }
    }

    /// Best-effort close; the gateway drops the connection either way.
    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_errors_containing_429_become_rate_limited() {
        let error = classify_stream_error("HTTP error: 429 Too Many Requests");
        assert!(matches!(error, DxtradeError::RateLimited));

        let error = classify_stream_error("connection reset by peer");
        assert!(matches!(error, DxtradeError::Transport(_)));
    }
}
