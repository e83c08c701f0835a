//! Domain operations, implemented as `impl DxtradeClient` blocks: orders,
//! positions, account, instruments, symbols, OHLC.

pub mod account;
pub mod instrument;
pub mod ohlc;
pub mod order;
pub mod position;
pub mod symbol;

use crate::client::DxtradeClient;
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::{EnvelopeKind, Frame};
use serde_json::Value;
use std::time::Duration;

/// Accumulate the bodies of a snapshot burst on a fresh stream connection.
///
/// The gateway pushes these snapshots as several envelopes of one kind with
/// no end marker, so completion is inferred by quiescence: a settle timer is
/// reset on every non-empty batch and the accumulated items are returned
/// once it fires. Empty batches neither arm nor reset the timer. The overall
/// budget comes from the client timeout and is fatal.
pub(crate) async fn collect_snapshot(
    client: &DxtradeClient,
    kind: EnvelopeKind,
    settle: Duration,
    label: &str,
) -> Result<Vec<Value>, DxtradeError> {
    let mut stream = client.open_stream().await?;
    let mut items: Vec<Value> = Vec::new();
    let mut armed = false;

    let overall = tokio::time::sleep(client.config().timeout);
    tokio::pin!(overall);
    let settle_timer = tokio::time::sleep(settle);
    tokio::pin!(settle_timer);

    loop {
        tokio::select! {
            _ = &mut overall => {
                return Err(DxtradeError::Timeout(label.to_string()));
            }
            _ = &mut settle_timer, if armed => {
                stream.close().await;
                return Ok(items);
            }
            frame = stream.next_frame() => match frame {
                None => {
                    if armed {
                        return Ok(items);
                    }
                    return Err(DxtradeError::Transport(format!(
                        "stream closed before {label} snapshot"
                    )));
                }
                Some(Err(error)) => return Err(error),
                Some(Ok(Frame::Envelope(envelope))) if envelope.kind == kind => {
                    let batch = envelope.body.as_array().cloned().unwrap_or_default();
                    if batch.is_empty() {
                        continue;
                    }
                    items.extend(batch);
                    armed = true;
                    settle_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + settle);
                }
                Some(Ok(_)) => {}
            }
        }
    }
}
