//! Instrument catalogue, pushed as a snapshot burst on connection open.

use crate::client::DxtradeClient;
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::EnvelopeKind;
use crate::core::types::Instrument;
use crate::domains::collect_snapshot;
use std::time::Duration;
use tracing::instrument;

/// Default quiescence window between instrument batches.
pub const INSTRUMENTS_SETTLE: Duration = Duration::from_millis(200);

impl DxtradeClient {
    /// Full instrument catalogue, read from a fresh stream connection.
    pub async fn instruments(&self) -> Result<Vec<Instrument>, DxtradeError> {
        self.instruments_with_settle(INSTRUMENTS_SETTLE).await
    }

    /// As [`instruments`](Self::instruments) with a caller-tuned quiescence
    /// window.
    #[instrument(skip(self))]
    pub async fn instruments_with_settle(
        &self,
        settle: Duration,
    ) -> Result<Vec<Instrument>, DxtradeError> {
        self.ensure_session()?;
        let items = collect_snapshot(self, EnvelopeKind::Instruments, settle, "instruments")
            .await
            .map_err(|e| self.fail(e))?;
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(DxtradeError::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.fail(e))
    }

    /// Catalogue filtered by a caller predicate, e.g. by type or currency.
    pub async fn instruments_filtered<F>(&self, predicate: F) -> Result<Vec<Instrument>, DxtradeError>
    where
        F: Fn(&Instrument) -> bool,
    {
        let instruments = self.instruments().await?;
        Ok(instruments.into_iter().filter(|i| predicate(i)).collect())
    }
}
