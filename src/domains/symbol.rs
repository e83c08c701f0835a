//! Symbol lookups: suggestions, per-symbol info, and trading limits.

use crate::client::{endpoints, headers, DxtradeClient};
use crate::core::errors::DxtradeError;
use crate::core::kernel::codec::EnvelopeKind;
use crate::core::types::{SymbolInfo, SymbolLimits, SymbolSuggestion};
use crate::domains::collect_snapshot;
use chrono::{Local, Offset};
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

/// Default quiescence window between limits batches.
pub const LIMITS_SETTLE: Duration = Duration::from_millis(200);

impl DxtradeClient {
    /// Search the symbol universe by free text.
    #[instrument(skip(self))]
    pub async fn symbol_suggestions(
        &self,
        text: &str,
    ) -> Result<Vec<SymbolSuggestion>, DxtradeError> {
        let session = self.ensure_session()?;
        let request_headers = headers::cookie_headers(&session.cookie_header)?;
        let response = self
            .rest(
                Method::GET,
                &endpoints::suggest(self.base_url(), text),
                request_headers,
                None,
            )
            .await
            .map_err(|e| self.fail(e))?;

        let body: Value = response.json().map_err(|e| self.fail(e))?;
        let suggestions: Vec<SymbolSuggestion> =
            serde_json::from_value(body.get("suggests").cloned().unwrap_or(Value::Null))
                .unwrap_or_default();
        if suggestions.is_empty() {
            return Err(self.fail(DxtradeError::NoSuggestions));
        }
        Ok(suggestions)
    }

    /// Contract details for one symbol, including the lot size used for
    /// quantity conversion.
    #[instrument(skip(self))]
    pub async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, DxtradeError> {
        let session = self.ensure_session()?;
        let offset_minutes =
            (Local::now().offset().fix().local_minus_utc() / 60).unsigned_abs() as i64;
        let request_headers = headers::cookie_headers(&session.cookie_header)?;
        let response = self
            .rest(
                Method::GET,
                &endpoints::instrument_info(self.base_url(), symbol, offset_minutes),
                request_headers,
                None,
            )
            .await
            .map_err(|e| self.fail(e))?;

        if response.body.trim().is_empty() || response.body.trim() == "null" {
            return Err(self.fail(DxtradeError::NoSymbolInfo));
        }
        response.json().map_err(|e| self.fail(e))
    }

    /// Per-symbol order size and stop distance limits, pushed as a snapshot
    /// burst on connection open.
    pub async fn symbol_limits(&self) -> Result<Vec<SymbolLimits>, DxtradeError> {
        self.symbol_limits_with_settle(LIMITS_SETTLE).await
    }

    #[instrument(skip(self))]
    pub async fn symbol_limits_with_settle(
        &self,
        settle: Duration,
    ) -> Result<Vec<SymbolLimits>, DxtradeError> {
        self.ensure_session()?;
        let items = collect_snapshot(self, EnvelopeKind::Limits, settle, "symbol limits")
            .await
            .map_err(|e| self.fail(e))?;
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(DxtradeError::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.fail(e))
    }
}
