//! Async client for DXtrade-style broker gateways.
//!
//! The gateway exposes no request/response protocol: mutations go through a
//! cookie/CSRF-authenticated REST surface, while all market and account
//! state is pushed over length-prefixed frames on a websocket stream. This
//! crate wraps both behind one typed client.
//!
//! ```no_run
//! use dxtrade_client::{DxtradeClient, DxtradeConfig, OrderRequest, Side};
//!
//! # async fn run() -> Result<(), dxtrade_client::DxtradeError> {
//! let config = DxtradeConfig::new("username", "password", "ftmo");
//! let client = DxtradeClient::new(config)?;
//! client.connect().await?;
//!
//! let update = client
//!     .submit_order(OrderRequest::market("EUR/USD", Side::Buy, 0.1))
//!     .await?;
//! println!("filled: {:?}", update.filled_price);
//!
//! let positions = client.positions().await?;
//! println!("open positions: {}", positions.len());
//! client.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod domains;

pub use client::cookies::CookieJar;
pub use client::DxtradeClient;
pub use core::config::{Callbacks, ConfigError, DebugFilter, DxtradeConfig};
pub use core::errors::DxtradeError;
pub use core::kernel::codec::{Envelope, EnvelopeKind, Frame};
pub use core::kernel::multiplexer::{StreamMultiplexer, Subscription};
pub use core::kernel::rest::{RestResponse, RestTransport};
pub use core::types::{
    AccountMetrics, AssessmentParams, Instrument, MessageEntry, OhlcBar, OhlcRequest,
    OrderLogParams, OrderRequest, OrderResponse, OrderType, OrderUpdate, Position,
    PositionEffect, PositionKey, PriceField, ProtectionLevel, RejectReason, Side, SymbolInfo,
    SymbolLimits, SymbolSuggestion, TimeInForce,
};
pub use domains::ohlc::OhlcStream;
pub use domains::position::{CloseConfirmation, ClosePositionOptions, PositionStream};
