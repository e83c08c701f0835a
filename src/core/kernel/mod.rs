//! Transport kernel: framing codec, retrying REST transport, stream
//! connections and the envelope multiplexer. Everything above this layer
//! speaks envelopes and typed requests, never raw frames.

pub mod codec;
pub mod multiplexer;
pub mod rest;
pub mod ws;

pub use codec::{decode_frame, encode_frame, Envelope, EnvelopeKind, Frame};
pub use multiplexer::{StreamMultiplexer, Subscription};
pub use rest::{ReqwestRest, RestClientConfig, RestResponse, RestTransport};
pub use ws::{classify_stream_error, EphemeralStream};
