//! Byte-fetch transports.
//!
//! The cache delegates misses to a [`Transport`]. Two implementations ship
//! with the crate:
//!
//! - [`HttpTransport`]: async reqwest client with a request timeout
//! - [`MockTransport`]: canned responses for tests and offline demos

mod http;
mod mock;
mod traits;

pub use http::{HttpTransport, DEFAULT_TIMEOUT_SECS};
pub use mock::MockTransport;
pub use traits::{TransferProgress, Transport, TransportError, INDETERMINATE_PERCENT};
