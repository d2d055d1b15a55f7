//! Multi-origin request scheduling.
//!
//! The [`ContentServer`] accepts a closed set of [`Command`]s and answers
//! with a closed set of [`Event`]s:
//!
//! | Command        | Events                                   |
//! |----------------|------------------------------------------|
//! | `AddOrigin`    | none                                     |
//! | `RemoveOrigin` | none                                     |
//! | `OpenCache`    | `CacheReady` or `Error`                  |
//! | `DeleteCache`  | `Error` on failure                       |
//! | `GetResource`  | `Progress`*, then `ResourceData` or `Error` |
//!
//! Requests are spread over registered origins by load: each origin counts
//! the requests in flight against it, and new requests go to the first idle
//! origin or else the least-loaded one.

mod content_server;
mod error;
mod origins;
mod protocol;

pub use content_server::{Completion, CompletionQueue, ContentServer};
pub use error::ServerError;
pub use origins::{compose_url, OriginId, OriginRecord, OriginRegistry};
pub use protocol::{Command, Event, GetResource, ResourceData, ResponseType};
