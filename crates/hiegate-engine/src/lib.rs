//! The hiegate routing engine: channel matching, multi-protocol route
//! dispatch, client-certificate resolution, and response URL rewriting.
//!
//! The engine is free of server concerns: it consumes immutable snapshots
//! (channels, keystore, client records) and produces immutable results, so
//! nothing here needs locking across concurrent requests.

pub mod dispatcher;
pub mod matcher;
pub mod pathsub;
pub mod resolver;
pub mod rewriter;

pub use dispatcher::{
    DispatchConfig, Dispatcher, HEADER_VALUE_SEPARATOR, INTERNAL_ERROR_BODY, InboundRequest,
    render_set_cookie,
};
pub use matcher::{MatchOutcome, RequestDescriptor, match_channel};
pub use pathsub::{PathTransform, invert, transform};
pub use resolver::{ClientResolver, LookupMode};
pub use rewriter::Rewriter;
