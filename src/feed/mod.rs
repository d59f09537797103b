//! Feed retrieval and decoding.
//!
//! - [`fetcher`] - single-shot HTTP GET with a body size limit
//! - [`parser`] - namespace-aware RSS/RDF/Atom decoding into [`FeedDocument`]
//! - [`model`] - the raw, all-optional shapes the parser produces
//!
//! Network failures ([`FetchError`]) and document failures ([`ParseError`])
//! are kept apart so the ingestion log can tell them apart.

mod fetcher;
mod model;
mod parser;

pub use fetcher::{FetchError, Fetcher, DEFAULT_MAX_FEED_BYTES};
pub use model::{ChannelImage, Enclosure, FeedDocument, FeedEntry, Guid, MediaRef};
pub use parser::{parse_feed, ParseError};
