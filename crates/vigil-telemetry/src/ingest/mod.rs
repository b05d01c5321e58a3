//! Ingestion path: envelope normalisation and category dispatch.

mod dispatcher;
mod normalise;

pub use dispatcher::{Dispatcher, IngestReceipt};
pub use normalise::{decode_nested, normalise_payload, snake_case};
