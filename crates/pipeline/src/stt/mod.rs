//! Speech recognition backends

mod http_backend;

pub use http_backend::{HttpRecognizer, HttpSttConfig};
