//! Refget v2.0.0 server: reference sequence retrieval by cryptographic
//! digest over seekable zstd container files.
//!
//! The request path: the HTTP surface normalizes the identifier
//! ([`digest`]), resolves it in the read-only index ([`store`]), plans one
//! or two read intervals ([`region`]), borrows an open container handle
//! from the bounded LFU pool ([`fhcache`]) and streams the bytes out in
//! chunks ([`stream`]).

pub mod config;
pub mod digest;
pub mod fhcache;
pub mod http;
pub mod models;
pub mod region;
pub mod store;
pub mod stream;
pub mod zseek;

pub use fhcache::FhCache;
pub use http::Server;
pub use region::{Region, Window};
pub use store::{IndexRecord, IndexStore};
pub use zseek::SeekableZstd;
