// Dramabox upstream client
//
// Signed HTTP client for the Dramabox content API, one handle per language.
//
// Layers:
// - token: per-handle token cache with single-flight refresh
// - signer: signed header derivation
// - transport: HTTP with retry, backoff and jitter
// - client: domain operations (search, listings, detail, chapters, streams)
// - registry: per-language handle cache

// Shared error types
pub mod error;

// Ambient setup
pub mod config;
pub mod logging;

pub mod clock;
pub mod types;
pub mod validation;

// Request pipeline
pub mod signer;
pub mod token;
pub mod transport;

pub mod client;
pub mod registry;

// Re-export main types for convenience
pub use client::{BatchFailure, BatchReport, DramaboxClient, HeaderDebug, TokenInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use registry::{ClientRegistry, ClientRegistryBuilder, SignerFactory};
pub use signer::{HeaderProfile, HmacSigner, RequestSigner, SignedHeaders};
pub use token::{HttpTokenIssuer, Token, TokenIssuer, TokenManager};
pub use transport::{HttpMethod, RawResponse, Transport};
pub use types::{BookDetail, BookSummary, Category, Chapter, PageRequest, PageResult, StreamTarget};
