//! Cashu mint RPC client library.
//!
//! Provides an async HTTP client for the informational and quote endpoints
//! of a Cashu mint's REST API.
//!
//! # Example
//!
//! ```ignore
//! use nutsack_rpc::MintRpc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mint = MintRpc::new("https://testnut.cashu.space").unwrap();
//!     let keysets = mint.get_keysets().await.unwrap();
//!     println!("{} keysets", keysets.len());
//! }
//! ```

pub mod error;
pub mod client;
pub mod mint;

pub use client::{normalize_url, RpcClient, RpcConfig};
pub use error::RpcError;
pub use mint::{MintInfo, MintRpc};
