//! Graph attention encoders for drug-drug interaction graphs, built on candle.
//!
//! [`nn::Gat`] runs one multi-head block of single-hop attention;
//! [`nn::TopoGat`] stacks three blocks whose attention logits also mix in
//! multi-hop connectivity (`A + A² + A³`). Both take a dense `(N, F)` feature
//! matrix and a dense `(N, N)` adjacency and return `(N, nheads * gat_hidden)`
//! node embeddings.
pub mod config;
pub mod datasets;
pub mod error;
pub mod nn;
pub mod utils;

pub use config::{AttentionParams, EncoderConfig};
pub use error::{Error, Result};
