//! Query embedding.

pub mod embedding;

pub use embedding::{build_embedder, Embedder, EmbedderError};
