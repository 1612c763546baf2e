pub mod chain;

pub use chain::{BaseChain, ChainCache, Version, VersionChainResolver, BASE_MARKER};
