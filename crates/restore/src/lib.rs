//! Restore data plane: the pipeline that turns a catalog's restore plan
//! into files on disk. Seven long-lived stages — Block Source, File
//! Assembler, Volume Manager, Volume Downloader, Volume Decryptor, Block
//! Decompressor, Metadata/Verifier — connected by bounded `tokio::sync::
//! mpsc` channels, wired together in [`pipeline::run_restore`].
//!
//! Backpressure on the channels is the only flow control: a slow Assembler
//! stalls the Decompressor pool, which stalls the Manager, which stops
//! issuing new downloads, without any stage needing to know why.

pub mod assembler;
pub mod block_source;
pub mod codec;
pub mod config;
pub mod context;
pub mod decompressor;
pub mod decryptor;
pub mod downloader;
pub mod manager;
pub mod messages;
pub mod pipeline;
pub mod types;
pub mod verifier;

pub use codec::CodecRegistry;
pub use config::RestoreConfig;
pub use context::Context;
pub use pipeline::run_restore;
pub use types::{FileFailure, RestorePlanStats, RestoreSummary};
