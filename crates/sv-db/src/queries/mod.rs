//! Query functions, one module per table.

pub mod transcode_jobs;
