//! S3 backend for vstore and the `vstore-jobs` host binary.

pub mod config;
pub mod storage;

pub use config::Config;
pub use storage::S3ObjectStore;
