// model/mod.rs
//
// Model weight acquisition: the fixed descriptor catalog and the store
// that downloads and verifies weight files.

mod catalog;
mod store;

pub use catalog::{catalog, ModelDescriptor};
pub use store::{DownloadState, FetchedStream, ModelFetcher, ModelStore, ProgressFn, ReqwestFetcher};
