mod fingerprint;
mod store;

pub use fingerprint::{fingerprint_request, Fingerprint};
pub use store::{CacheEntry, ResultCache};
