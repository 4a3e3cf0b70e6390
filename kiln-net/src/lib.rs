// kiln-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::fetch_and_verify;
pub use validation::{file_sha256, sha256_hex, validate_url, verify_checksum};
