pub mod signature;

pub use signature::{generate_meta_signature, verify_meta_signature};
