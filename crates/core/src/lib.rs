pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod signer;
pub mod store;
pub mod types;
pub mod validation;

pub use error::{StoreError, StoreResult};
