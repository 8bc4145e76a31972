// Application layer - use cases over the persisted ledger.

pub mod error;
pub mod reporting;
mod service;

pub use error::*;
pub use reporting::*;
pub use service::*;
