pub mod error;
pub mod ident;
pub mod types;

pub use error::{Error, Result};
pub use ident::is_plain_identifier;
pub use types::Version;
