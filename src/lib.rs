pub mod address;
pub mod classes;
pub mod config;
pub mod dataline;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod session;

pub use classes::{Classifier, SpamClasses};
pub use config::Config;
pub use error::{AddressParseError, FilterError};
pub use filter::Filter;
pub use session::{Message, Session, SessionStore, TxState};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
