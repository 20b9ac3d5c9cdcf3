pub mod config;
pub mod error;
pub mod types;

pub use config::{EdudeskConfig, PasswordScheme, DEFAULT_PBKDF2_ITERATIONS};
pub use error::{EdudeskError, EdudeskResult, ErrorCategory};
pub use types::{BlobArea, MaterialRecord, PasswordRule, Principal, Role, SubmissionRecord};
