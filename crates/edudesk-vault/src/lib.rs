//! edudesk-vault: protected file storage and the records that own it
//!
//! - [`vault::FileVault`]: protect/reveal under envelope encryption
//! - [`store`]: credential and submission record stores
//! - [`auth::Authenticator`]: registration and login

pub mod auth;
pub mod layout;
pub mod store;
pub mod vault;

pub use auth::Authenticator;
pub use layout::{stored_name, StorageLayout};
pub use store::{CredentialRecord, CredentialStore, JsonRecordStore, NewCredential, SubmissionStore};
pub use vault::{
    FileVault, ProtectRequest, ProtectStage, ProtectedFile, RevealStage, RevealedFile,
    TempPlaintext,
};
