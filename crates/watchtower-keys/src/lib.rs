//! Key custody backends for the watchtower operator.
//!
//! Two stores are supported: a gocryptfs filesystem whose decrypted view
//! holds plaintext hex key files, and a directory of per-key
//! password-encrypted keystore files. Both sit behind [`KeyBackend`].

pub mod backend;
pub mod gocryptfs;
pub mod keystore;
pub mod mount;
pub mod runner;
pub mod source;

pub use backend::{CreatedKey, ExportedKey, KeyBackend, KeyRecord, SelectedBackend};
pub use gocryptfs::GocryptfsBackend;
pub use keystore::KeystoreBackend;
pub use mount::MountController;
pub use runner::{SecretRunner, SystemRunner, ToolOutput};
pub use source::KeySource;
