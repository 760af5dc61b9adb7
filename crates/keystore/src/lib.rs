//! Disposable key pairs for payment sessions.
//!
//! Every session owns one key. It is written to a slot named after its
//! public address, loaded back if the process needs it again, and removed
//! once the ledger shows the address is empty.

pub mod cipher;
pub mod error;
pub mod store;

pub use cipher::SlotCipher;
pub use error::{KeyStoreError, Result};
pub use store::{DisposableKey, FileKeyStore, KeyStore};
