//! LAN file drop: one host offers a single file behind a short numeric code,
//! another host on the same subnet fetches it exactly once.

pub mod archive;
pub mod cipher;
pub mod config;
pub mod error;
pub mod pairing;
pub mod session;
pub mod transfer;

pub use cipher::{EncryptionKey, StreamCipherCodec};
pub use config::DropConfig;
pub use error::{MetadataError, TransferError, TransportError};
pub use pairing::{PairingCode, PairingCodeAuthority};
pub use session::{CompletionSignal, TransferSession};
