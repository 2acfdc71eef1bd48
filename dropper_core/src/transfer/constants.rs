use std::time::Duration;

/// Default port the offering side listens on
pub const TRANSFER_PORT: u16 = 8551;

/// Default chunk size (2 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 2 << 20;

/// Largest chunk size a session may be configured with (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Frame limit: one maximal chunk plus room for the message envelope
pub const MAX_FRAME_LEN: usize = MAX_CHUNK_SIZE + 64 * 1024;

/// Bound on dialing and pinging the offering host
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the offering side waits for the requester to drain a finished stream
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Keeps `.<name>.part` within the usual 255 byte file name limit
pub const MAX_FILENAME_LENGTH: usize = 240;

/// ALPN protocol identifier
pub const ALPN: &[u8] = b"dropper";
