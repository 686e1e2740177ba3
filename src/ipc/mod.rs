pub mod channel;
pub mod keys;
pub mod publisher;

pub use channel::IpcChannel;
pub use keys::{ChannelKeys, Salts, DEFAULT_KEY_PATH};
pub use publisher::{BandSink, Publisher};
