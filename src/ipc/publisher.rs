use std::path::Path;

use super::channel::IpcChannel;
use super::keys::{ChannelKeys, Salts};
use crate::audio::frames::BandVector;
use crate::error::IpcError;

/// Where the driver hands each cycle's bands.
pub trait BandSink {
    /// An `Err` drops this frame only; the caller moves on to the next one.
    fn publish(&mut self, bands: &BandVector) -> Result<(), IpcError>;
}

/// Publishes over the shared channel, or does nothing if the channel could
/// not be attached at startup.
pub struct Publisher {
    channel: Option<IpcChannel>,
}

impl Publisher {
    /// Attach to the channel for `salts`. Never fails: on error the publisher
    /// stays degraded for the whole run.
    pub fn connect(key_path: &Path, salts: Salts) -> Self {
        let attached = ChannelKeys::derive(key_path, salts).and_then(|keys| IpcChannel::open(&keys));
        match attached {
            Ok(channel) => {
                log::info!(
                    "Attached to IPC channel (semaphore {}, segment {})",
                    channel.semaphore_id(),
                    channel.segment_id()
                );
                Self::attached(channel)
            }
            Err(err) => {
                log::warn!("IPC channel unavailable, bands will not be published: {}", err);
                Self::degraded()
            }
        }
    }

    pub fn attached(channel: IpcChannel) -> Self {
        Self {
            channel: Some(channel),
        }
    }

    pub fn degraded() -> Self {
        Self { channel: None }
    }
}

impl BandSink for Publisher {
    fn publish(&mut self, bands: &BandVector) -> Result<(), IpcError> {
        match &self.channel {
            Some(channel) => channel.publish(bands),
            None => Ok(()),
        }
    }
}
