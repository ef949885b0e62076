//! xfade Core - Crossfade scheduling
//!
//! This crate ramps audio output volumes on a fixed tick cadence: fading a
//! new track in while the old one fades out, and freezing or resuming fades
//! along with playback.

pub mod capability;
pub mod config;
pub mod crossfader;
pub mod device;
pub mod fade;
pub mod queue;

#[cfg( test )]
pub( crate ) mod testing;

pub use capability::{ Output, Player, SharedTransport, Transport };
pub use config::FadeConfig;
pub use crossfader::{ CrossfadeError, Crossfader };
pub use device::{ DeviceMixer, DeviceStream, OutputError, ToneVoice };
pub use fade::Direction;
