//! Command-line argument parsing for xfade.

use clap::{ ArgAction, Parser };


/// xfade - Crossfade between two tones on the default audio device.
#[derive( Parser, Debug, Default )]
#[command( name = "xfade" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Frequency of the outgoing tone, in Hz.
    #[arg( long )]
    pub from: Option<f32>,

    /// Frequency of the incoming tone, in Hz.
    #[arg( long )]
    pub to: Option<f32>,

    /// Length of each fade, in milliseconds.
    #[arg( short, long )]
    pub crossfade_ms: Option<u64>,

    /// How long to hold each tone at full volume, in milliseconds.
    #[arg( long )]
    pub hold_ms: Option<u64>,

    /// Global volume (0.0 to 1.0).
    #[arg( long )]
    pub volume: Option<f64>,

    /// Start with the transport muted.
    #[arg( long )]
    pub mute: bool,

    /// Pause halfway through the crossfade for this many milliseconds.
    #[arg( short, long )]
    pub pause_ms: Option<u64>,

    /// Log volume changes instead of opening an audio device.
    #[arg( short, long )]
    pub simulate: bool,

    /// Save the effective settings as the new defaults.
    #[arg( long )]
    pub save: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg( short, long, action = ArgAction::Count )]
    pub verbose: u8,
}
