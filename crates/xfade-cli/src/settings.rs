//! Application settings management
//!
//! Handles persistent defaults for the crossfade demo and the crossfader
//! tuning.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ Context, Result };
use serde::{ Deserialize, Serialize };

use xfade_core::FadeConfig;

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Crossfader tick interval and fade limit
    pub fade: FadeConfig,

    /// Outgoing tone frequency in Hz
    pub from_hz: f32,

    /// Incoming tone frequency in Hz
    pub to_hz: f32,

    /// Fade length in milliseconds
    pub crossfade_ms: u64,

    /// Time each tone holds at full volume, in milliseconds
    pub hold_ms: u64,

    /// Global volume (0.0 to 1.0)
    pub volume: f64,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            fade: FadeConfig::default(),
            from_hz: 440.0,
            to_hz: 660.0,
            crossfade_ms: 3000,
            hold_ms: 1500,
            volume: 0.8,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "xfade" ).join( "settings.json" ) )
    }


    /// Loads settings from disk. A missing or unreadable file yields defaults.
    pub fn load() -> Self {
        let Some( path ) = Self::settings_path() else {
            return Self::default();
        };

        let contents = match fs::read_to_string( &path ) {
            Ok( contents ) => contents,
            Err( e ) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                return Self::default();
            }
        };

        serde_json::from_str( &contents ).unwrap_or_else( |e| {
            tracing::warn!( "Invalid settings in {:?}, using defaults: {}", path, e );
            Self::default()
        })
    }


    /// Writes settings to disk and returns where they went.
    pub fn save( &self ) -> Result<PathBuf> {
        let path = Self::settings_path().context( "No config directory on this platform" )?;
        if let Some( parent ) = path.parent() {
            fs::create_dir_all( parent )
                .with_context( || format!( "Failed to create {:?}", parent ) )?;
        }

        fs::write( &path, serde_json::to_string_pretty( self )? )
            .with_context( || format!( "Failed to write {:?}", path ) )?;
        Ok( path )
    }


    /// Overrides stored values with anything given on the command line.
    pub fn apply_args( &mut self, args: &Args ) {
        if let Some( hz ) = args.from {
            self.from_hz = hz;
        }
        if let Some( hz ) = args.to {
            self.to_hz = hz;
        }
        if let Some( ms ) = args.crossfade_ms {
            self.crossfade_ms = ms;
        }
        if let Some( ms ) = args.hold_ms {
            self.hold_ms = ms;
        }
        if let Some( volume ) = args.volume {
            self.volume = volume.clamp( 0.0, 1.0 );
        }
    }


    pub fn crossfade( &self ) -> Duration {
        Duration::from_millis( self.crossfade_ms )
    }


    pub fn hold( &self ) -> Duration {
        Duration::from_millis( self.hold_ms )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{ "crossfade_ms": 500, "fade": { "tick_interval_ms": 50 } }"#;
        let settings: Settings = serde_json::from_str( json ).unwrap();
        assert_eq!( settings.crossfade_ms, 500 );
        assert_eq!( settings.fade.tick_interval_ms, 50 );
        assert_eq!( settings.fade.max_concurrent_fades, 3 );
        assert_eq!( settings.hold_ms, Settings::default().hold_ms );
    }


    #[test]
    fn test_args_override_settings() {
        let mut settings = Settings::default();
        let args = Args {
            to: Some( 880.0 ),
            crossfade_ms: Some( 250 ),
            volume: Some( 1.7 ),
            ..Args::default()
        };
        settings.apply_args( &args );

        assert_eq!( settings.from_hz, 440.0 );
        assert_eq!( settings.to_hz, 880.0 );
        assert_eq!( settings.crossfade(), Duration::from_millis( 250 ) );
        assert_eq!( settings.volume, 1.0 );
    }
}
