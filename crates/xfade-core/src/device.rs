//! Audio output via cpal
//!
//! A small tone mixer used to hear fades on a real device. Each `ToneVoice`
//! is an `Output` the crossfader can ramp; the device callback sums every
//! live voice into one stream.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use parking_lot::Mutex;
use thiserror::Error;

use crate::capability::Output;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Peak amplitude of a voice at full volume, leaves headroom for two voices.
const VOICE_AMPLITUDE: f32 = 0.25;


/// A sine tone whose volume and transport are driven from any thread.
pub struct ToneVoice {
    frequency: f32,
    /// Volume level stored as f32 bits
    volume: AtomicU32,
    paused: AtomicBool,
    stopped: AtomicBool,
    /// Oscillator phase in radians stored as f32 bits; only the audio
    /// callback touches it
    phase: AtomicU32,
}


impl ToneVoice {
    /// Creates a silent voice at `frequency` Hz.
    pub fn new( frequency: f32 ) -> Self {
        Self {
            frequency,
            volume: AtomicU32::new( 0.0_f32.to_bits() ),
            paused: AtomicBool::new( false ),
            stopped: AtomicBool::new( false ),
            phase: AtomicU32::new( 0.0_f32.to_bits() ),
        }
    }


    pub fn frequency( &self ) -> f32 {
        self.frequency
    }


    pub fn volume( &self ) -> f32 {
        f32::from_bits( self.volume.load( Ordering::Relaxed ) )
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    pub fn is_stopped( &self ) -> bool {
        self.stopped.load( Ordering::Relaxed )
    }


    /// Adds this voice into an interleaved buffer. Paused and stopped voices
    /// contribute nothing and do not advance their phase.
    pub fn render( &self, output: &mut [f32], channels: usize, sample_rate: u32 ) {
        if self.is_paused() || self.is_stopped() || channels == 0 {
            return;
        }

        let gain = self.volume() * VOICE_AMPLITUDE;
        let step = TAU * self.frequency / sample_rate as f32;
        let mut phase = f32::from_bits( self.phase.load( Ordering::Relaxed ) );

        for frame in output.chunks_mut( channels ) {
            let sample = phase.sin() * gain;
            for s in frame.iter_mut() {
                *s += sample;
            }
            phase = ( phase + step ) % TAU;
        }

        self.phase.store( phase.to_bits(), Ordering::Relaxed );
    }
}


impl Output for ToneVoice {
    fn set_volume( &self, volume: f64 ) {
        let volume = volume.max( 0.0 ) as f32;
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }


    fn pause( &self ) {
        self.paused.store( true, Ordering::Relaxed );
    }


    fn resume( &self ) {
        self.paused.store( false, Ordering::Relaxed );
    }


    fn stop( &self ) {
        self.stopped.store( true, Ordering::Relaxed );
        tracing::debug!( "Voice stopped: {} Hz", self.frequency );
    }
}


/// Sums tone voices for one output stream.
pub struct DeviceMixer {
    voices: Mutex<Vec<Arc<ToneVoice>>>,
    sample_rate: u32,
    channels: u16,
}


/// Keeps the device stream alive. Not Send: keep it on the thread that
/// opened it, and drop it to close the device.
pub struct DeviceStream {
    #[allow( dead_code )] // Kept alive for its Drop impl which stops the audio stream
    stream: cpal::Stream,
}


impl DeviceMixer {
    /// Creates a mixer for the given stream format without opening a device.
    pub fn new( sample_rate: u32, channels: u16 ) -> Self {
        Self {
            voices: Mutex::new( Vec::new() ),
            sample_rate,
            channels,
        }
    }


    /// Opens the default output device and starts a stream fed by a new mixer.
    pub fn open() -> Result<( Arc<Self>, DeviceStream ), OutputError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let config = device
            .default_output_config()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .config();

        tracing::info!(
            "Audio output config: {} Hz, {} channels",
            config.sample_rate.0,
            config.channels
        );

        let mixer = Arc::new( Self::new( config.sample_rate.0, config.channels ) );
        let mixer_clone = Arc::clone( &mixer );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mixer_clone.mix( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        stream
            .play()
            .map_err( |e| OutputError::PlayStream( e.to_string() ) )?;

        Ok( ( mixer, DeviceStream { stream } ) )
    }


    /// Adds a silent voice at `frequency` Hz.
    pub fn voice( &self, frequency: f32 ) -> Arc<ToneVoice> {
        let voice = Arc::new( ToneVoice::new( frequency ) );
        self.voices.lock().push( Arc::clone( &voice ) );
        voice
    }


    /// Fills `output` with the sum of all live voices. Stopped voices are
    /// dropped from the mix.
    pub fn mix( &self, output: &mut [f32] ) {
        output.fill( 0.0 );

        let mut voices = self.voices.lock();
        voices.retain( |v| !v.is_stopped() );
        for voice in voices.iter() {
            voice.render( output, self.channels as usize, self.sample_rate );
        }
    }


    /// Number of voices still in the mix.
    pub fn voice_count( &self ) -> usize {
        self.voices.lock().len()
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn peak( samples: &[f32] ) -> f32 {
        samples.iter().fold( 0.0_f32, |acc, s| acc.max( s.abs() ) )
    }


    #[test]
    fn test_new_voice_is_silent() {
        let mixer = DeviceMixer::new( 48_000, 2 );
        let _voice = mixer.voice( 440.0 );

        let mut buf = vec![ 1.0; 512 ];
        mixer.mix( &mut buf );
        assert_eq!( peak( &buf ), 0.0 );
    }


    #[test]
    fn test_volume_scales_output() {
        let mixer = DeviceMixer::new( 48_000, 2 );
        let voice = mixer.voice( 440.0 );
        voice.set_volume( 1.0 );

        let mut buf = vec![ 0.0; 4800 ];
        mixer.mix( &mut buf );
        let full = peak( &buf );
        assert!( full > 0.2 && full <= VOICE_AMPLITUDE );

        voice.set_volume( 0.5 );
        mixer.mix( &mut buf );
        assert!( peak( &buf ) <= full * 0.5 + 1e-6 );
    }


    #[test]
    fn test_stereo_frames_are_duplicated() {
        let mixer = DeviceMixer::new( 48_000, 2 );
        let voice = mixer.voice( 1000.0 );
        voice.set_volume( 1.0 );

        let mut buf = vec![ 0.0; 64 ];
        mixer.mix( &mut buf );
        for frame in buf.chunks( 2 ) {
            assert_eq!( frame[ 0 ], frame[ 1 ] );
        }
    }


    #[test]
    fn test_paused_voice_is_silent_until_resumed() {
        let mixer = DeviceMixer::new( 48_000, 1 );
        let voice = mixer.voice( 440.0 );
        voice.set_volume( 1.0 );
        voice.pause();

        let mut buf = vec![ 0.0; 480 ];
        mixer.mix( &mut buf );
        assert_eq!( peak( &buf ), 0.0 );

        voice.resume();
        mixer.mix( &mut buf );
        assert!( peak( &buf ) > 0.0 );
    }


    #[test]
    fn test_stopped_voice_is_pruned() {
        let mixer = DeviceMixer::new( 48_000, 2 );
        let keep = mixer.voice( 440.0 );
        let gone = mixer.voice( 660.0 );
        gone.stop();

        let mut buf = vec![ 0.0; 32 ];
        mixer.mix( &mut buf );
        assert_eq!( mixer.voice_count(), 1 );
        assert!( !keep.is_stopped() );
    }


    #[test]
    fn test_phase_continues_across_buffers() {
        let voice = ToneVoice::new( 1000.0 );
        voice.set_volume( 1.0 );

        let mut whole = vec![ 0.0; 96 ];
        voice.render( &mut whole, 1, 48_000 );

        let continued = ToneVoice::new( 1000.0 );
        continued.set_volume( 1.0 );
        let mut first = vec![ 0.0; 48 ];
        let mut second = vec![ 0.0; 48 ];
        continued.render( &mut first, 1, 48_000 );
        continued.render( &mut second, 1, 48_000 );

        assert_eq!( &whole[ ..48 ], &first[ .. ] );
        assert_eq!( &whole[ 48.. ], &second[ .. ] );
    }


    #[test]
    fn test_negative_volume_clamps_to_zero() {
        let voice = ToneVoice::new( 440.0 );
        voice.set_volume( -0.5 );
        assert_eq!( voice.volume(), 0.0 );
    }
}
