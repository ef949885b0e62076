//! Collaborator capabilities
//!
//! The crossfader never owns the objects it fades. It talks to them through
//! these narrow traits: the transport reports global volume and mute state,
//! outputs expose volume and transport controls, and players can be destroyed
//! once their fade-out has finished.

use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };


/// Source of the global volume and mute state.
pub trait Transport: Send + Sync {
    /// Current global volume (0.0 = silent, 1.0 = normal).
    fn volume( &self ) -> f64;

    /// Returns true if playback is muted.
    fn is_muted( &self ) -> bool;
}


/// An audio output whose volume the crossfader ramps.
pub trait Output: Send + Sync {
    fn set_volume( &self, volume: f64 );
    fn pause( &self );
    fn resume( &self );
    fn stop( &self );
}


/// The player owning an output. Destroyed when its fade-out completes.
pub trait Player: Send + Sync {
    fn destroy( &self );
}


/// Lock-free transport backed by atomics.
///
/// Volume is stored as f64 bits so it can be read from the tick thread
/// without taking a lock.
#[derive( Debug )]
pub struct SharedTransport {
    volume: AtomicU64,
    muted: AtomicBool,
}


impl SharedTransport {
    /// Creates a transport at the given volume, unmuted.
    pub fn new( volume: f64 ) -> Self {
        Self {
            volume: AtomicU64::new( volume.to_bits() ),
            muted: AtomicBool::new( false ),
        }
    }


    /// Sets the global volume (0.0 = mute, 1.0 = normal, >1.0 = boost).
    pub fn set_volume( &self, volume: f64 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
    }


    pub fn set_muted( &self, muted: bool ) {
        self.muted.store( muted, Ordering::Relaxed );
    }
}


impl Default for SharedTransport {
    fn default() -> Self {
        Self::new( 1.0 )
    }
}


impl Transport for SharedTransport {
    fn volume( &self ) -> f64 {
        f64::from_bits( self.volume.load( Ordering::Relaxed ) )
    }


    fn is_muted( &self ) -> bool {
        self.muted.load( Ordering::Relaxed )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_shared_transport_defaults() {
        let transport = SharedTransport::default();
        assert_eq!( transport.volume(), 1.0 );
        assert!( !transport.is_muted() );
    }


    #[test]
    fn test_shared_transport_updates() {
        let transport = SharedTransport::new( 0.5 );
        transport.set_volume( 0.25 );
        transport.set_muted( true );
        assert_eq!( transport.volume(), 0.25 );
        assert!( transport.is_muted() );
    }
}
