//! Recording collaborators for unit tests.

use std::sync::Arc;
use std::sync::atomic::{ AtomicUsize, Ordering };

use parking_lot::Mutex;

use crate::capability::{ Output, Player };


#[derive( Debug, Clone, Copy, PartialEq )]
pub enum Call {
    SetVolume( f64 ),
    Pause,
    Resume,
    Stop,
}


/// Extracts the volume writes from a call log, in order.
pub fn volumes( calls: &[Call] ) -> Vec<f64> {
    calls
        .iter()
        .filter_map( |c| match c {
            Call::SetVolume( v ) => Some( *v ),
            _ => None,
        })
        .collect()
}


#[derive( Default )]
pub struct MockOutput {
    calls: Mutex<Vec<Call>>,
}


impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new( Self::default() )
    }


    pub fn as_dyn( self: &Arc<Self> ) -> Arc<dyn Output> {
        Arc::clone( self ) as Arc<dyn Output>
    }


    pub fn calls( &self ) -> Vec<Call> {
        self.calls.lock().clone()
    }


    pub fn count( &self, call: Call ) -> usize {
        self.calls.lock().iter().filter( |c| **c == call ).count()
    }
}


impl Output for MockOutput {
    fn set_volume( &self, volume: f64 ) {
        self.calls.lock().push( Call::SetVolume( volume ) );
    }


    fn pause( &self ) {
        self.calls.lock().push( Call::Pause );
    }


    fn resume( &self ) {
        self.calls.lock().push( Call::Resume );
    }


    fn stop( &self ) {
        self.calls.lock().push( Call::Stop );
    }
}


#[derive( Default )]
pub struct MockPlayer {
    destroyed: AtomicUsize,
}


impl MockPlayer {
    pub fn new() -> Arc<Self> {
        Arc::new( Self::default() )
    }


    pub fn as_dyn( self: &Arc<Self> ) -> Arc<dyn Player> {
        Arc::clone( self ) as Arc<dyn Player>
    }


    pub fn destroy_count( &self ) -> usize {
        self.destroyed.load( Ordering::SeqCst )
    }
}


impl Player for MockPlayer {
    fn destroy( &self ) {
        self.destroyed.fetch_add( 1, Ordering::SeqCst );
    }
}
