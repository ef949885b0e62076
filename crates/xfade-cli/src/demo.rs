//! Demo collaborators and the crossfade scenario.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, AtomicU64, Ordering };
use std::thread;
use std::time::{ Duration, Instant };

use xfade_core::{ Crossfader, Direction, Output, Player };


/// Stand-in for a track player. Destroying it only records the fact.
pub struct DemoPlayer {
    name: &'static str,
    destroyed: AtomicBool,
}


impl DemoPlayer {
    pub fn new( name: &'static str ) -> Arc<Self> {
        Arc::new( Self {
            name,
            destroyed: AtomicBool::new( false ),
        })
    }


    pub fn is_destroyed( &self ) -> bool {
        self.destroyed.load( Ordering::Relaxed )
    }
}


impl Player for DemoPlayer {
    fn destroy( &self ) {
        self.destroyed.store( true, Ordering::Relaxed );
        tracing::info!( "Player {} destroyed", self.name );
    }
}


/// Output that logs every control call instead of rendering audio.
pub struct LogOutput {
    name: &'static str,
    /// Last volume written, stored as f64 bits
    volume: AtomicU64,
}


impl LogOutput {
    pub fn new( name: &'static str ) -> Arc<Self> {
        Arc::new( Self {
            name,
            volume: AtomicU64::new( 0.0_f64.to_bits() ),
        })
    }


    pub fn volume( &self ) -> f64 {
        f64::from_bits( self.volume.load( Ordering::Relaxed ) )
    }
}


impl Output for LogOutput {
    fn set_volume( &self, volume: f64 ) {
        self.volume.store( volume.to_bits(), Ordering::Relaxed );
        tracing::info!( "{:>4} volume {:.3}", self.name, volume );
    }


    fn pause( &self ) {
        tracing::info!( "{:>4} paused", self.name );
    }


    fn resume( &self ) {
        tracing::info!( "{:>4} resumed", self.name );
    }


    fn stop( &self ) {
        tracing::info!( "{:>4} stopped", self.name );
    }
}


/// Timing of one demo run.
#[derive( Debug, Clone, Copy )]
pub struct Scenario {
    pub crossfade: Duration,
    pub hold: Duration,
    pub pause: Option<Duration>,
}


/// Polls until the crossfader has no fades left. Returns false on timeout.
pub fn wait_idle( crossfader: &Crossfader, timeout: Duration ) -> bool {
    let deadline = Instant::now() + timeout;
    while !crossfader.is_empty() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep( Duration::from_millis( 10 ) );
    }
    true
}


/// Fades `from` in, crossfades to `to`, then stops everything.
pub fn run(
    crossfader: &Crossfader,
    scenario: Scenario,
    from: Arc<dyn Output>,
    to: Arc<dyn Output>,
) {
    let timeout = scenario.crossfade * 2
        + scenario.pause.unwrap_or_default()
        + Duration::from_secs( 1 );

    let first = DemoPlayer::new( "A" );
    let second = DemoPlayer::new( "B" );
    let first_dyn: Arc<dyn Player> = first.clone();
    let second_dyn: Arc<dyn Player> = second.clone();

    tracing::info!( "Fading in A over {:?}", scenario.crossfade );
    crossfader.fade( &first_dyn, Arc::clone( &from ), Direction::FadeIn, scenario.crossfade );
    if !wait_idle( crossfader, timeout ) {
        tracing::warn!( "Fade-in did not finish in {:?}", timeout );
    }
    thread::sleep( scenario.hold );

    tracing::info!( "Crossfading A -> B over {:?}", scenario.crossfade );
    crossfader.fade( &first_dyn, from, Direction::FadeOut, scenario.crossfade );
    crossfader.fade( &second_dyn, Arc::clone( &to ), Direction::FadeIn, scenario.crossfade );

    if let Some( pause ) = scenario.pause {
        thread::sleep( scenario.crossfade / 2 );
        tracing::info!( "Pausing for {:?}", pause );
        crossfader.pause();
        thread::sleep( pause );
        crossfader.resume();
    }

    if !wait_idle( crossfader, timeout ) {
        tracing::warn!( "Crossfade did not finish in {:?}", timeout );
    }
    thread::sleep( scenario.hold );

    tracing::info!( "Fading out B over {:?}", scenario.crossfade );
    crossfader.fade( &second_dyn, to, Direction::FadeOut, scenario.crossfade );
    if !wait_idle( crossfader, timeout ) {
        tracing::warn!( "Fade-out did not finish in {:?}", timeout );
    }

    // Tears down anything a timeout left behind
    crossfader.stop();
    tracing::info!( "Done (A destroyed: {}, B destroyed: {})", first.is_destroyed(), second.is_destroyed() );
}


#[cfg( test )]
mod tests {
    use super::*;

    use xfade_core::{ FadeConfig, SharedTransport, Transport };


    #[test]
    fn test_scenario_crossfades_and_tears_down() {
        let transport: Arc<dyn Transport> = Arc::new( SharedTransport::new( 1.0 ) );
        let config = FadeConfig { tick_interval_ms: 5, ..FadeConfig::default() };
        let crossfader = Crossfader::with_config( transport, config ).unwrap();

        let from = LogOutput::new( "A" );
        let to = LogOutput::new( "B" );
        let scenario = Scenario {
            crossfade: Duration::from_millis( 25 ),
            hold: Duration::from_millis( 5 ),
            pause: Some( Duration::from_millis( 20 ) ),
        };

        run( &crossfader, scenario, from.clone(), to.clone() );

        assert!( crossfader.is_empty() );
        assert_eq!( from.volume(), 0.0 );
        assert_eq!( to.volume(), 0.0 );
    }
}
