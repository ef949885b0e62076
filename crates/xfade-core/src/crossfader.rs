//! Crossfade scheduler
//!
//! The Crossfader owns the list of in-flight fades and a background thread
//! that advances them on a fixed cadence. Control calls may come from any
//! thread; they and the tick handler are serialised by one reentrant lock, so
//! a collaborator that calls back into the crossfader from `destroy`, `stop`
//! or its own `Drop` re-enters safely. Collaborator code, including the drop
//! of a removed fade, only runs once the state borrow has been released.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use parking_lot::ReentrantMutex;
use thiserror::Error;

use crate::capability::{ Output, Player, Transport };
use crate::config::FadeConfig;
use crate::fade::{ Direction, Effect, FadeList, FadeStart };
use crate::queue::MessageQueue;


/// Errors that can occur while setting up a crossfader.
#[derive( Debug, Error )]
pub enum CrossfadeError {
    #[error( "Failed to spawn crossfader thread: {0}" )]
    Spawn( #[from] std::io::Error ),
}


/// Scheduled tick, tagged with the epoch it was posted for.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
struct Tick {
    epoch: u64,
}


/// State guarded by the crossfader lock.
struct FadeState {
    fades: FadeList,
    paused: bool,
    /// Bumped whenever the pending tick is replaced or cancelled. A tick
    /// carrying an older epoch is stale and does nothing.
    epoch: u64,
}


/// State shared between the public handle and the tick thread.
struct Shared {
    transport: Arc<dyn Transport>,
    config: FadeConfig,
    state: ReentrantMutex<RefCell<FadeState>>,
    queue: MessageQueue<Tick>,
    quit: AtomicBool,
}


impl Shared {
    /// Replaces any pending tick with one due after `delay`.
    /// Caller must hold the state lock.
    fn schedule_tick( &self, state: &mut FadeState, delay: Duration ) {
        self.queue.remove( |_| true );
        state.epoch += 1;
        self.queue.post( Tick { epoch: state.epoch }, delay );
    }


    /// Drops the pending tick, if any. Caller must hold the state lock.
    fn cancel_tick( &self, state: &mut FadeState ) {
        self.queue.remove( |_| true );
        state.epoch += 1;
    }


    /// Tick thread main loop.
    fn run( &self ) {
        tracing::debug!( "Crossfader thread started" );

        while !self.quit.load( Ordering::Acquire ) {
            if !self.queue.wait_and_dispatch( |tick| self.on_tick( tick ) ) {
                break;
            }
        }

        tracing::debug!( "Crossfader thread exiting" );
    }


    /// Advances every fade by one step and reschedules while any remain.
    fn on_tick( &self, tick: Tick ) {
        let guard = self.state.lock();

        {
            let state = guard.borrow();
            if state.paused || state.epoch != tick.epoch {
                return;
            }
        }

        // One snapshot for every fade in this tick
        let global_volume = self.transport.volume();
        let muted = self.transport.is_muted();

        let effects = guard.borrow_mut().fades.tick( global_volume, muted );
        effects.into_iter().for_each( Effect::apply );

        // A callback above may have paused, stopped or restarted the chain;
        // a changed epoch means someone else owns scheduling now.
        let mut state = guard.borrow_mut();
        if state.epoch == tick.epoch && !state.fades.is_empty() {
            self.schedule_tick( &mut state, self.config.tick_interval() );
        }
    }
}


/// Tick-driven fade scheduler.
pub struct Crossfader {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}


impl Crossfader {
    /// Creates a crossfader with the default configuration (100 ms ticks,
    /// at most 3 concurrent fades).
    pub fn new( transport: Arc<dyn Transport> ) -> Result<Self, CrossfadeError> {
        Self::with_config( transport, FadeConfig::default() )
    }


    /// Creates a crossfader and starts its tick thread.
    pub fn with_config(
        transport: Arc<dyn Transport>,
        config: FadeConfig,
    ) -> Result<Self, CrossfadeError> {
        let shared = Arc::new( Shared {
            transport,
            config,
            state: ReentrantMutex::new( RefCell::new( FadeState {
                fades: FadeList::new( config.max_concurrent_fades ),
                paused: false,
                epoch: 0,
            })),
            queue: MessageQueue::new(),
            quit: AtomicBool::new( false ),
        });

        let worker = Arc::clone( &shared );
        let thread = thread::Builder::new()
            .name( "xfade-crossfader".into() )
            .spawn( move || worker.run() )?;

        tracing::info!(
            "Crossfader started: {:?} ticks, max {} fades",
            config.tick_interval(),
            config.max_concurrent_fades
        );

        Ok( Self {
            shared,
            thread: Some( thread ),
        })
    }


    /// Starts fading `output` in or out over `duration`.
    ///
    /// Ignored if `player` already has a fade in progress.
    pub fn fade(
        &self,
        player: &Arc<dyn Player>,
        output: Arc<dyn Output>,
        direction: Direction,
        duration: Duration,
    ) {
        let guard = self.shared.state.lock();
        let ticks = self.shared.config.ticks_for( duration );

        let rejected = {
            let mut state = guard.borrow_mut();
            match state.fades.start( player, output, direction, ticks ) {
                Err( output ) => {
                    tracing::debug!( "Fade ignored: player already fading" );
                    Some( output )
                }
                Ok( FadeStart::First ) => {
                    tracing::debug!( "Fade started: {:?} over {} ticks", direction, ticks );
                    self.shared.schedule_tick( &mut state, self.shared.config.tick_interval() );
                    None
                }
                Ok( FadeStart::Added ) => {
                    tracing::debug!(
                        "Fade started: {:?} over {} ticks ({} active)",
                        direction,
                        ticks,
                        state.fades.len()
                    );
                    None
                }
            }
        };

        drop( rejected );
    }


    /// Ends every fade now: destroys players that are still present and
    /// stops every output.
    pub fn stop( &self ) {
        let guard = self.shared.state.lock();

        let effects = {
            let mut state = guard.borrow_mut();
            self.shared.cancel_tick( &mut state );
            state.fades.drain()
        };

        if !effects.is_empty() {
            tracing::debug!( "Stopping {} fades", effects.len() );
        }
        effects.into_iter().for_each( Effect::apply );
    }


    /// Forgets every fade without touching outputs or players.
    pub fn reset( &self ) {
        let guard = self.shared.state.lock();

        let forgotten = {
            let mut state = guard.borrow_mut();
            self.shared.cancel_tick( &mut state );
            state.fades.clear()
        };

        drop( forgotten );
    }


    /// Removes the fade for `player` in `direction`, leaving its output and
    /// player untouched.
    pub fn cancel( &self, player: &Arc<dyn Player>, direction: Direction ) {
        let guard = self.shared.state.lock();
        let removed = guard.borrow_mut().fades.cancel( player, direction );
        if !removed.is_empty() {
            tracing::debug!( "Fade cancelled: {:?}", direction );
        }
        drop( removed );
    }


    /// Notifies the crossfader that `player` is gone. Its fade keeps running
    /// but will no longer try to destroy it.
    pub fn on_player_destroyed( &self, player: &Arc<dyn Player> ) {
        let guard = self.shared.state.lock();
        guard.borrow_mut().fades.detach_player( player );
    }


    /// Returns true if `player` has a fade in progress.
    pub fn contains( &self, player: &Arc<dyn Player> ) -> bool {
        let guard = self.shared.state.lock();
        let contains = guard.borrow().fades.contains( player );
        contains
    }


    /// Freezes every fade and pauses its output.
    pub fn pause( &self ) {
        let guard = self.shared.state.lock();

        let outputs = {
            let mut state = guard.borrow_mut();
            state.paused = true;
            self.shared.cancel_tick( &mut state );
            state.fades.outputs()
        };

        tracing::debug!( "Crossfader paused ({} fades)", outputs.len() );
        for output in outputs {
            output.pause();
        }
    }


    /// Resumes every output and continues fading on the next tick.
    pub fn resume( &self ) {
        let guard = self.shared.state.lock();

        let outputs = {
            let mut state = guard.borrow_mut();
            state.paused = false;
            state.fades.outputs()
        };

        tracing::debug!( "Crossfader resumed ({} fades)", outputs.len() );
        for output in outputs {
            output.resume();
        }

        let mut state = guard.borrow_mut();
        if !state.paused {
            self.shared.schedule_tick( &mut state, Duration::ZERO );
        }
    }


    pub fn is_paused( &self ) -> bool {
        let guard = self.shared.state.lock();
        let paused = guard.borrow().paused;
        paused
    }


    /// Number of fades in the list, including ones forced to complete that
    /// have not been cleaned up yet.
    pub fn len( &self ) -> usize {
        let guard = self.shared.state.lock();
        let len = guard.borrow().fades.len();
        len
    }


    pub fn is_empty( &self ) -> bool {
        self.len() == 0
    }


    pub fn config( &self ) -> FadeConfig {
        self.shared.config
    }
}


impl Drop for Crossfader {
    fn drop( &mut self ) {
        self.shared.quit.store( true, Ordering::Release );
        self.shared.queue.shutdown();

        if let Some( thread ) = self.thread.take() {
            // Dropped from a fade callback on the tick thread itself
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::warn!( "Crossfader thread panicked" );
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::capability::SharedTransport;
    use crate::testing::{ volumes, Call, MockOutput, MockPlayer };

    use std::sync::{ OnceLock, Weak };
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use approx::assert_relative_eq;


    fn crossfader( transport: &Arc<SharedTransport>, tick_ms: u64 ) -> Crossfader {
        let config = FadeConfig { tick_interval_ms: tick_ms, ..FadeConfig::default() };
        Crossfader::with_config( Arc::clone( transport ) as Arc<dyn Transport>, config ).unwrap()
    }


    fn wait_until( condition: impl Fn() -> bool ) -> bool {
        let deadline = Instant::now() + Duration::from_secs( 5 );
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep( Duration::from_millis( 1 ) );
        }
        condition()
    }


    #[test]
    fn test_fade_out_runs_to_completion() {
        let transport = Arc::new( SharedTransport::new( 1.0 ) );
        let xfade = crossfader( &transport, 10 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, Duration::from_millis( 30 ) );
        assert!( xfade.contains( &player.as_dyn() ) );
        assert!( wait_until( || xfade.is_empty() ) );

        let vols = volumes( &output.calls() );
        assert_eq!( vols.len(), 3 );
        assert_relative_eq!( vols[ 0 ], 0.667, epsilon = 1e-3 );
        assert_relative_eq!( vols[ 1 ], 0.333, epsilon = 1e-3 );
        assert_relative_eq!( vols[ 2 ], 0.0, epsilon = 1e-9 );
        assert_eq!( player.destroy_count(), 1 );
        assert_eq!( output.count( Call::Stop ), 1 );
        assert!( !xfade.contains( &player.as_dyn() ) );
    }


    #[test]
    fn test_zero_duration_completes_without_steps() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, Duration::ZERO );
        assert!( wait_until( || xfade.is_empty() ) );

        assert_eq!( output.calls(), vec![ Call::Stop ] );
        assert_eq!( player.destroy_count(), 1 );
    }


    #[test]
    fn test_fade_in_uses_global_volume() {
        let transport = Arc::new( SharedTransport::new( 0.5 ) );
        let xfade = crossfader( &transport, 5 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_millis( 20 ) );
        assert!( wait_until( || xfade.is_empty() ) );

        let vols = volumes( &output.calls() );
        assert_eq!( vols.len(), 4 );
        assert!( vols.windows( 2 ).all( |w| w[ 0 ] < w[ 1 ] ) );
        assert_relative_eq!( vols[ 3 ], 0.5, epsilon = 1e-9 );
        assert_eq!( output.count( Call::Stop ), 0 );
        assert_eq!( player.destroy_count(), 0 );
    }


    #[test]
    fn test_muted_transport_silences_fades() {
        let transport = Arc::new( SharedTransport::new( 1.0 ) );
        transport.set_muted( true );
        let xfade = crossfader( &transport, 5 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_millis( 15 ) );
        assert!( wait_until( || xfade.is_empty() ) );

        assert_eq!( volumes( &output.calls() ), vec![ 0.0, 0.0, 0.0 ] );
    }


    #[test]
    fn test_duplicate_fade_is_ignored() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10_000 );
        let player = MockPlayer::new();
        let first = MockOutput::new();
        let second = MockOutput::new();

        xfade.fade( &player.as_dyn(), first.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.fade( &player.as_dyn(), second.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );

        assert_eq!( xfade.len(), 1 );
        xfade.stop();
        assert_eq!( first.count( Call::Stop ), 1 );
        assert!( second.calls().is_empty() );
    }


    #[test]
    fn test_cancel_invokes_no_side_effects() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10_000 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );
        xfade.cancel( &player.as_dyn(), Direction::FadeOut );
        assert!( xfade.contains( &player.as_dyn() ) );

        xfade.cancel( &player.as_dyn(), Direction::FadeIn );
        assert!( !xfade.contains( &player.as_dyn() ) );
        assert!( output.calls().is_empty() );
        assert_eq!( player.destroy_count(), 0 );
    }


    #[test]
    fn test_stop_destroys_and_stops_everything() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10_000 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        xfade.fade( &a.as_dyn(), out_a.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );
        xfade.fade( &b.as_dyn(), out_b.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.on_player_destroyed( &b.as_dyn() );
        xfade.stop();

        assert!( xfade.is_empty() );
        assert_eq!( a.destroy_count(), 1 );
        assert_eq!( b.destroy_count(), 0 );
        assert_eq!( out_a.calls(), vec![ Call::Stop ] );
        assert_eq!( out_b.calls(), vec![ Call::Stop ] );
    }


    #[test]
    fn test_reset_has_no_side_effects() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10_000 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.reset();

        assert!( xfade.is_empty() );
        assert!( output.calls().is_empty() );
        assert_eq!( player.destroy_count(), 0 );
    }


    #[test]
    fn test_pause_freezes_progress() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 20 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_millis( 200 ) );
        assert!( wait_until( || volumes( &output.calls() ).len() >= 2 ) );

        xfade.pause();
        assert!( xfade.is_paused() );
        let frozen = volumes( &output.calls() ).len();
        assert_eq!( output.count( Call::Pause ), 1 );

        thread::sleep( Duration::from_millis( 100 ) );
        assert_eq!( volumes( &output.calls() ).len(), frozen );

        xfade.resume();
        assert!( !xfade.is_paused() );
        assert_eq!( output.count( Call::Resume ), 1 );
        assert!( wait_until( || xfade.is_empty() ) );

        let vols = volumes( &output.calls() );
        assert_eq!( vols.len(), 10 );
        assert!( vols.windows( 2 ).all( |w| w[ 0 ] < w[ 1 ] ) );
        assert_relative_eq!( vols[ 9 ], 1.0, epsilon = 1e-9 );
    }


    #[test]
    fn test_capacity_forces_oldest_fade_out() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10 );
        let players: Vec<_> = ( 0..4 ).map( |_| MockPlayer::new() ).collect();
        let outputs: Vec<_> = ( 0..4 ).map( |_| MockOutput::new() ).collect();

        for ( player, output ) in players.iter().zip( &outputs ) {
            xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        }

        assert!( wait_until( || players[ 0 ].destroy_count() == 1 ) );
        assert_eq!( outputs[ 0 ].count( Call::Stop ), 1 );
        assert!( volumes( &outputs[ 0 ].calls() ).is_empty() );
        assert!( !xfade.contains( &players[ 0 ].as_dyn() ) );
        assert_eq!( xfade.len(), 3 );
        for player in &players[ 1.. ] {
            assert!( xfade.contains( &player.as_dyn() ) );
            assert_eq!( player.destroy_count(), 0 );
        }
    }


    /// Player that reports its own destruction back to the crossfader, the
    /// way a real player notifies its owner.
    struct SelfReportingPlayer {
        me: Weak<SelfReportingPlayer>,
        crossfader: OnceLock<Weak<Crossfader>>,
        destroyed: AtomicUsize,
        still_contained: AtomicBool,
    }


    impl Player for SelfReportingPlayer {
        fn destroy( &self ) {
            self.destroyed.fetch_add( 1, Ordering::SeqCst );
            let me = self.me.upgrade();
            let crossfader = self.crossfader.get().and_then( Weak::upgrade );
            if let ( Some( me ), Some( crossfader ) ) = ( me, crossfader ) {
                let me: Arc<dyn Player> = me;
                crossfader.on_player_destroyed( &me );
                self.still_contained.store( crossfader.contains( &me ), Ordering::SeqCst );
            }
        }
    }


    fn self_reporting( xfade: &Arc<Crossfader> ) -> Arc<SelfReportingPlayer> {
        let player = Arc::new_cyclic( |me| SelfReportingPlayer {
            me: me.clone(),
            crossfader: OnceLock::new(),
            destroyed: AtomicUsize::new( 0 ),
            still_contained: AtomicBool::new( true ),
        });
        let _ = player.crossfader.set( Arc::downgrade( xfade ) );
        player
    }


    #[test]
    fn test_reentrant_destroy_from_stop() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 10_000 ) );
        let player = self_reporting( &xfade );
        let output = MockOutput::new();

        let as_dyn: Arc<dyn Player> = player.clone();
        xfade.fade( &as_dyn, output.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.stop();

        assert_eq!( player.destroyed.load( Ordering::SeqCst ), 1 );
        assert!( !player.still_contained.load( Ordering::SeqCst ) );
        assert_eq!( output.count( Call::Stop ), 1 );
    }


    #[test]
    fn test_reentrant_destroy_from_tick() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 5 ) );
        let player = self_reporting( &xfade );
        let output = MockOutput::new();

        let as_dyn: Arc<dyn Player> = player.clone();
        xfade.fade( &as_dyn, output.as_dyn(), Direction::FadeOut, Duration::from_millis( 10 ) );

        assert!( wait_until( || output.count( Call::Stop ) == 1 ) );
        assert_eq!( player.destroyed.load( Ordering::SeqCst ), 1 );
        assert!( !player.still_contained.load( Ordering::SeqCst ) );
        assert!( xfade.is_empty() );
    }


    #[test]
    fn test_restart_after_stop_keeps_single_chain() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 40 );
        let first = MockPlayer::new();
        let second = MockPlayer::new();
        let out_first = MockOutput::new();
        let out_second = MockOutput::new();

        // stop, fade and resume each post a tick; only the last may survive
        xfade.fade( &first.as_dyn(), out_first.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );
        xfade.stop();
        xfade.fade( &second.as_dyn(), out_second.as_dyn(), Direction::FadeIn, Duration::from_millis( 400 ) );
        xfade.resume();
        let resumed = Instant::now();

        assert!( wait_until( || xfade.is_empty() ) );
        let elapsed = resumed.elapsed();

        // One immediate tick then nine full intervals. A second chain would
        // finish in about half the time.
        assert_eq!( volumes( &out_second.calls() ).len(), 10 );
        assert!( elapsed >= Duration::from_millis( 320 ), "finished after {:?}", elapsed );
    }


    #[test]
    fn test_resume_writes_once_then_waits_a_full_interval() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = crossfader( &transport, 10_000 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_secs( 600 ) );
        xfade.pause();
        xfade.resume();

        assert!( wait_until( || volumes( &output.calls() ).len() == 1 ) );
        thread::sleep( Duration::from_millis( 100 ) );
        assert_eq!( volumes( &output.calls() ).len(), 1 );
    }


    /// Player whose destruction stops the whole crossfader.
    struct StoppingPlayer {
        crossfader: OnceLock<Weak<Crossfader>>,
        destroyed: AtomicUsize,
    }


    impl Player for StoppingPlayer {
        fn destroy( &self ) {
            self.destroyed.fetch_add( 1, Ordering::SeqCst );
            if let Some( crossfader ) = self.crossfader.get().and_then( Weak::upgrade ) {
                crossfader.stop();
            }
        }
    }


    #[test]
    fn test_stop_from_tick_callback_ends_chain() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 10 ) );
        let stopping = Arc::new( StoppingPlayer {
            crossfader: OnceLock::new(),
            destroyed: AtomicUsize::new( 0 ),
        });
        let _ = stopping.crossfader.set( Arc::downgrade( &xfade ) );
        let other = MockPlayer::new();
        let out_stopping = MockOutput::new();
        let out_other = MockOutput::new();

        let stopping_dyn: Arc<dyn Player> = stopping.clone();
        xfade.fade( &stopping_dyn, out_stopping.as_dyn(), Direction::FadeOut, Duration::from_millis( 10 ) );
        xfade.fade( &other.as_dyn(), out_other.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );

        assert!( wait_until( || stopping.destroyed.load( Ordering::SeqCst ) == 1 ) );
        assert!( xfade.is_empty() );
        assert_eq!( out_stopping.count( Call::Stop ), 1 );
        assert_eq!( other.destroy_count(), 1 );
        assert_eq!( out_other.count( Call::Stop ), 1 );

        let calls = out_other.calls().len();
        thread::sleep( Duration::from_millis( 60 ) );
        assert_eq!( out_other.calls().len(), calls );
        assert_eq!( stopping.destroyed.load( Ordering::SeqCst ), 1 );

        // The tick thread survives and serves the next fade
        let next = MockOutput::new();
        xfade.fade( &other.as_dyn(), next.as_dyn(), Direction::FadeIn, Duration::from_millis( 20 ) );
        assert!( wait_until( || xfade.is_empty() ) );
        assert_eq!( volumes( &next.calls() ).len(), 2 );
    }


    /// Output that asks the crossfader about its player when the last
    /// reference to it goes away.
    struct QueryOnDropOutput {
        crossfader: Weak<Crossfader>,
        player: Arc<dyn Player>,
        dropped: Arc<AtomicBool>,
    }


    impl Output for QueryOnDropOutput {
        fn set_volume( &self, _volume: f64 ) {}
        fn pause( &self ) {}
        fn resume( &self ) {}
        fn stop( &self ) {}
    }


    impl Drop for QueryOnDropOutput {
        fn drop( &mut self ) {
            if let Some( crossfader ) = self.crossfader.upgrade() {
                crossfader.contains( &self.player );
            }
            self.dropped.store( true, Ordering::SeqCst );
        }
    }


    fn query_on_drop( xfade: &Arc<Crossfader>, player: &Arc<dyn Player> ) -> ( Arc<dyn Output>, Arc<AtomicBool> ) {
        let dropped = Arc::new( AtomicBool::new( false ) );
        let output = Arc::new( QueryOnDropOutput {
            crossfader: Arc::downgrade( xfade ),
            player: Arc::clone( player ),
            dropped: Arc::clone( &dropped ),
        });
        ( output, dropped )
    }


    #[test]
    fn test_output_dropped_by_cancel_may_call_back() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 10_000 ) );
        let player = MockPlayer::new().as_dyn();
        let ( output, dropped ) = query_on_drop( &xfade, &player );

        xfade.fade( &player, output, Direction::FadeIn, Duration::from_secs( 60 ) );
        xfade.cancel( &player, Direction::FadeIn );

        assert!( dropped.load( Ordering::SeqCst ) );
        assert!( !xfade.contains( &player ) );
    }


    #[test]
    fn test_output_dropped_by_reset_may_call_back() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 10_000 ) );
        let player = MockPlayer::new().as_dyn();
        let ( output, dropped ) = query_on_drop( &xfade, &player );

        xfade.fade( &player, output, Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.reset();

        assert!( dropped.load( Ordering::SeqCst ) );
        assert!( xfade.is_empty() );
    }


    #[test]
    fn test_rejected_output_may_call_back() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 10_000 ) );
        let player = MockPlayer::new().as_dyn();
        let first = MockOutput::new();
        let ( second, dropped ) = query_on_drop( &xfade, &player );

        xfade.fade( &player, first.as_dyn(), Direction::FadeOut, Duration::from_secs( 60 ) );
        xfade.fade( &player, second, Direction::FadeIn, Duration::from_secs( 60 ) );

        assert!( dropped.load( Ordering::SeqCst ) );
        assert_eq!( xfade.len(), 1 );
    }


    #[test]
    fn test_output_released_by_tick_may_call_back() {
        let transport = Arc::new( SharedTransport::default() );
        let xfade = Arc::new( crossfader( &transport, 5 ) );
        let player = MockPlayer::new().as_dyn();
        let ( output, dropped ) = query_on_drop( &xfade, &player );

        xfade.fade( &player, output, Direction::FadeIn, Duration::from_millis( 10 ) );
        assert!( wait_until( || dropped.load( Ordering::SeqCst ) ) );

        // Later fades still tick
        let next = MockOutput::new();
        xfade.fade( &player, next.as_dyn(), Direction::FadeIn, Duration::from_millis( 10 ) );
        assert!( wait_until( || xfade.is_empty() ) );
        assert_eq!( volumes( &next.calls() ).len(), 2 );
    }


    #[test]
    fn test_drop_stops_ticking() {
        let transport = Arc::new( SharedTransport::default() );
        let player = MockPlayer::new();
        let output = MockOutput::new();
        {
            let xfade = crossfader( &transport, 5 );
            xfade.fade( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, Duration::from_secs( 60 ) );
        }

        let after_drop = output.calls().len();
        thread::sleep( Duration::from_millis( 30 ) );
        assert_eq!( output.calls().len(), after_drop );
    }
}
