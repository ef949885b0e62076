//! Fade contexts and the per-tick state machine
//!
//! A `FadeList` holds every in-flight fade in insertion order and advances
//! them one step per tick. Advancing never calls into collaborators directly:
//! it returns the `Effect`s to apply, so the caller can release its borrow of
//! the list before outputs and players run (and possibly call back in).
//! Removed fades are handed back the same way rather than dropped in place,
//! since dropping a fade may drop the last reference to its output.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{ Arc, Weak };

use crate::capability::{ Output, Player };


/// Which way a fade ramps the volume.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum Direction {
    FadeIn,
    FadeOut,
}


/// Side effect produced by the fade list, applied by the owner.
pub enum Effect {
    /// Write a new volume to an output.
    SetVolume { output: Arc<dyn Output>, volume: f64 },

    /// Tear down a finished fade: destroy the player if it is still around,
    /// then stop the output.
    Finish( FadeContext ),

    /// Let go of a finished fade-in without touching its output.
    Release( FadeContext ),
}


impl Effect {
    /// Invokes the collaborator calls this effect describes.
    pub fn apply( self ) {
        match self {
            Effect::SetVolume { output, volume } => {
                tracing::trace!( "Fade volume: {:.3}", volume );
                output.set_volume( volume );
            }
            Effect::Finish( context ) => {
                if let Some( player ) = context.player.as_ref().and_then( |weak| weak.upgrade() ) {
                    player.destroy();
                }
                context.output.stop();
            }
            Effect::Release( context ) => {
                tracing::trace!( "Fade-in complete after {} ticks", context.ticks_total );
            }
        }
    }
}


impl fmt::Debug for Effect {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            Effect::SetVolume { volume, .. } => {
                f.debug_struct( "SetVolume" ).field( "volume", volume ).finish()
            }
            Effect::Finish( context ) => f.debug_tuple( "Finish" ).field( context ).finish(),
            Effect::Release( context ) => f.debug_tuple( "Release" ).field( context ).finish(),
        }
    }
}


/// Progress record for one in-flight fade.
pub struct FadeContext {
    /// Non-owning; cleared when the host reports the player destroyed.
    player: Option<Weak<dyn Player>>,
    output: Arc<dyn Output>,
    direction: Direction,
    ticks_counted: u64,
    ticks_total: u64,
}


impl FadeContext {
    fn new(
        player: &Arc<dyn Player>,
        output: Arc<dyn Output>,
        direction: Direction,
        ticks_total: u64,
    ) -> Self {
        Self {
            player: Some( Arc::downgrade( player ) ),
            output,
            direction,
            ticks_counted: 0,
            ticks_total,
        }
    }


    pub fn direction( &self ) -> Direction {
        self.direction
    }


    pub fn ticks_counted( &self ) -> u64 {
        self.ticks_counted
    }


    pub fn ticks_total( &self ) -> u64 {
        self.ticks_total
    }


    /// Returns false once the player has been reported destroyed.
    pub fn has_player( &self ) -> bool {
        self.player.is_some()
    }


    pub fn is_complete( &self ) -> bool {
        self.ticks_counted >= self.ticks_total
    }


    /// Returns true if this fade belongs to `player` (pointer identity).
    fn targets( &self, player: &Arc<dyn Player> ) -> bool {
        self.player
            .as_ref()
            .is_some_and( |weak| std::ptr::addr_eq( weak.as_ptr(), Arc::as_ptr( player ) ) )
    }


    fn force_complete( &mut self ) {
        self.ticks_counted = self.ticks_total;
    }


    /// Advances one tick and returns the volume to write, or None if the
    /// fade had already reached its end.
    fn step( &mut self, global_volume: f64, muted: bool ) -> Option<f64> {
        if self.ticks_counted >= self.ticks_total {
            return None;
        }

        self.ticks_counted += 1;

        if muted {
            return Some( 0.0 );
        }

        let mut percent = self.ticks_counted as f64 / self.ticks_total as f64;
        if self.direction == Direction::FadeOut {
            percent = 1.0 - percent;
        }

        Some( global_volume * percent )
    }

}


impl fmt::Debug for FadeContext {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "FadeContext" )
            .field( "direction", &self.direction )
            .field( "ticks_counted", &self.ticks_counted )
            .field( "ticks_total", &self.ticks_total )
            .field( "has_player", &self.has_player() )
            .finish()
    }
}


/// Outcome of an accepted fade start request.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum FadeStart {
    /// Added to a list that was empty, so the tick chain must be started.
    First,

    /// Added alongside other fades.
    Added,
}


/// Ordered collection of fade contexts, oldest first.
#[derive( Debug )]
pub struct FadeList {
    contexts: VecDeque<FadeContext>,
    capacity: usize,
}


impl FadeList {
    /// Creates an empty list that keeps at most `capacity` fades in progress.
    pub fn new( capacity: usize ) -> Self {
        Self {
            contexts: VecDeque::new(),
            capacity,
        }
    }


    /// Adds a fade for `player` unless it already has one, in which case the
    /// output is handed back untouched as the error.
    ///
    /// When the list grows past capacity the oldest excess fades are marked
    /// complete; they are torn down on the next tick like any other finished
    /// fade.
    pub fn start(
        &mut self,
        player: &Arc<dyn Player>,
        output: Arc<dyn Output>,
        direction: Direction,
        ticks_total: u64,
    ) -> Result<FadeStart, Arc<dyn Output>> {
        if self.contains( player ) {
            return Err( output );
        }

        let was_empty = self.contexts.is_empty();
        self.contexts.push_back( FadeContext::new( player, output, direction, ticks_total ) );

        let excess = self.contexts.len().saturating_sub( self.capacity );
        for context in self.contexts.iter_mut().take( excess ) {
            context.force_complete();
        }

        Ok( if was_empty { FadeStart::First } else { FadeStart::Added } )
    }


    /// Returns true if any fade targets `player`.
    pub fn contains( &self, player: &Arc<dyn Player> ) -> bool {
        self.contexts.iter().any( |c| c.targets( player ) )
    }


    /// Removes fades matching both `player` and `direction` and returns them.
    /// No side effects.
    pub fn cancel( &mut self, player: &Arc<dyn Player>, direction: Direction ) -> Vec<FadeContext> {
        let ( removed, kept ): ( VecDeque<_>, VecDeque<_> ) = self
            .contexts
            .drain( .. )
            .partition( |c| c.targets( player ) && c.direction == direction );

        self.contexts = kept;
        removed.into()
    }


    /// Forgets `player` on every fade that targets it. The fades keep running.
    pub fn detach_player( &mut self, player: &Arc<dyn Player> ) -> usize {
        let mut detached = 0;
        for context in self.contexts.iter_mut().filter( |c| c.targets( player ) ) {
            context.player = None;
            detached += 1;
        }
        detached
    }


    /// Advances every fade by one tick.
    ///
    /// `global_volume` and `muted` are a single snapshot applied to all fades.
    /// Completed fades are moved into the effects; fade-outs as `Finish`,
    /// fade-ins as a silent `Release` after their last volume write.
    pub fn tick( &mut self, global_volume: f64, muted: bool ) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut running = VecDeque::with_capacity( self.contexts.len() );

        for mut fade in self.contexts.drain( .. ) {
            if let Some( volume ) = fade.step( global_volume, muted ) {
                effects.push( Effect::SetVolume { output: Arc::clone( &fade.output ), volume } );
            }

            if !fade.is_complete() {
                running.push_back( fade );
            } else if fade.direction == Direction::FadeOut {
                effects.push( Effect::Finish( fade ) );
            } else {
                effects.push( Effect::Release( fade ) );
            }
        }

        self.contexts = running;
        effects
    }


    /// Empties the list, returning a `Finish` effect for every fade regardless
    /// of direction.
    pub fn drain( &mut self ) -> Vec<Effect> {
        self.contexts.drain( .. ).map( Effect::Finish ).collect()
    }


    /// Empties the list without producing any effects. The removed fades are
    /// returned so the caller picks where they are dropped.
    pub fn clear( &mut self ) -> Vec<FadeContext> {
        self.contexts.drain( .. ).collect()
    }


    /// Outputs of every fade, oldest first.
    pub fn outputs( &self ) -> Vec<Arc<dyn Output>> {
        self.contexts.iter().map( |c| Arc::clone( &c.output ) ).collect()
    }


    pub fn iter( &self ) -> impl Iterator<Item = &FadeContext> {
        self.contexts.iter()
    }


    pub fn len( &self ) -> usize {
        self.contexts.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.contexts.is_empty()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::testing::{ volumes, Call, MockOutput, MockPlayer };

    use approx::assert_relative_eq;


    fn apply_all( effects: Vec<Effect> ) {
        effects.into_iter().for_each( Effect::apply );
    }


    #[test]
    fn test_fade_out_volume_sequence() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        assert_eq!( list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, 3 ).ok(), Some( FadeStart::First ) );

        for _ in 0..3 {
            apply_all( list.tick( 1.0, false ) );
        }

        let vols = volumes( &output.calls() );
        assert_eq!( vols.len(), 3 );
        assert_relative_eq!( vols[ 0 ], 2.0 / 3.0, epsilon = 1e-9 );
        assert_relative_eq!( vols[ 1 ], 1.0 / 3.0, epsilon = 1e-9 );
        assert_relative_eq!( vols[ 2 ], 0.0, epsilon = 1e-9 );

        assert_eq!( player.destroy_count(), 1 );
        assert_eq!( output.count( Call::Stop ), 1 );
        assert!( list.is_empty() );
    }


    #[test]
    fn test_fade_in_rises_and_ends_silently() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, 4 );
        for _ in 0..4 {
            apply_all( list.tick( 0.8, false ) );
        }

        let vols = volumes( &output.calls() );
        assert_eq!( vols.len(), 4 );
        assert!( vols.windows( 2 ).all( |w| w[ 0 ] < w[ 1 ] ) );
        assert_relative_eq!( vols[ 3 ], 0.8, epsilon = 1e-9 );

        assert_eq!( player.destroy_count(), 0 );
        assert_eq!( output.count( Call::Stop ), 0 );
        assert!( list.is_empty() );
    }


    #[test]
    fn test_zero_duration_completes_on_first_tick() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, 0 );
        apply_all( list.tick( 1.0, false ) );

        assert!( volumes( &output.calls() ).is_empty() );
        assert_eq!( player.destroy_count(), 1 );
        assert_eq!( output.count( Call::Stop ), 1 );
        assert!( list.is_empty() );
    }


    #[test]
    fn test_muted_transport_writes_zero() {
        let mut list = FadeList::new( 3 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        list.start( &a.as_dyn(), out_a.as_dyn(), Direction::FadeIn, 5 );
        list.start( &b.as_dyn(), out_b.as_dyn(), Direction::FadeOut, 5 );
        apply_all( list.tick( 1.0, true ) );
        apply_all( list.tick( 1.0, true ) );

        assert_eq!( volumes( &out_a.calls() ), vec![ 0.0, 0.0 ] );
        assert_eq!( volumes( &out_b.calls() ), vec![ 0.0, 0.0 ] );
        assert!( list.iter().all( |c| c.ticks_counted() == 2 ) );
    }


    #[test]
    fn test_finished_fades_leave_through_effects() {
        let mut list = FadeList::new( 3 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        list.start( &a.as_dyn(), out_a.as_dyn(), Direction::FadeIn, 1 );
        list.start( &b.as_dyn(), out_b.as_dyn(), Direction::FadeOut, 1 );

        let effects = list.tick( 1.0, false );
        assert!( list.is_empty() );

        let kinds: Vec<_> = effects
            .iter()
            .map( |e| match e {
                Effect::SetVolume { .. } => "volume",
                Effect::Finish( _ ) => "finish",
                Effect::Release( _ ) => "release",
            })
            .collect();
        assert_eq!( kinds, vec![ "volume", "release", "volume", "finish" ] );

        // Outputs are still referenced until the effects are applied
        assert_eq!( Arc::strong_count( &out_a ), 3 );
        apply_all( effects );
        assert_eq!( Arc::strong_count( &out_a ), 1 );
        assert_eq!( Arc::strong_count( &out_b ), 1 );
    }


    #[test]
    fn test_clear_hands_back_every_fade() {
        let mut list = FadeList::new( 3 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        list.start( &a.as_dyn(), out_a.as_dyn(), Direction::FadeIn, 5 );
        list.start( &b.as_dyn(), out_b.as_dyn(), Direction::FadeOut, 5 );

        let removed = list.clear();
        assert!( list.is_empty() );
        assert_eq!( removed.len(), 2 );
        assert_eq!( removed[ 0 ].direction(), Direction::FadeIn );
        assert_eq!( Arc::strong_count( &out_a ), 2 );

        drop( removed );
        assert_eq!( Arc::strong_count( &out_a ), 1 );
        assert!( out_a.calls().is_empty() );
        assert!( out_b.calls().is_empty() );
    }


    #[test]
    fn test_duplicate_player_is_ignored() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let first = MockOutput::new();
        let second = MockOutput::new();

        list.start( &player.as_dyn(), first.as_dyn(), Direction::FadeOut, 10 );
        apply_all( list.tick( 1.0, false ) );

        let rejected = list.start( &player.as_dyn(), second.as_dyn(), Direction::FadeIn, 2 );
        let Err( returned ) = rejected else {
            panic!( "second fade for the same player was accepted" );
        };
        assert!( std::ptr::addr_eq( Arc::as_ptr( &returned ), Arc::as_ptr( &second ) ) );
        assert_eq!( list.len(), 1 );

        let context = list.iter().next().unwrap();
        assert_eq!( context.direction(), Direction::FadeOut );
        assert_eq!( context.ticks_counted(), 1 );
        assert_eq!( context.ticks_total(), 10 );
    }


    #[test]
    fn test_capacity_forces_oldest_to_complete() {
        let mut list = FadeList::new( 3 );
        let players: Vec<_> = ( 0..4 ).map( |_| MockPlayer::new() ).collect();
        let outputs: Vec<_> = ( 0..4 ).map( |_| MockOutput::new() ).collect();

        for ( player, output ) in players.iter().zip( &outputs ) {
            list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, 10 );
        }

        assert_eq!( list.len(), 4 );
        let in_progress = list.iter().filter( |c| !c.is_complete() ).count();
        assert_eq!( in_progress, 3 );
        assert!( list.iter().next().unwrap().is_complete() );

        apply_all( list.tick( 1.0, false ) );

        assert_eq!( list.len(), 3 );
        assert!( volumes( &outputs[ 0 ].calls() ).is_empty() );
        assert_eq!( players[ 0 ].destroy_count(), 1 );
        assert_eq!( outputs[ 0 ].count( Call::Stop ), 1 );
        for output in &outputs[ 1.. ] {
            assert_eq!( volumes( &output.calls() ).len(), 1 );
        }
    }


    #[test]
    fn test_cancel_removes_only_matching_direction() {
        let mut list = FadeList::new( 3 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        list.start( &a.as_dyn(), out_a.as_dyn(), Direction::FadeOut, 5 );
        list.start( &b.as_dyn(), out_b.as_dyn(), Direction::FadeIn, 5 );

        assert!( list.cancel( &a.as_dyn(), Direction::FadeIn ).is_empty() );

        let removed = list.cancel( &a.as_dyn(), Direction::FadeOut );
        assert_eq!( removed.len(), 1 );
        assert_eq!( removed[ 0 ].direction(), Direction::FadeOut );

        assert_eq!( list.len(), 1 );
        assert!( !list.contains( &a.as_dyn() ) );
        assert!( list.contains( &b.as_dyn() ) );
        assert!( out_a.calls().is_empty() );
        assert_eq!( a.destroy_count(), 0 );
    }


    #[test]
    fn test_detached_player_still_stops_output() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, 2 );
        apply_all( list.tick( 1.0, false ) );

        assert_eq!( list.detach_player( &player.as_dyn() ), 1 );
        assert!( !list.contains( &player.as_dyn() ) );
        assert!( !list.iter().next().unwrap().has_player() );

        apply_all( list.tick( 1.0, false ) );

        assert_eq!( player.destroy_count(), 0 );
        assert_eq!( output.count( Call::Stop ), 1 );
        assert!( list.is_empty() );
    }


    #[test]
    fn test_dropped_player_skips_destroy() {
        let mut list = FadeList::new( 3 );
        let output = MockOutput::new();
        {
            let player = MockPlayer::new();
            list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeOut, 1 );
        }

        apply_all( list.tick( 1.0, false ) );
        assert_eq!( output.count( Call::Stop ), 1 );
    }


    #[test]
    fn test_drain_finishes_every_fade() {
        let mut list = FadeList::new( 3 );
        let a = MockPlayer::new();
        let b = MockPlayer::new();
        let out_a = MockOutput::new();
        let out_b = MockOutput::new();

        list.start( &a.as_dyn(), out_a.as_dyn(), Direction::FadeIn, 5 );
        list.start( &b.as_dyn(), out_b.as_dyn(), Direction::FadeOut, 5 );
        list.detach_player( &b.as_dyn() );

        apply_all( list.drain() );

        assert!( list.is_empty() );
        assert_eq!( a.destroy_count(), 1 );
        assert_eq!( b.destroy_count(), 0 );
        assert_eq!( out_a.count( Call::Stop ), 1 );
        assert_eq!( out_b.count( Call::Stop ), 1 );
    }


    #[test]
    fn test_ticks_never_exceed_total() {
        let mut list = FadeList::new( 3 );
        let player = MockPlayer::new();
        let output = MockOutput::new();

        list.start( &player.as_dyn(), output.as_dyn(), Direction::FadeIn, 6 );

        let mut last = 0;
        loop {
            let Some( ( counted, total ) ) = list
                .iter()
                .next()
                .map( |c| ( c.ticks_counted(), c.ticks_total() ) )
            else {
                break;
            };
            assert!( counted >= last );
            assert!( counted <= total );
            last = counted;
            apply_all( list.tick( 1.0, false ) );
        }
        assert_eq!( volumes( &output.calls() ).len(), 6 );
    }
}
