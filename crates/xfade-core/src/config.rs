//! Crossfader tuning

use std::time::Duration;

use serde::{ Deserialize, Serialize };


/// Default tick cadence: 10 steps per second.
pub const TICK_INTERVAL_MS: u64 = 100;

/// Fades beyond this count are force-completed, oldest first.
pub const MAX_CONCURRENT_FADES: usize = 3;


/// Crossfader configuration.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( default )]
pub struct FadeConfig {
    /// Time between fade steps, in milliseconds
    pub tick_interval_ms: u64,

    /// Maximum number of fades in progress at once
    pub max_concurrent_fades: usize,
}


impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: TICK_INTERVAL_MS,
            max_concurrent_fades: MAX_CONCURRENT_FADES,
        }
    }
}


impl FadeConfig {
    /// Tick interval as a Duration. Never zero.
    pub fn tick_interval( &self ) -> Duration {
        Duration::from_millis( self.tick_interval_ms.max( 1 ) )
    }


    /// Number of ticks a fade of `duration` takes. Partial ticks are dropped.
    pub fn ticks_for( &self, duration: Duration ) -> u64 {
        let millis = u64::try_from( duration.as_millis() ).unwrap_or( u64::MAX );
        millis / self.tick_interval_ms.max( 1 )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_ticks_for_default_interval() {
        let config = FadeConfig::default();
        assert_eq!( config.ticks_for( Duration::from_millis( 300 ) ), 3 );
        assert_eq!( config.ticks_for( Duration::from_millis( 250 ) ), 2 );
        assert_eq!( config.ticks_for( Duration::from_millis( 99 ) ), 0 );
        assert_eq!( config.ticks_for( Duration::ZERO ), 0 );
    }


    #[test]
    fn test_zero_interval_is_clamped() {
        let config = FadeConfig { tick_interval_ms: 0, ..FadeConfig::default() };
        assert_eq!( config.tick_interval(), Duration::from_millis( 1 ) );
        assert_eq!( config.ticks_for( Duration::from_millis( 5 ) ), 5 );
    }


    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FadeConfig = serde_json::from_str( r#"{ "tick_interval_ms": 50 }"# ).unwrap();
        assert_eq!( config.tick_interval_ms, 50 );
        assert_eq!( config.max_concurrent_fades, MAX_CONCURRENT_FADES );
    }
}
