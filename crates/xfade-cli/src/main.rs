//! xfade CLI - Crossfade demo driver

mod cli;
mod demo;
mod settings;

use std::sync::Arc;

use anyhow::{ Context, Result };
use clap::Parser;
use tracing::Level;

use cli::Args;
use demo::{ LogOutput, Scenario };
use settings::Settings;

use xfade_core::{ Crossfader, DeviceMixer, Output, SharedTransport, Transport };


/// Installs the fmt subscriber at a level chosen by `-v` count.
fn init_tracing( verbose: u8 ) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level( level )
        .with_target( false )
        .init();
}


fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing( args.verbose );

    let mut settings = Settings::load();
    settings.apply_args( &args );
    if args.save {
        match settings.save() {
            Ok( path ) => tracing::info!( "Settings saved to {:?}", path ),
            Err( e ) => tracing::warn!( "{:#}", e ),
        }
    }

    let transport = Arc::new( SharedTransport::new( settings.volume ) );
    transport.set_muted( args.mute );

    let crossfader = Crossfader::with_config(
        Arc::clone( &transport ) as Arc<dyn Transport>,
        settings.fade,
    ).context( "Failed to start crossfader" )?;

    let scenario = Scenario {
        crossfade: settings.crossfade(),
        hold: settings.hold(),
        pause: args.pause_ms.map( std::time::Duration::from_millis ),
    };

    if args.simulate {
        let from: Arc<dyn Output> = LogOutput::new( "A" );
        let to: Arc<dyn Output> = LogOutput::new( "B" );
        demo::run( &crossfader, scenario, from, to );
        return Ok(());
    }

    // Stream must stay on this thread and alive until the demo ends
    let ( mixer, _stream ) = DeviceMixer::open().context( "Failed to open audio device" )?;
    let from = mixer.voice( settings.from_hz );
    let to = mixer.voice( settings.to_hz );
    tracing::info!(
        "Crossfading {} Hz -> {} Hz ({} Hz, {} channels)",
        from.frequency(),
        to.frequency(),
        mixer.sample_rate(),
        mixer.channels()
    );

    demo::run( &crossfader, scenario, from, to );

    Ok(())
}
