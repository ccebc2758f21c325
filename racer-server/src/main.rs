use clap::Parser;
use log::info;
use miette::{IntoDiagnostic, Result};
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

use racer_server::{config, Cli, Session, VERSION};

mod web;

use web::Web;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    info!("racer-server {} starting", VERSION);

    let settings = config::load_settings(args.config.as_deref()).into_diagnostic()?;

    Toplevel::new(|s| async move {
        let session = Session::new(&s, args, settings).await;
        let web = Web::new(session);

        s.start(SubsystemBuilder::new("Webserver", |a| web.run(a)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .into_diagnostic()
}
