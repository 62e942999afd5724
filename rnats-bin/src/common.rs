use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

use rnats::{Connection, Event};
use rnats_conf::Settings;

pub fn logger_init(settings: &Settings) -> anyhow::Result<()> {
    let logger = SimpleLogger::new().with_level(settings.log.level.inner());
    let logger = if settings.log.timestamps { logger.with_utc_timestamps() } else { logger.without_timestamps() };
    logger.init()?;
    Ok(())
}

pub async fn connect(settings: &Settings) -> anyhow::Result<Connection> {
    let opts = settings.to_options().event_handler(|ev| match ev {
        Event::Connected => log::info!("connected"),
        Event::Disconnected => log::warn!("disconnected"),
        Event::Reconnected => log::info!("reconnected"),
        Event::Closed => log::info!("connection closed"),
        Event::Error(e) => log::warn!("async error: {}", e),
    });
    let conn = rnats::connect("", opts).await?;
    log::info!("connected to {:?}, server id {:?}", conn.connected_url(), conn.connected_server_id());
    Ok(conn)
}

/// Cancelled on ctrl-c
pub fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("listen for ctrl-c failed: {}", e);
            return;
        }
        t.cancel();
    });
    token
}
