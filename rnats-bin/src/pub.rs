#![deny(unsafe_code)]

use std::time::Duration;

use structopt::StructOpt;

use rnats::Publisher;
use rnats_conf::Settings;

mod common;

/// Publish a message to a subject
#[derive(StructOpt, Debug)]
#[structopt(name = "rnats-pub")]
struct Args {
    #[structopt(flatten)]
    conf: rnats_conf::Options,

    ///Subject to publish to
    subject: String,

    ///Message payload
    message: String,

    ///Reply subject
    #[structopt(name = "reply", short = "r", long)]
    reply: Option<String>,

    ///Number of times to publish the message
    #[structopt(name = "count", short = "n", long, default_value = "1")]
    count: u64,

    ///Delay between messages, e.g. 100ms
    #[structopt(name = "interval", short = "i", long, parse(try_from_str = parse_interval))]
    interval: Option<Duration>,
}

fn parse_interval(text: &str) -> Result<Duration, String> {
    rnats_utils::parse_duration(text).ok_or_else(|| format!("invalid interval {:?}", text))
}

async fn publish<P: Publisher>(client: &P, args: &Args) -> rnats::Result<u64> {
    let payload = bytes::Bytes::from(args.message.clone());
    let mut sent = 0;
    for _ in 0..args.count {
        match args.reply.as_deref() {
            Some(reply) => client.publish_with_reply(&args.subject, reply, payload.clone())?,
            None => client.publish(&args.subject, payload.clone())?,
        }
        sent += 1;
        if let Some(interval) = args.interval {
            tokio::time::sleep(interval).await;
        }
    }
    client.flush().await?;
    Ok(sent)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    let settings = Settings::init(args.conf.clone())?;
    common::logger_init(settings)?;
    Settings::logs();

    let conn = common::connect(settings).await?;
    let shutdown = common::shutdown_signal();
    let res = tokio::select! {
        _ = shutdown.cancelled() => None,
        res = publish(&conn, &args) => Some(res),
    };
    log::info!("statistics: {}", conn.stats().to_json());
    conn.close().await;
    match res {
        Some(Ok(sent)) => log::info!("published {} messages to {}", sent, args.subject),
        Some(Err(e)) => return Err(e.into()),
        None => log::warn!("interrupted"),
    }
    Ok(())
}
