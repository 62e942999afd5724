#![deny(unsafe_code)]

use structopt::StructOpt;

use rnats::{Subscriber, Subscription};
use rnats_conf::Settings;

mod common;

/// Subscribe to a subject and print received messages
#[derive(StructOpt, Debug)]
#[structopt(name = "rnats-sub")]
struct Args {
    #[structopt(flatten)]
    conf: rnats_conf::Options,

    ///Subject to subscribe to, wildcards allowed
    subject: String,

    ///Queue group
    #[structopt(name = "qgroup", short = "q", long)]
    queue: Option<String>,

    ///Exit after this many messages
    #[structopt(name = "count", short = "n", long)]
    count: Option<u64>,
}

async fn subscribe<S: Subscriber>(client: &S, args: &Args) -> rnats::Result<Subscription> {
    let sub = match args.queue.as_deref() {
        Some(queue) => client.queue_subscribe(&args.subject, queue)?,
        None => client.subscribe(&args.subject)?,
    };
    if let Some(count) = args.count {
        sub.auto_unsubscribe(count)?;
    }
    client.flush().await?;
    Ok(sub)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    let settings = Settings::init(args.conf.clone())?;
    common::logger_init(settings)?;
    Settings::logs();

    let conn = common::connect(settings).await?;
    let shutdown = common::shutdown_signal();
    let sub = subscribe(&conn, &args).await?;
    log::info!("listening on {}", sub);

    let mut received = 0u64;
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = sub.next_message() => msg,
        };
        match msg {
            Ok(msg) => {
                received += 1;
                println!("[#{}] {}", received, msg);
            }
            Err(rnats::Error::BadSubscription) => break,
            Err(e) => {
                log::error!("receive failed: {}", e);
                break;
            }
        }
    }

    log::info!("received {} messages, dropped {}", received, sub.dropped());
    log::info!("statistics: {}", conn.stats().to_json());
    conn.close().await;
    Ok(())
}
