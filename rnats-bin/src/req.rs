#![deny(unsafe_code)]

use std::time::Duration;

use structopt::StructOpt;

use rnats::Publisher;
use rnats_conf::Settings;

mod common;

/// Send a request and print the reply
#[derive(StructOpt, Debug)]
#[structopt(name = "rnats-req")]
struct Args {
    #[structopt(flatten)]
    conf: rnats_conf::Options,

    ///Subject to send the request to
    subject: String,

    ///Request payload
    message: String,
}

async fn request<P: Publisher>(client: &P, args: &Args, timeout: Duration) -> rnats::Result<rnats::Message> {
    let payload = bytes::Bytes::from(args.message.clone());
    client.request(&args.subject, payload, timeout).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    let settings = Settings::init(args.conf.clone())?;
    common::logger_init(settings)?;
    Settings::logs();

    let conn = common::connect(settings).await?;
    let timeout = settings.client.request_timeout;
    let res = request(&conn, &args, timeout).await;
    conn.close().await;
    let reply = res?;
    println!("{}", reply);
    Ok(())
}
