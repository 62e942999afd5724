use structopt::StructOpt;

/// Command line options shared by the rnats tools
#[derive(StructOpt, Debug, Clone, Default)]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    ///Server URLs, comma separated, e.g. -s nats://127.0.0.1:4222,nats://127.0.0.1:4223
    #[structopt(name = "server", short = "s", long)]
    pub servers: Option<String>,

    ///Connection name reported to the server
    #[structopt(name = "name", long)]
    pub name: Option<String>,

    ///Log level: off, error, warn, info, debug, trace
    #[structopt(name = "log-level", long)]
    pub log_level: Option<log::LevelFilter>,
}
