#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use config::{Config, File};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer};
use serde::Deserialize;

use rnats_net::Result;
use rnats_utils::{deserialize_bytesize_option, deserialize_duration, Bytesize};

use self::logging::Log;

pub use self::options::Options;

pub mod logging;
pub mod options;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub client: Client,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/rnats/rnats").required(false))
            .add_source(File::with_name("rnats").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("rnats")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("client.servers"),
        );

        let mut inner: Inner = builder.build()?.try_deserialize()?;

        //Command line configuration overriding file configuration
        if let Some(servers) = opts.servers.as_ref() {
            inner.client.servers = servers.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(name) = opts.name.as_ref() {
            inner.client.name = Some(name.clone());
        }
        if let Some(level) = opts.log_level {
            inner.log.level = level.into();
        }
        if inner.client.servers.is_empty() {
            inner.client.servers = Client::servers_default();
        }

        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    #[inline]
    pub fn instance() -> &'static Self {
        match SETTINGS.get() {
            Some(c) => c,
            None => {
                unreachable!("Settings not initialized");
            }
        }
    }

    #[inline]
    pub fn init(opts: Options) -> Result<&'static Self> {
        SETTINGS.set(Settings::new(opts)?).map_err(|_| anyhow!("Settings init failed"))?;
        SETTINGS.get().ok_or_else(|| anyhow!("Settings init failed"))
    }

    #[inline]
    pub fn logs() {
        let cfg = Self::instance();
        log::debug!("Config info is {:?}", cfg.0);
        log::info!("servers are {:?}", cfg.client.servers);
        log::info!(
            "max_reconnect is {:?}, reconnect_wait is {:?}",
            cfg.client.max_reconnect,
            cfg.client.reconnect_wait
        );
        log::info!(
            "reconnect_buf_size is {}",
            cfg.client.reconnect_buf_size.map(|s| Bytesize::from(s).to_string()).unwrap_or_else(|| "unlimited".into())
        );
        log::info!(
            "pending limits are {:?} messages, {} bytes",
            cfg.client.pending_msgs_limit,
            cfg.client.pending_bytes_limit.map(|s| Bytesize::from(s).to_string()).unwrap_or_else(|| "unlimited".into())
        );
    }

    /// Client options from the `client` section
    pub fn to_options(&self) -> rnats::Options {
        let c = &self.client;
        let mut opts = rnats::Options::new()
            .servers(c.servers.iter().cloned())
            .no_randomize(c.no_randomize)
            .verbose(c.verbose)
            .pedantic(c.pedantic)
            .allow_reconnect(c.allow_reconnect)
            .max_reconnect(c.max_reconnect)
            .reconnect_wait(c.reconnect_wait)
            .reconnect_buf_size(c.reconnect_buf_size)
            .write_buf_size(c.write_buf_size)
            .connect_timeout(c.connect_timeout)
            .ping_interval(c.ping_interval)
            .max_pings_out(c.max_pings_out)
            .flush_timeout(c.flush_timeout)
            .close_timeout(c.close_timeout)
            .request_timeout(c.request_timeout)
            .pending_limits(c.pending_msgs_limit, c.pending_bytes_limit)
            .retry_on_failed_connect(c.retry_on_failed_connect)
            .ignore_discovered_servers(c.ignore_discovered_servers)
            .tls_required(c.tls_required);
        if let Some(name) = c.name.as_ref() {
            opts = opts.name(name.clone());
        }
        if c.no_echo {
            opts = opts.no_echo();
        }
        if let (Some(user), Some(pass)) = (c.user.as_ref(), c.pass.as_ref()) {
            opts = opts.user_and_password(user.clone(), pass.clone());
        }
        if let Some(token) = c.token.as_ref() {
            opts = opts.token(token.clone());
        }
        opts
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Client {
    #[serde(default = "Client::servers_default")]
    pub servers: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub no_randomize: bool,
    #[serde(default)]
    pub no_echo: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub pedantic: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "Client::allow_reconnect_default")]
    pub allow_reconnect: bool,
    //Attempts per server, "unlimited" for no bound
    #[serde(default = "Client::max_reconnect_default", deserialize_with = "deserialize_count_option")]
    pub max_reconnect: Option<usize>,
    #[serde(default = "Client::reconnect_wait_default", deserialize_with = "deserialize_duration")]
    pub reconnect_wait: Duration,
    #[serde(default = "Client::reconnect_buf_size_default", deserialize_with = "deserialize_bytesize_option")]
    pub reconnect_buf_size: Option<usize>,
    #[serde(default = "Client::write_buf_size_default", deserialize_with = "deserialize_bytesize_option")]
    pub write_buf_size: Option<usize>,
    #[serde(default = "Client::connect_timeout_default", deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    #[serde(default = "Client::ping_interval_default", deserialize_with = "deserialize_duration")]
    pub ping_interval: Duration,
    #[serde(default = "Client::max_pings_out_default")]
    pub max_pings_out: usize,
    #[serde(default = "Client::flush_timeout_default", deserialize_with = "deserialize_duration")]
    pub flush_timeout: Duration,
    #[serde(default = "Client::close_timeout_default", deserialize_with = "deserialize_duration")]
    pub close_timeout: Duration,
    #[serde(default = "Client::request_timeout_default", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,

    #[serde(default = "Client::pending_msgs_limit_default", deserialize_with = "deserialize_count_option")]
    pub pending_msgs_limit: Option<usize>,
    #[serde(default = "Client::pending_bytes_limit_default", deserialize_with = "deserialize_bytesize_option")]
    pub pending_bytes_limit: Option<usize>,

    #[serde(default)]
    pub retry_on_failed_connect: bool,
    #[serde(default)]
    pub ignore_discovered_servers: bool,
    #[serde(default)]
    pub tls_required: bool,
}

impl Default for Client {
    #[inline]
    fn default() -> Self {
        Self {
            servers: Self::servers_default(),
            name: None,
            no_randomize: false,
            no_echo: false,
            verbose: false,
            pedantic: false,
            user: None,
            pass: None,
            token: None,
            allow_reconnect: Self::allow_reconnect_default(),
            max_reconnect: Self::max_reconnect_default(),
            reconnect_wait: Self::reconnect_wait_default(),
            reconnect_buf_size: Self::reconnect_buf_size_default(),
            write_buf_size: Self::write_buf_size_default(),
            connect_timeout: Self::connect_timeout_default(),
            ping_interval: Self::ping_interval_default(),
            max_pings_out: Self::max_pings_out_default(),
            flush_timeout: Self::flush_timeout_default(),
            close_timeout: Self::close_timeout_default(),
            request_timeout: Self::request_timeout_default(),
            pending_msgs_limit: Self::pending_msgs_limit_default(),
            pending_bytes_limit: Self::pending_bytes_limit_default(),
            retry_on_failed_connect: false,
            ignore_discovered_servers: false,
            tls_required: false,
        }
    }
}

impl Client {
    fn servers_default() -> Vec<String> {
        vec![format!("nats://127.0.0.1:{}", rnats_net::DEFAULT_PORT)]
    }
    fn allow_reconnect_default() -> bool {
        true
    }
    fn max_reconnect_default() -> Option<usize> {
        Some(rnats::DEFAULT_MAX_RECONNECT)
    }
    fn reconnect_wait_default() -> Duration {
        Duration::from_secs(2)
    }
    fn reconnect_buf_size_default() -> Option<usize> {
        Some(rnats::DEFAULT_RECONNECT_BUF_SIZE)
    }
    fn write_buf_size_default() -> Option<usize> {
        Some(rnats::DEFAULT_WRITE_BUF_SIZE)
    }
    fn connect_timeout_default() -> Duration {
        Duration::from_secs(2)
    }
    fn ping_interval_default() -> Duration {
        Duration::from_secs(120)
    }
    fn max_pings_out_default() -> usize {
        2
    }
    fn flush_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
    fn close_timeout_default() -> Duration {
        Duration::from_secs(2)
    }
    fn request_timeout_default() -> Duration {
        Duration::from_secs(10)
    }
    fn pending_msgs_limit_default() -> Option<usize> {
        Some(rnats::DEFAULT_PENDING_MSGS_LIMIT)
    }
    fn pending_bytes_limit_default() -> Option<usize> {
        Some(rnats::DEFAULT_PENDING_BYTES_LIMIT)
    }
}

/// A count, or `unlimited` / `none` / empty for no bound
fn deserialize_count_option<'de, D>(deserializer: D) -> std::result::Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    match v.trim().to_ascii_lowercase().as_str() {
        "" | "unlimited" | "none" => Ok(None),
        n => n.parse::<usize>().map(Some).map_err(|_e| de::Error::custom(format!("invalid count {:?}", v))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn load(toml: &str) -> Settings {
        let path = std::env::temp_dir().join(format!("rnats-conf-test-{}.toml", rand_suffix()));
        std::fs::File::create(&path).unwrap().write_all(toml.as_bytes()).unwrap();
        let opts = Options { cfg_name: Some(path.to_string_lossy().into_owned()), ..Default::default() };
        let settings = Settings::new(opts).unwrap();
        let _ = std::fs::remove_file(&path);
        settings
    }

    fn rand_suffix() -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        format!("{}-{}", std::process::id(), SEQ.fetch_add(1, Ordering::SeqCst))
    }

    #[test]
    fn test_defaults() {
        let settings = load("");
        assert_eq!(settings.client.servers, vec!["nats://127.0.0.1:4222".to_string()]);
        assert_eq!(settings.client.max_reconnect, Some(60));
        assert_eq!(settings.log.level.inner(), log::LevelFilter::Info);
        let opts = settings.to_options();
        assert_eq!(opts.pending_msgs_limit, Some(rnats::DEFAULT_PENDING_MSGS_LIMIT));
        assert_eq!(opts.reconnect_wait, Duration::from_secs(2));
        assert_eq!(opts.write_buf_size, Some(rnats::DEFAULT_WRITE_BUF_SIZE));
    }

    #[test]
    fn test_client_section() {
        let settings = load(
            r#"
[log]
level = "debug"

[client]
servers = ["nats://a:4222", "nats://b:4222"]
name = "worker"
max_reconnect = "unlimited"
reconnect_wait = "500ms"
reconnect_buf_size = "1M"
write_buf_size = "unlimited"
pending_msgs_limit = 100
pending_bytes_limit = "unlimited"
ping_interval = "30s"
"#,
        );
        assert_eq!(settings.log.level.inner(), log::LevelFilter::Debug);
        let c = &settings.client;
        assert_eq!(c.servers.len(), 2);
        assert_eq!(c.max_reconnect, None);
        assert_eq!(c.reconnect_buf_size, Some(1024 * 1024));
        assert_eq!(c.pending_msgs_limit, Some(100));
        assert_eq!(c.pending_bytes_limit, None);

        let opts = settings.to_options();
        assert_eq!(opts.name.as_deref(), Some("worker"));
        assert_eq!(opts.reconnect_wait, Duration::from_millis(500));
        assert_eq!(opts.ping_interval, Duration::from_secs(30));
        assert_eq!(opts.pending_bytes_limit, None);
        assert_eq!(opts.write_buf_size, None);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let path = std::env::temp_dir().join(format!("rnats-conf-test-{}.toml", rand_suffix()));
        std::fs::write(&path, "[client]\nping_interval = \"5x\"\n").unwrap();
        let opts = Options { cfg_name: Some(path.to_string_lossy().into_owned()), ..Default::default() };
        let res = Settings::new(opts);
        let _ = std::fs::remove_file(&path);
        assert!(res.is_err());

        let settings = load("[client]\nping_interval = \"0\"\n");
        assert_eq!(settings.client.ping_interval, Duration::ZERO);
    }

    #[test]
    fn test_command_line_overrides() {
        let path = std::env::temp_dir().join(format!("rnats-conf-test-{}.toml", rand_suffix()));
        std::fs::write(&path, "[client]\nservers = [\"nats://a:4222\"]\n").unwrap();
        let opts = Options {
            cfg_name: Some(path.to_string_lossy().into_owned()),
            servers: Some("nats://x:1, nats://y:2".into()),
            log_level: Some(log::LevelFilter::Warn),
            ..Default::default()
        };
        let settings = Settings::new(opts).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(settings.client.servers, vec!["nats://x:1".to_string(), "nats://y:2".to_string()]);
        assert_eq!(*settings.log.level, log::LevelFilter::Warn);
    }
}
