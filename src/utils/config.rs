#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use clap::Parser;
use log::{info, error, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Deserialize;
use std::{env, fmt, fs};
use sqlx::{Sqlite, Pool};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};

// Hello Server Utilities
use crate::utils::{db_init, errors::Errors, telemetry};
use crate::utils::hello_utils::get_absolute_path;

// ***************************************************************************
//                                Constants
// ***************************************************************************
// Environment variables that locate the trace collector.
pub const ENV_EXPORTER_ENDPOINT : &str = "EXPORTER_ENDPOINT";
pub const ENV_EXPORTER_HEADERS  : &str = "EXPORTER_HEADERS";

// Networking.
const DEFAULT_HTTP_ADDR    : &str = "0.0.0.0";
const DEFAULT_HTTP_PORT    : u16  = 9000;
const DEFAULT_LOG_LEVEL    : &str = "info";

// Console log layout used when no log4rs file is given.
const DEFAULT_LOG_PATTERN  : &str = "{d(%Y-%m-%dT%H:%M:%S%.3f%:z)} {h({l})} {t} - {m}{n}";

// Instrumentation scope of every span the server starts.
pub const TRACER_NAME      : &str = "io.opentelemetry.traces.hello";

// ***************************************************************************
//                               Config Structs
// ***************************************************************************
// ---------------------------------------------------------------------------
// HelloArgs:
// ---------------------------------------------------------------------------
#[derive(Debug, Parser)]
#[command(name = "hello_server", about = "Command line arguments for the Hello Server.")]
pub struct HelloArgs {
    /// Optional TOML configuration file.
    /// 
    /// Defaults are used for any setting the file omits, or for all settings
    /// if the file is not given or cannot be read.
    #[arg(short, long)]
    pub config_file: Option<String>,

    /// Optional log4rs YAML configuration file.
    /// 
    /// When absent, logs go to stderr at the configured log_level.
    #[arg(short, long)]
    pub log_config: Option<String>,
}

// ---------------------------------------------------------------------------
// Parms:
// ---------------------------------------------------------------------------
#[derive(Debug)]
pub struct Parms {
    pub config_file: String,
    pub config: Config,
    pub exporter: ExporterConfig,
}

// ---------------------------------------------------------------------------
// RuntimeCtx:
// ---------------------------------------------------------------------------
/** Everything a request needs, built once at startup and shared by 
 * reference with the API.
 */
pub struct RuntimeCtx {
    pub parms: Parms,
    pub db: Pool<Sqlite>,
    pub tracer: Tracer,
    pub tracer_provider: TracerProvider,
}

impl RuntimeCtx {
    pub fn new(parms: Parms, db: Pool<Sqlite>, tracer_provider: TracerProvider) -> Self {
        let tracer = tracer_provider.tracer(TRACER_NAME);
        RuntimeCtx { parms, db, tracer, tracer_provider }
    }
}

// ---------------------------------------------------------------------------
// Config:
// ---------------------------------------------------------------------------
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub title: String,
    pub http_addr: String,
    pub http_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http_addr, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: "Hello Server".to_string(),
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ExporterConfig:
// ---------------------------------------------------------------------------
/** Trace collector connectivity taken from the environment. */
#[derive(Clone, Default)]
pub struct ExporterConfig {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
}

impl ExporterConfig {
    /** Build from raw variable values.  The endpoint is required, the headers
     * string is optional.
     */
    pub fn from_values(endpoint: Option<String>, headers: Option<String>) -> Result<Self> {
        let endpoint = match endpoint {
            Some(e) if !e.trim().is_empty() => normalize_endpoint(e.trim()),
            _ => {
                let msg = Errors::InvalidConfig(format!("{} must be set to the trace collector address", 
                                                        ENV_EXPORTER_ENDPOINT));
                return Err(anyhow!(msg));
            }
        };

        let headers = match headers {
            Some(h) => parse_headers(&h)?,
            None => vec!(),
        };

        Ok(ExporterConfig { endpoint, headers })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_values(env::var(ENV_EXPORTER_ENDPOINT).ok(), env::var(ENV_EXPORTER_HEADERS).ok())
    }
}

// Header values usually carry credentials, so only the keys are printed.
impl fmt::Debug for ExporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ExporterConfig")
            .field("endpoint", &self.endpoint)
            .field("header_keys", &keys)
            .finish()
    }
}

// ***************************************************************************
//                            Exporter Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// parse_headers:
// ---------------------------------------------------------------------------
/** Parse a comma separated list of key=value pairs.  Blank items are skipped
 * and only the first '=' separates the key from the value, so values may 
 * themselves contain '='.  An item without '=' or with an empty key is an 
 * error.
 */
pub fn parse_headers(headers: &str) -> Result<Vec<(String, String)>> {
    let mut v = vec!();
    for item in headers.split(',') {
        if item.trim().is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((k, val)) if !k.trim().is_empty() => {
                v.push((k.trim().to_string(), val.trim().to_string()));
            },
            _ => {
                let msg = Errors::InvalidConfig(format!("{} entry is not a key=value pair: {:?}", 
                                                        ENV_EXPORTER_HEADERS, item));
                return Err(anyhow!(msg));
            },
        }
    }
    Ok(v)
}

// ---------------------------------------------------------------------------
// normalize_endpoint:
// ---------------------------------------------------------------------------
/** Collector addresses are often given as host:port.  Those are reached over
 * TLS, so https is assumed when no scheme is present.
 */
pub fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

// ***************************************************************************
//                               Log Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_log:
// ---------------------------------------------------------------------------
/** Initialize log4rs from the file given on the command line or, without one,
 * with a stderr appender at the configured level.
 */
pub fn init_log(args: &HelloArgs, config: &Config) -> Result<()> {
    match &args.log_config {
        Some(f) => {
            let logconfig = get_absolute_path(f);
            if let Err(e) = log4rs::init_file(&logconfig, Default::default()) {
                println!("{}", e);
                return Err(anyhow!(Errors::Log4rsInitialization(logconfig)));
            }
            info!("Log4rs initialized using: {}", logconfig);
        },
        None => {
            let level = parse_log_level(&config.log_level)?;
            let stderr = ConsoleAppender::builder()
                .target(Target::Stderr)
                .encoder(Box::new(PatternEncoder::new(DEFAULT_LOG_PATTERN)))
                .build();
            let logconfig = LogConfig::builder()
                .appender(Appender::builder().build("stderr", Box::new(stderr)))
                .build(Root::builder().appender("stderr").build(level))?;
            log4rs::init_config(logconfig)?;
            info!("Log4rs initialized on stderr at level {}", level);
        },
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// parse_log_level:
// ---------------------------------------------------------------------------
fn parse_log_level(level: &str) -> Result<LevelFilter> {
    level.parse::<LevelFilter>()
        .map_err(|_| anyhow!(Errors::InvalidConfig(format!("unknown log_level: {}", level))))
}

// ***************************************************************************
//                             Parms Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_config:
// ---------------------------------------------------------------------------
/** Read the TOML configuration file named on the command line.  If no file
 * is named or the file can't be read the default values are used.  A file
 * that can be read but not parsed is an error.
 */
pub fn get_config(args: &HelloArgs) -> Result<(String, Config)> {
    let config_file = match &args.config_file {
        Some(f) => get_absolute_path(f),
        None => return Ok((Default::default(), Config::new())),
    };

    // Read the configuration file.
    let contents = match fs::read_to_string(&config_file) {
        Ok(c) => c,
        Err(_) => {
            println!("Unable to read configuration at {}. Using default values.", config_file);
            return Ok((Default::default(), Config::new()));
        }
    };

    let config = parse_config(&config_file, &contents)?;
    Ok((config_file, config))
}

// ---------------------------------------------------------------------------
// parse_config:
// ---------------------------------------------------------------------------
fn parse_config(config_file: &str, contents: &str) -> Result<Config> {
    match toml::from_str(contents) {
        Ok(c)  => Ok(c),
        Err(e) => {
            let msg = format!("{}\n   {}", Errors::TOMLParseError(config_file.to_string()), e);
            println!("{}", msg);
            Err(anyhow!(msg))
        }
    }
}

// ---------------------------------------------------------------------------
// get_parms:
// ---------------------------------------------------------------------------
/** Combine the already loaded configuration with the exporter settings taken
 * from the environment.
 */
pub fn get_parms(config_file: String, config: Config) -> Result<Parms> {
    info!("{}", Errors::ReadingConfigFile(config_file.clone()));
    let exporter = match ExporterConfig::from_env() {
        Ok(e) => e,
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };
    Ok(Parms { config_file, config, exporter })
}

// ***************************************************************************
//                             Config Functions
// ***************************************************************************
// ---------------------------------------------------------------------------
// init_runtime_context:
// ---------------------------------------------------------------------------
/** Open the database and install the tracer provider.  Any failure here
 * aborts startup.
 */
pub async fn init_runtime_context(parms: Parms) -> Result<RuntimeCtx> {
    let db = db_init::init_db().await?;
    let tracer_provider = telemetry::init_tracer(&parms.exporter)?;
    Ok(RuntimeCtx::new(parms, db, tracer_provider))
}

// ***************************************************************************
//                                  Tests
// ***************************************************************************
#[cfg(test)]
pub mod tests {
    use super::*;

    /// A context backed by a fresh in-memory database and a provider that
    /// exports nowhere.
    pub async fn test_runtime_context(tracer_provider: TracerProvider) -> RuntimeCtx {
        let parms = Parms { 
            config_file: Default::default(), 
            config: Config::new(), 
            exporter: ExporterConfig::default(),
        };
        let db = db_init::init_db().await.unwrap();
        RuntimeCtx::new(parms, db, tracer_provider)
    }

    #[test]
    fn default_config_listens_on_9000() {
        let config = Config::new();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config("test.toml", "http_port = 8080\n").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.http_addr, "0.0.0.0");
        assert_eq!(config.title, "Hello Server");
    }

    #[test]
    fn sample_config_parses() {
        let config = parse_config("hello.toml", include_str!("../../resources/hello.toml")).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(parse_config("test.toml", "http_port = \"nine\"\n").is_err());
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let args = HelloArgs { config_file: Some("/nonexistent/hello.toml".to_string()), log_config: None };
        let (file, config) = get_config(&args).unwrap();
        assert!(file.is_empty());
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level("debug").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_log_level("WARN").unwrap(), LevelFilter::Warn);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn headers_parse_into_pairs() {
        assert!(parse_headers("").unwrap().is_empty());
        assert_eq!(parse_headers("a=1, b = 2,").unwrap(),
                   vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }

    #[test]
    fn header_values_may_contain_equals() {
        assert_eq!(parse_headers("authorization=Bearer abc==").unwrap(),
                   vec![("authorization".to_string(), "Bearer abc==".to_string())]);
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(parse_headers("a=1,novalue").is_err());
        assert!(parse_headers("=value").is_err());
    }

    #[test]
    fn endpoint_is_required() {
        assert!(ExporterConfig::from_values(None, None).is_err());
        assert!(ExporterConfig::from_values(Some("  ".to_string()), None).is_err());
    }

    #[test]
    fn endpoint_gets_https_scheme() {
        let cfg = ExporterConfig::from_values(Some("collector:4317".to_string()), 
                                              Some("k=v".to_string())).unwrap();
        assert_eq!(cfg.endpoint, "https://collector:4317");
        assert_eq!(cfg.headers.len(), 1);
        assert_eq!(normalize_endpoint("http://localhost:4317"), "http://localhost:4317");
        assert_eq!(normalize_endpoint("https://apm.example.com"), "https://apm.example.com");
    }

    #[test]
    fn debug_output_hides_header_values() {
        let cfg = ExporterConfig::from_values(Some("c:1".to_string()), 
                                              Some("authorization=secret".to_string())).unwrap();
        let s = format!("{:?}", cfg);
        assert!(s.contains("authorization"));
        assert!(!s.contains("secret"));
    }
}
