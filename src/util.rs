use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;

const INFLUXDB_URL: &str = "INFLUXDB_URL";

const INFLUXDB_TOKEN: &str = "INFLUXDB_TOKEN";

const INFLUXDB_BUCKET: &str = "INFLUXDB_BUCKET";

const INFLUXDB_ORG: &str = "INFLUXDB_ORG";

const DATABASE_URL: &str = "DATABASE_URL";

const LOG_LEVEL: &str = "LOG_LEVEL";

fn get_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

pub fn get_influx_url() -> Option<String> {
    get_non_empty(INFLUXDB_URL)
}

pub fn get_influx_token() -> Option<String> {
    get_non_empty(INFLUXDB_TOKEN)
}

pub fn get_influx_bucket() -> Option<String> {
    get_non_empty(INFLUXDB_BUCKET)
}

pub fn get_influx_org() -> Option<String> {
    get_non_empty(INFLUXDB_ORG)
}

pub fn get_database_url() -> Option<String> {
    get_non_empty(DATABASE_URL)
}

pub fn get_log_level() -> Option<String> {
    get_non_empty(LOG_LEVEL)
}

/// Map a configured log level onto a tracing filter, falling back to INFO
pub fn parse_level_filter(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Filter passing this crate's events (library and binary share the crate
/// name) at `level`, dropping dependency noise
pub fn log_filter(level: &str) -> Targets {
    Targets::new().with_target("fleet_collector", parse_level_filter(level))
}
