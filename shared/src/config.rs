use dotenv::dotenv;

pub const DEFAULT_SUPPORTED_INTERVALS: &str = "1m,5m,15m,1h,4h,1d";

/// Raw runtime settings read from the environment (and `.env` when present).
///
/// Values stay as loaded; `histdata::config::HistoryConfig` is the typed view.
#[derive(Debug, Clone)]
pub struct Config {
    pub cache_path: String,
    pub export_dir: String,
    pub supported_intervals: Vec<String>,
    pub max_page_size: usize,
    pub strict_cache: bool,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub binance_market: String,
    pub binance_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenv().ok();

        Ok(Config {
            cache_path: std::env::var("HISTDATA_CACHE_PATH")
                .unwrap_or_else(|_| "data/historical_data.db".to_string()),
            export_dir: std::env::var("HISTDATA_EXPORT_DIR")
                .unwrap_or_else(|_| "exports".to_string()),
            supported_intervals: parse_list(
                &std::env::var("HISTDATA_SUPPORTED_INTERVALS")
                    .unwrap_or_else(|_| DEFAULT_SUPPORTED_INTERVALS.to_string()),
            ),
            max_page_size: std::env::var("HISTDATA_MAX_PAGE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("HISTDATA_MAX_PAGE_SIZE: {}", e))?,
            strict_cache: std::env::var("HISTDATA_STRICT_CACHE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            retry_max_attempts: std::env::var("HISTDATA_RETRY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("HISTDATA_RETRY_MAX_ATTEMPTS: {}", e))?,
            retry_base_delay_ms: std::env::var("HISTDATA_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .map_err(|e| anyhow::anyhow!("HISTDATA_RETRY_BASE_DELAY_MS: {}", e))?,
            binance_market: std::env::var("BINANCE_MARKET")
                .unwrap_or_else(|_| "futures".to_string()),
            binance_base_url: std::env::var("BINANCE_BASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
