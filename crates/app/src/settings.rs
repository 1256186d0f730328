use config::{Config, ConfigError, Environment, File, FileFormat};
use kline_core::config::AppConfig;

/// 默认配置文件位置
const DEFAULT_CONFIG_PATH: &str = "config/kline.toml";
/// 指定配置文件位置的环境变量
const CONFIG_PATH_ENV: &str = "KLINE_CONFIG";

/// # Summary
/// 按优先级合并配置来源。
///
/// # Logic
/// 1. 内置默认值（`AppConfig` 的 serde 默认）。
/// 2. 可选的 TOML 文件，路径取 `KLINE_CONFIG`，缺省为 `config/kline.toml`。
/// 3. `KLINE__SECTION__KEY` 形式的环境变量。
pub fn load() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_from(&path, Environment::with_prefix("KLINE").separator("__").try_parsing(true))
}

fn load_from(path: &str, env: Environment) -> Result<AppConfig, ConfigError> {
    Config::builder()
        .add_source(File::new(path, FileFormat::Toml).required(false))
        .add_source(env)
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("KLINE")
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_from("does/not/exist.toml", env(&[])).unwrap();
        assert_eq!(config.source.symbol, "BTCUSDT");
        assert_eq!(config.poller.interval_secs, 60);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_file_then_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[source]\nsymbol = \"ETHUSDT\"\ninterval = \"5m\"\n\n[poller]\ninterval_secs = 30\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = load_from(
            &path,
            env(&[
                ("KLINE__POLLER__INTERVAL_SECS", "15"),
                ("KLINE__EXPORT__PATH", "/tmp/eth.csv"),
            ]),
        )
        .unwrap();
        assert_eq!(config.source.symbol, "ETHUSDT");
        assert_eq!(config.source.interval, "5m");
        assert_eq!(config.source.market_type, "futures");
        assert_eq!(config.poller.interval_secs, 15);
        assert_eq!(config.export.path.as_deref(), Some("/tmp/eth.csv"));
    }
}
