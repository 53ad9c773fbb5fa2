//! Tests for configuration

#[cfg(test)]
mod tests {
    use super::super::config::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path, "data/chit.db");
        assert_eq!(config.scanner.interval_secs, 10);
        assert_eq!(config.scanner.initial_delay_secs, 2);
        assert!(config.request_check.enabled);
        assert_eq!(config.request_check.min_interval_secs, 10);
        assert!(config.settlement.rng_seed.is_none());
        assert_eq!(config.server.port, 8080);
        assert!(config.telegram.is_none());
    }

    #[test]
    fn test_scanner_config_durations() {
        let toml_str = r#"
interval_secs = 5
initial_delay_secs = 0
"#;
        let config: ScannerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.initial_delay(), Duration::ZERO);
    }

    #[test]
    fn test_scanner_interval_never_zero() {
        let config: ScannerConfig = toml::from_str("interval_secs = 0").unwrap();
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_request_check_config() {
        let toml_str = r#"
enabled = false
min_interval_secs = 30
"#;
        let config: RequestCheckConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.min_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_settlement_seed() {
        let config: SettlementConfig = toml::from_str("rng_seed = 42").unwrap();
        assert_eq!(config.rng_seed, Some(42));
    }

    #[test]
    fn test_telegram_config_defaults() {
        let toml_str = r#"
bot_token = "123:abc"
chat_id = "12345"
"#;
        let config: TelegramConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.chat_id, "12345");
        assert!(config.notify_winners);
        assert!(config.notify_payments);
        assert!(config.notify_cycles);
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[database]
path = "/var/lib/chit/chit.db"

[scanner]
interval_secs = 3

[server]
port = 9000

[telegram]
bot_token = "t"
chat_id = "c"
notify_payments = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/var/lib/chit/chit.db");
        assert_eq!(config.scanner.interval_secs, 3);
        assert_eq!(config.scanner.initial_delay_secs, 2);
        assert_eq!(config.server.port, 9000);
        let telegram = config.telegram.unwrap();
        assert!(telegram.notify_winners);
        assert!(!telegram.notify_payments);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chit.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[request_check]\nmin_interval_secs = 20").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.request_check.min_interval_secs, 20);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.scanner.interval_secs, 10);
    }
}
