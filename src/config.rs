use crate::config_validator::ConfigValidator;
use crate::error::ThrottlerResult;
use crate::strategy::Strategy;
use clap::Parser;
use std::net::SocketAddr;

#[derive(Debug, Clone, Parser)]
#[command(name = "fixed-window-limiter", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; empty runs with an in-process store
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Log level for the service's own targets
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Strategies in evaluation order, e.g. `5-S,10-M` or `Minute=10,Hour=1000`
    #[arg(
        long,
        env = "STRATEGIES",
        value_delimiter = ',',
        default_value = "5-S,10-M,1000-H,2000-D"
    )]
    pub strategies: Vec<Strategy>,
}

impl Config {
    /// Load configuration from command line arguments and environment variables
    pub fn load() -> ThrottlerResult<Self> {
        let config = Config::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ThrottlerResult<()> {
        ConfigValidator::validate_redis_url(&self.redis_url)?;
        ConfigValidator::validate_strategies(&self.strategies)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["fixed-window-limiter"]).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
        let ids: Vec<&str> = config.strategies.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["5-S", "10-M", "1000-H", "2000-D"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_named_strategies_from_args() {
        let config = Config::try_parse_from([
            "fixed-window-limiter",
            "--strategies",
            "Second=5,Minute=10",
            "--redis-url",
            "",
        ])
        .unwrap();
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[1].max_count, 10);
        assert!(config.redis_url.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_strategy_is_rejected() {
        let result =
            Config::try_parse_from(["fixed-window-limiter", "--strategies", "5-S,ten-M"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_oversized_strategy_limit_is_rejected() {
        let result = Config::try_parse_from([
            "fixed-window-limiter",
            "--strategies",
            "5-S,10000000000000000000-S",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_strategies_fail_validation() {
        let config =
            Config::try_parse_from(["fixed-window-limiter", "--strategies", "5-S,5-S"]).unwrap();
        assert!(config.validate().is_err());
    }
}
