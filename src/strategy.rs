//! Rate limiting strategies and the ordered set the limiter evaluates.

use crate::error::{ThrottlerError, ThrottlerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Window length a strategy counts over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Second,
    Minute,
    Hour,
    Day,
}

impl Period {
    /// Map a unit letter (`S`, `M`, `H`, `D`) to its period
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "S" => Some(Period::Second),
            "M" => Some(Period::Minute),
            "H" => Some(Period::Hour),
            "D" => Some(Period::Day),
            _ => None,
        }
    }

    /// Map a bare period name (`Second`, `Minute`, `Hour`, `Day`) to its period
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Second" => Some(Period::Second),
            "Minute" => Some(Period::Minute),
            "Hour" => Some(Period::Hour),
            "Day" => Some(Period::Day),
            _ => None,
        }
    }

    pub fn window(&self) -> Duration {
        match self {
            Period::Second => Duration::from_secs(1),
            Period::Minute => Duration::from_secs(60),
            Period::Hour => Duration::from_secs(60 * 60),
            Period::Day => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Result of parsing a strategy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyId {
    pub period: Period,
    /// Limit carried by `"<limit>-<unit>"` identifiers; `None` for named periods
    pub limit: Option<u64>,
}

/// Parse a strategy identifier such as `"10-M"` or `"Minute"`.
pub fn parse_strategy_id(id: &str) -> ThrottlerResult<StrategyId> {
    if id.is_empty() {
        return Err(ThrottlerError::Format(
            "Strategy identifier cannot be empty".to_string(),
        ));
    }

    if let Some((limit, unit)) = id.split_once('-') {
        if limit.is_empty()
            || unit.is_empty()
            || unit.contains('-')
            || !limit.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(ThrottlerError::Format(format!(
                "Strategy identifier '{}' must look like '<limit>-<unit>'",
                id
            )));
        }
        let limit: u64 = limit.parse().map_err(|_| {
            ThrottlerError::Format(format!("Limit in '{}' is not a positive integer", id))
        })?;
        if limit == 0 {
            return Err(ThrottlerError::Format(format!(
                "Limit in '{}' must be greater than 0",
                id
            )));
        }
        let period = Period::from_unit(unit)
            .ok_or_else(|| ThrottlerError::UnknownPeriod(format!("Unknown unit '{}'", unit)))?;
        return Ok(StrategyId {
            period,
            limit: Some(limit),
        });
    }

    if id.chars().all(|c| c.is_ascii_alphabetic()) {
        let period = Period::from_name(id)
            .ok_or_else(|| ThrottlerError::UnknownPeriod(format!("Unknown period '{}'", id)))?;
        return Ok(StrategyId {
            period,
            limit: None,
        });
    }

    Err(ThrottlerError::Format(format!(
        "Strategy identifier '{}' is neither '<limit>-<unit>' nor a period name",
        id
    )))
}

/// One configured fixed window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub max_count: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Strategy {
    pub fn new(id: impl Into<String>, max_count: u64, window: Duration) -> ThrottlerResult<Self> {
        let id = id.into();
        if max_count == 0 {
            return Err(ThrottlerError::InvalidStrategy(format!(
                "Strategy '{}' needs a max count greater than 0",
                id
            )));
        }
        if max_count > i64::MAX as u64 {
            return Err(ThrottlerError::InvalidStrategy(format!(
                "Strategy '{}' max count {} exceeds the store's integer range",
                id, max_count
            )));
        }
        if window.as_millis() == 0 {
            return Err(ThrottlerError::InvalidStrategy(format!(
                "Strategy '{}' needs a window of at least 1ms",
                id
            )));
        }
        Ok(Self {
            id,
            max_count,
            window,
        })
    }

    /// Build a strategy from an identifier with an explicit max count
    pub fn with_max(id: &str, max_count: u64) -> ThrottlerResult<Self> {
        let parsed = parse_strategy_id(id)?;
        Self::new(id, max_count, parsed.period.window())
    }

    pub fn window_millis(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

impl FromStr for Strategy {
    type Err = ThrottlerError;

    /// Accepts `"<limit>-<unit>"` or `"<id>=<max>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((id, max)) = s.split_once('=') {
            let max: u64 = max.trim().parse().map_err(|_| {
                ThrottlerError::Format(format!("Max count in '{}' is not an integer", s))
            })?;
            return Self::with_max(id.trim(), max);
        }

        let parsed = parse_strategy_id(s)?;
        match parsed.limit {
            Some(limit) => Self::new(s, limit, parsed.period.window()),
            None => Err(ThrottlerError::Format(format!(
                "Named period '{}' needs an explicit max, e.g. '{}=10'",
                s, s
            ))),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.id, self.max_count)
    }
}

/// Ordered collection of strategies; evaluation follows insertion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategySet {
    strategies: Vec<Strategy>,
}

impl StrategySet {
    pub fn new(strategies: Vec<Strategy>) -> ThrottlerResult<Self> {
        let mut set = Self::default();
        for strategy in strategies {
            if set.validate(&strategy.id) {
                return Err(ThrottlerError::InvalidStrategy(format!(
                    "Duplicate strategy '{}'",
                    strategy.id
                )));
            }
            set.strategies.push(strategy);
        }
        Ok(set)
    }

    /// Insert a new strategy or replace the max count and window of an existing one
    pub fn add_or_update(&mut self, id: &str, max_count: u64, window: Duration) -> ThrottlerResult<()> {
        let strategy = Strategy::new(id, max_count, window)?;
        match self.strategies.iter_mut().find(|s| s.id == id) {
            Some(existing) => *existing = strategy,
            None => self.strategies.push(strategy),
        }
        Ok(())
    }

    /// Drop a strategy from future evaluations; unknown ids are ignored
    pub fn remove(&mut self, id: &str) -> Option<Strategy> {
        let index = self.strategies.iter().position(|s| s.id == id)?;
        Some(self.strategies.remove(index))
    }

    pub fn validate(&self, id: &str) -> bool {
        self.strategies.iter().any(|s| s.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.iter()
    }

    pub fn snapshot(&self) -> Vec<Strategy> {
        self.strategies.clone()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
