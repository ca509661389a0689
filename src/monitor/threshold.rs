use crate::error::ThresholdParseError;
use crate::ui::core::alerts::AlertEvent;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdCondition {
    GreaterThan,
    LessThan,
    CrossesUp,
    CrossesDown,
}

impl ThresholdCondition {
    pub const ALL: [ThresholdCondition; 4] = [
        ThresholdCondition::GreaterThan,
        ThresholdCondition::LessThan,
        ThresholdCondition::CrossesUp,
        ThresholdCondition::CrossesDown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ThresholdCondition::GreaterThan => "Price > Value",
            ThresholdCondition::LessThan => "Price < Value",
            ThresholdCondition::CrossesUp => "Price Crosses Up",
            ThresholdCondition::CrossesDown => "Price Crosses Down",
        }
    }

    /// One-character form accepted by the slot editor.
    pub fn short(&self) -> &'static str {
        match self {
            ThresholdCondition::GreaterThan => ">",
            ThresholdCondition::LessThan => "<",
            ThresholdCondition::CrossesUp => "^",
            ThresholdCondition::CrossesDown => "v",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label) || c.short() == label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub condition: ThresholdCondition,
    pub value: f64,
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.condition.label(), self.value)
    }
}

/// Parses `"<ConditionLabel>@<value>"`. The value may use a decimal comma.
impl FromStr for Threshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, value) = s
            .split_once('@')
            .ok_or_else(|| ThresholdParseError::MissingSeparator(s.to_string()))?;

        let condition = ThresholdCondition::from_label(label)
            .ok_or_else(|| ThresholdParseError::UnknownCondition(label.trim().to_string()))?;

        let normalized = value.trim().replace(',', ".");
        let value = normalized
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue(value.trim().to_string()))?;

        Ok(Threshold { condition, value })
    }
}

/// What to watch and when to alert. Replaced, never mutated, once a poller
/// holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolConfig {
    pub symbol: String,
    pub threshold: Option<Threshold>,
}

impl SymbolConfig {
    pub fn new(symbol: &str, threshold: Option<Threshold>) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            threshold,
        }
    }

    /// Builds a config from user or persisted text. A malformed threshold is
    /// logged and dropped; the symbol is still monitored.
    pub fn parse(symbol: &str, threshold: &str) -> Self {
        let threshold = threshold.trim();
        let parsed = if threshold.is_empty() {
            None
        } else {
            match threshold.parse::<Threshold>() {
                Ok(t) => Some(t),
                Err(e) => {
                    log::warn!(
                        "Ignoring threshold for {}: {}. Alerts are disabled for this symbol.",
                        symbol.trim().to_uppercase(),
                        e
                    );
                    None
                }
            }
        };
        Self::new(symbol, parsed)
    }

    pub fn threshold_text(&self) -> String {
        self.threshold.map(|t| t.to_string()).unwrap_or_default()
    }
}

/// Checks one tick against the symbol's threshold.
///
/// Level conditions fire on every qualifying tick; cross conditions fire only
/// on the tick that moves across the target and never on the first tick.
pub fn evaluate(config: &SymbolConfig, previous: Option<f64>, current: f64) -> Option<AlertEvent> {
    let threshold = config.threshold?;
    let target = threshold.value;
    let symbol = config.symbol.as_str();

    if !target.is_finite() || !current.is_finite() {
        log::warn!(
            "Skipping threshold check for {}: non-finite target {} or price {}",
            symbol,
            target,
            current
        );
        return None;
    }

    let detail = match threshold.condition {
        ThresholdCondition::GreaterThan if current > target => {
            format!("{} price ({:.4}) > target ({:.4})", symbol, current, target)
        }
        ThresholdCondition::LessThan if current < target => {
            format!("{} price ({:.4}) < target ({:.4})", symbol, current, target)
        }
        ThresholdCondition::CrossesUp
            if previous.map_or(false, |prev| prev < target) && current >= target =>
        {
            format!(
                "{} price ({:.4}) crossed target ({:.4}) upward",
                symbol, current, target
            )
        }
        ThresholdCondition::CrossesDown
            if previous.map_or(false, |prev| prev > target) && current <= target =>
        {
            format!(
                "{} price ({:.4}) crossed target ({:.4}) downward",
                symbol, current, target
            )
        }
        _ => return None,
    };

    Some(AlertEvent::triggered(symbol, detail))
}
