//! Payload acceptance rules.
//!
//! A cascade step only short-circuits when its result passes these checks:
//! - price / close strictly positive
//! - OHLC invariants (high >= low, open/close inside [low, high])
//! - non-negative volume
//!
//! Hard issues reject the payload; soft issues are logged and accepted.

use log::warn;
use rust_decimal::Decimal;

use crate::errors::MarketDataError;
use crate::models::{Candle, Quote};

/// Validation severity levels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationSeverity {
    /// Reject the payload, the cascade moves on.
    Hard,
    /// Accept the payload but log a warning.
    Soft,
}

#[derive(Clone, Debug)]
struct ValidationIssue {
    severity: ValidationSeverity,
    message: String,
}

impl ValidationIssue {
    fn hard(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Hard,
            message,
        }
    }

    fn soft(message: String) -> Self {
        Self {
            severity: ValidationSeverity::Soft,
            message,
        }
    }
}

/// Bar fields checked against each other.
struct Ohlc {
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
}

/// Validator for quotes and candle series.
#[derive(Clone, Debug, Default)]
pub struct QuoteValidator;

impl QuoteValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a quote.
    pub fn validate_quote(&self, quote: &Quote) -> Result<(), MarketDataError> {
        let mut issues = Vec::new();

        if quote.price <= Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!(
                "Non-positive price: {}",
                quote.price
            )));
        }

        // Providers that only report a price fill the day stats with zero
        if quote.high > Decimal::ZERO && quote.low > Decimal::ZERO {
            Self::check_ohlc(
                &Ohlc {
                    open: quote.open,
                    high: quote.high,
                    low: quote.low,
                    close: quote.price,
                },
                ValidationSeverity::Soft,
                &mut issues,
            );
        }

        Self::check_volume(quote.volume, &mut issues);
        Self::finish("quote", &quote.symbol, issues)
    }

    /// Validate a single bar.
    pub fn validate_candle(&self, candle: &Candle) -> Result<(), MarketDataError> {
        let mut issues = Vec::new();

        if candle.close <= Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!(
                "Non-positive close: {}",
                candle.close
            )));
        }

        let bar = Ohlc {
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        };
        if bar.open > Decimal::ZERO && bar.high > Decimal::ZERO && bar.low > Decimal::ZERO {
            Self::check_ohlc(&bar, ValidationSeverity::Hard, &mut issues);
        }

        Self::check_volume(candle.volume, &mut issues);
        Self::finish("candle", &candle.time.to_rfc3339(), issues)
    }

    /// Drop invalid bars from a series.
    ///
    /// Fails only when the series is non-empty and no bar survives.
    pub fn validate_series(&self, candles: Vec<Candle>) -> Result<Vec<Candle>, MarketDataError> {
        let total = candles.len();
        let mut last_error = None;

        let valid: Vec<Candle> = candles
            .into_iter()
            .filter(|candle| match self.validate_candle(candle) {
                Ok(()) => true,
                Err(e) => {
                    last_error = Some(e);
                    false
                }
            })
            .collect();

        if valid.len() < total {
            warn!(
                "Candle validation: dropped {} of {} bars",
                total - valid.len(),
                total
            );
        }

        match last_error {
            Some(err) if valid.is_empty() => Err(err),
            _ => Ok(valid),
        }
    }

    fn check_ohlc(bar: &Ohlc, severity: ValidationSeverity, issues: &mut Vec<ValidationIssue>) {
        if bar.high < bar.low {
            issues.push(ValidationIssue::hard(format!(
                "High ({}) is less than Low ({})",
                bar.high, bar.low
            )));
            return;
        }

        let outside = |v: Decimal| v < bar.low || v > bar.high;
        for (name, value) in [("Open", bar.open), ("Close", bar.close)] {
            if outside(value) {
                issues.push(ValidationIssue {
                    severity,
                    message: format!(
                        "{} ({}) is outside High/Low range ({}-{})",
                        name, value, bar.low, bar.high
                    ),
                });
            }
        }
    }

    fn check_volume(volume: Decimal, issues: &mut Vec<ValidationIssue>) {
        if volume < Decimal::ZERO {
            issues.push(ValidationIssue::hard(format!("Negative volume: {}", volume)));
        }
    }

    fn finish(
        field: &str,
        subject: &str,
        issues: Vec<ValidationIssue>,
    ) -> Result<(), MarketDataError> {
        let (hard, soft): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|i| i.severity == ValidationSeverity::Hard);

        for issue in soft {
            warn!("{} validation warning for {}: {}", field, subject, issue.message);
        }

        if hard.is_empty() {
            return Ok(());
        }

        let messages: Vec<_> = hard.into_iter().map(|i| i.message).collect();
        Err(MarketDataError::validation(field, messages.join("; ")))
    }
}
