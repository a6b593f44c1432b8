//! Money value object
//!
//! A `(amount, currency)` pair where the amount is always rescaled to the
//! currency's declared decimal places with half-up rounding. Negative
//! amounts cannot be constructed and no arithmetic can produce one.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Supported settlement currencies with their decimal scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Krw,
    Usd,
    Jpy,
    Eur,
}

impl Currency {
    /// Number of decimal places amounts in this currency carry.
    pub const fn decimal_places(self) -> u32 {
        match self {
            Currency::Krw | Currency::Jpy => 0,
            Currency::Usd | Currency::Eur => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Currency::Krw => "KRW",
            Currency::Usd => "USD",
            Currency::Jpy => "JPY",
            Currency::Eur => "EUR",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        match s {
            "KRW" => Ok(Currency::Krw),
            "USD" => Ok(Currency::Usd),
            "JPY" => Ok(Currency::Jpy),
            "EUR" => Ok(Currency::Eur),
            other => Err(MoneyError::UnknownCurrency(other.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("negative amount: {0}")]
    NegativeAmount(Decimal),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("amount overflow")]
    Overflow,
}

/// A non-negative monetary amount in a single currency.
///
/// Construction rescales to the currency's decimal places using half-up
/// rounding, so `Money::new(Currency::Usd, 10.005)` holds `10.01` and
/// `Money::new(Currency::Krw, 100.4)` holds `100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

/// Wire shape: `{"amount": "20000", "currency": "KRW"}`. The string form
/// keeps the declared scale exact across serialization boundaries.
#[derive(Serialize, Deserialize)]
struct MoneyRepr {
    #[serde(with = "rust_decimal::serde::str")]
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(repr.currency, repr.amount)
    }
}

impl From<Money> for MoneyRepr {
    fn from(money: Money) -> Self {
        Self {
            amount: money.amount,
            currency: money.currency,
        }
    }
}

impl Money {
    /// Construct a Money, rescaling half-up to the currency's decimal places.
    ///
    /// # Errors
    /// Rejects negative amounts.
    pub fn new(currency: Currency, amount: Decimal) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::NegativeAmount(amount));
        }
        let amount = amount.round_dp_with_strategy(
            currency.decimal_places(),
            RoundingStrategy::MidpointAwayFromZero,
        );
        Ok(Self { amount, currency })
    }

    /// Zero in the given currency.
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    /// Add two amounts of the same currency.
    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Money::new(self.currency, sum)
    }

    /// Subtract; fails when the result would be negative or currencies differ.
    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let diff = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        if diff.is_sign_negative() && !diff.is_zero() {
            return Err(MoneyError::NegativeAmount(diff));
        }
        Money::new(self.currency, diff)
    }

    /// Multiply by a non-negative integer quantity.
    pub fn multiply(&self, quantity: i64) -> Result<Money, MoneyError> {
        let factor = Decimal::from(quantity);
        if factor.is_sign_negative() {
            return Err(MoneyError::NegativeAmount(factor));
        }
        let product = self
            .amount
            .checked_mul(factor)
            .ok_or(MoneyError::Overflow)?;
        Money::new(self.currency, product)
    }

    /// Multiply by a non-negative decimal factor (e.g. a rate), rescaling
    /// the result half-up.
    pub fn multiply_decimal(&self, factor: Decimal) -> Result<Money, MoneyError> {
        if factor.is_sign_negative() {
            return Err(MoneyError::NegativeAmount(factor));
        }
        let product = self
            .amount
            .checked_mul(factor)
            .ok_or(MoneyError::Overflow)?;
        Money::new(self.currency, product)
    }

    /// Compare amounts; only defined within a currency.
    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.require_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// `self > other` within a currency.
    pub fn is_greater_than(&self, other: &Money) -> Result<bool, MoneyError> {
        Ok(self.compare(other)? == Ordering::Greater)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
