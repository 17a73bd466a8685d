use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::WaiverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    LateFee,
    Interest,
    Principal,
}

impl Component {
    /// Order in which PTP amounts and payments consume an obligation.
    pub const ORDER: [Component; 3] = [Component::LateFee, Component::Interest, Component::Principal];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::LateFee => "late_fee",
            Component::Interest => "interest",
            Component::Principal => "principal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "late_fee" => Some(Component::LateFee),
            "interest" => Some(Component::Interest),
            "principal" => Some(Component::Principal),
            _ => None,
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minor-unit amounts, one per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentAmounts {
    pub late_fee: i64,
    pub interest: i64,
    pub principal: i64,
}

impl ComponentAmounts {
    pub const ZERO: ComponentAmounts = ComponentAmounts {
        late_fee: 0,
        interest: 0,
        principal: 0,
    };

    pub fn new(late_fee: i64, interest: i64, principal: i64) -> Self {
        Self {
            late_fee,
            interest,
            principal,
        }
    }

    pub fn get(&self, component: Component) -> i64 {
        match component {
            Component::LateFee => self.late_fee,
            Component::Interest => self.interest,
            Component::Principal => self.principal,
        }
    }

    pub fn get_mut(&mut self, component: Component) -> &mut i64 {
        match component {
            Component::LateFee => &mut self.late_fee,
            Component::Interest => &mut self.interest,
            Component::Principal => &mut self.principal,
        }
    }

    pub fn set(&mut self, component: Component, value: i64) {
        *self.get_mut(component) = value;
    }

    pub fn total(&self) -> i64 {
        self.late_fee + self.interest + self.principal
    }

    pub fn is_zero(&self) -> bool {
        self.late_fee == 0 && self.interest == 0 && self.principal == 0
    }

    pub fn has_negative(&self) -> bool {
        self.late_fee < 0 || self.interest < 0 || self.principal < 0
    }
}

impl Add for ComponentAmounts {
    type Output = ComponentAmounts;

    fn add(self, rhs: Self) -> Self::Output {
        ComponentAmounts {
            late_fee: self.late_fee + rhs.late_fee,
            interest: self.interest + rhs.interest,
            principal: self.principal + rhs.principal,
        }
    }
}

impl AddAssign for ComponentAmounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ComponentAmounts {
    type Output = ComponentAmounts;

    fn sub(self, rhs: Self) -> Self::Output {
        ComponentAmounts {
            late_fee: self.late_fee - rhs.late_fee,
            interest: self.interest - rhs.interest,
            principal: self.principal - rhs.principal,
        }
    }
}

impl Sum for ComponentAmounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ComponentAmounts::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a ComponentAmounts> for ComponentAmounts {
    fn sum<I: Iterator<Item = &'a ComponentAmounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Waiver fractions per component, each within `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Percentages {
    pub late_fee: Decimal,
    pub interest: Decimal,
    pub principal: Decimal,
}

impl Percentages {
    pub fn new(late_fee: Decimal, interest: Decimal, principal: Decimal) -> Self {
        Self {
            late_fee,
            interest,
            principal,
        }
    }

    pub fn get(&self, component: Component) -> Decimal {
        match component {
            Component::LateFee => self.late_fee,
            Component::Interest => self.interest,
            Component::Principal => self.principal,
        }
    }

    pub fn validate(&self) -> Result<(), WaiverError> {
        for component in Component::ORDER {
            let value = self.get(component);
            if value < Decimal::ZERO || value > Decimal::ONE {
                return Err(WaiverError::InvalidPercentage { component, value });
            }
        }
        Ok(())
    }

    /// Whole percents for display; the fractions stay authoritative.
    pub fn display_percent(&self) -> Percentages {
        let hundred = Decimal::ONE_HUNDRED;
        Percentages {
            late_fee: (self.late_fee * hundred).round_dp(0),
            interest: (self.interest * hundred).round_dp(0),
            principal: (self.principal * hundred).round_dp(0),
        }
    }

    /// `ceil(pct * amount)` for the given component.
    pub fn ceil_share(&self, component: Component, amount: i64) -> i64 {
        ceil_share(self.get(component), amount)
    }
}

pub fn ceil_share(pct: Decimal, amount: i64) -> i64 {
    if amount <= 0 || pct <= Decimal::ZERO {
        return 0;
    }
    // pct is at most 1, so the product never exceeds `amount`.
    (pct * Decimal::from(amount))
        .ceil()
        .to_i64()
        .unwrap_or(amount)
}
