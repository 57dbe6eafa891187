use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labelledger_core::{DomainError, EarningId, Entity, Money, UserId};

/// Reporting period of an earning, `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(String);

impl Month {
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let s = s.trim();
        let invalid = || DomainError::validation(format!("month must be YYYY-MM, got {s:?}"));

        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: u16 = year.parse().map_err(|_| invalid())?;
        let month: u8 = month.parse().map_err(|_| invalid())?;
        if year < 1900 || !(1..=12).contains(&month) {
            return Err(invalid());
        }

        Ok(Self(format!("{year:04}-{month:02}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Month {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Month {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Month::parse(&value)
    }
}

impl From<Month> for String {
    fn from(value: Month) -> Self {
        value.0
    }
}

/// A posted royalty earning. Immutable once posted; the only way to undo it is
/// to delete it, which reverses the balance credit as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Earning {
    pub id: EarningId,
    pub user_id: UserId,
    pub month: Month,
    pub amount: Money,
    pub streams: i64,
    pub downloads: i64,
    pub created_at: DateTime<Utc>,
}

impl Entity for Earning {
    type Id = EarningId;
    const KIND: &'static str = "earning";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input for posting an earning (admin action).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEarning {
    pub user_id: UserId,
    pub month: Month,
    pub amount: Money,
    pub streams: i64,
    pub downloads: i64,
}

impl NewEarning {
    pub fn validate(&self) -> Result<(), DomainError> {
        self.amount.ensure_positive("earning amount")?;
        if self.streams < 0 || self.downloads < 0 {
            return Err(DomainError::validation("streams and downloads must be non-negative"));
        }
        Ok(())
    }

    pub fn into_earning(self, id: EarningId, created_at: DateTime<Utc>) -> Earning {
        Earning {
            id,
            user_id: self.user_id,
            month: self.month,
            amount: self.amount,
            streams: self.streams,
            downloads: self.downloads,
            created_at,
        }
    }
}

/// Totals across a user's postings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSummary {
    pub total: Money,
    pub streams: i64,
    pub downloads: i64,
    pub postings: u64,
}

impl EarningsSummary {
    pub fn from_earnings<'a>(earnings: impl IntoIterator<Item = &'a Earning>) -> Result<Self, DomainError> {
        earnings.into_iter().try_fold(Self::default(), |acc, e| {
            Ok(Self {
                total: acc
                    .total
                    .checked_add(e.amount)
                    .ok_or_else(|| DomainError::invalid_state("earnings total overflow"))?,
                streams: acc.streams.saturating_add(e.streams),
                downloads: acc.downloads.saturating_add(e.downloads),
                postings: acc.postings + 1,
            })
        })
    }
}
