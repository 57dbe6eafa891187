use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labelledger_core::{DomainError, Entity, PaymentMethodId, UserId};

/// International bank account number, stored compact and upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl Iban {
    /// Strips whitespace, upper-cases, then checks shape and the ISO 13616
    /// mod-97 checksum.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let compact: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let invalid = |why: &str| DomainError::validation(format!("invalid IBAN ({why})"));

        if !(15..=34).contains(&compact.len()) {
            return Err(invalid("length"));
        }
        let bytes = compact.as_bytes();
        if !bytes[..2].iter().all(u8::is_ascii_uppercase) || !bytes[2..4].iter().all(u8::is_ascii_digit) {
            return Err(invalid("country/check digits"));
        }
        if !bytes.iter().all(u8::is_ascii_alphanumeric) {
            return Err(invalid("characters"));
        }

        // Move the first four characters to the end, map letters to 10..35,
        // and reduce mod 97 digit by digit.
        let rearranged = bytes[4..].iter().chain(bytes[..4].iter());
        let mut remainder: u32 = 0;
        for b in rearranged {
            let value = if b.is_ascii_digit() {
                u32::from(b - b'0')
            } else {
                u32::from(b - b'A') + 10
            };
            remainder = if value >= 10 {
                (remainder * 100 + value) % 97
            } else {
                (remainder * 10 + value) % 97
            };
        }
        if remainder != 1 {
            return Err(invalid("checksum"));
        }

        Ok(Self(compact))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Country code prefix, e.g. `DE`.
    pub fn country(&self) -> &str {
        &self.0[..2]
    }

    /// First and last four characters only, for logs and lists.
    pub fn masked(&self) -> String {
        let n = self.0.len();
        format!("{}…{}", &self.0[..4], &self.0[n - 4..])
    }
}

impl TryFrom<String> for Iban {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Iban::parse(&value)
    }
}

impl From<Iban> for String {
    fn from(value: Iban) -> Self {
        value.0
    }
}

/// SWIFT/BIC code (8 or 11 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SwiftBic(String);

impl SwiftBic {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim().to_ascii_uppercase();
        let bytes = code.as_bytes();
        let ok = matches!(bytes.len(), 8 | 11)
            && bytes[..6].iter().all(u8::is_ascii_uppercase)
            && bytes[6..].iter().all(u8::is_ascii_alphanumeric);
        if ok {
            Ok(Self(code))
        } else {
            Err(DomainError::validation(format!("invalid SWIFT/BIC: {raw:?}")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SwiftBic {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SwiftBic::parse(&value)
    }
}

impl From<SwiftBic> for String {
    fn from(value: SwiftBic) -> Self {
        value.0
    }
}

/// Stored bank details for payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user_id: UserId,
    pub bank_name: String,
    pub account_holder: String,
    pub iban: Iban,
    pub swift_bic: Option<SwiftBic>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl Entity for PaymentMethod {
    type Id = PaymentMethodId;
    const KIND: &'static str = "payment method";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPaymentMethod {
    pub user_id: UserId,
    pub bank_name: String,
    pub account_holder: String,
    pub iban: Iban,
    pub swift_bic: Option<SwiftBic>,
    pub is_default: bool,
}

impl NewPaymentMethod {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_text("bank name", &self.bank_name)?;
        require_text("account holder", &self.account_holder)
    }
}

/// Field-by-field edit of a payment method. `None` leaves a column as is.
///
/// The default flag is deliberately absent: it only moves through
/// `set_default`, which keeps the one-default-per-user invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodUpdate {
    pub bank_name: Option<String>,
    pub account_holder: Option<String>,
    pub iban: Option<Iban>,
    /// `Some(None)` clears the stored code.
    pub swift_bic: Option<Option<SwiftBic>>,
}

impl PaymentMethodUpdate {
    pub fn is_empty(&self) -> bool {
        self.bank_name.is_none() && self.account_holder.is_none() && self.iban.is_none() && self.swift_bic.is_none()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.bank_name {
            require_text("bank name", name)?;
        }
        if let Some(holder) = &self.account_holder {
            require_text("account holder", holder)?;
        }
        Ok(())
    }

    /// Apply onto a loaded row.
    pub fn apply_to(self, method: &mut PaymentMethod) {
        if let Some(name) = self.bank_name {
            method.bank_name = name.trim().to_string();
        }
        if let Some(holder) = self.account_holder {
            method.account_holder = holder.trim().to_string();
        }
        if let Some(iban) = self.iban {
            method.iban = iban;
        }
        if let Some(bic) = self.swift_bic {
            method.swift_bic = bic;
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        Err(DomainError::validation(format!("{field} is required")))
    } else {
        Ok(())
    }
}
