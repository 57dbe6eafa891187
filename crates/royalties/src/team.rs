//! Revenue-split teams: membership, shares and invites.
//!
//! Shares only govern how future royalties are divided. Nothing here touches a
//! balance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use labelledger_core::{DomainError, Entity, InviteId, TeamId, TeamMemberId, UserId};

pub const DEFAULT_INVITE_TTL_DAYS: i64 = 7;
/// Longest invite lifetime accepted anywhere (ten years).
pub const MAX_INVITE_TTL_DAYS: i64 = 3_650;

/// Percentage entitlement in basis points (1 = 0.01%, 10000 = 100%).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct SharePercent(u16);

impl SharePercent {
    pub const FULL: SharePercent = SharePercent(10_000);

    pub fn from_basis_points(bps: u16) -> Result<Self, DomainError> {
        if (1..=10_000).contains(&bps) {
            Ok(Self(bps))
        } else {
            Err(DomainError::validation(format!(
                "share must be between 0.01% and 100%, got {bps} bps"
            )))
        }
    }

    pub fn from_percent(percent: u8) -> Result<Self, DomainError> {
        Self::from_basis_points(u16::from(percent) * 100)
    }

    /// Parses `"25"`, `"12.5"` or `"33.33"` (percent, up to two decimals).
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let s = s.trim().trim_end_matches('%');
        let invalid = || DomainError::validation(format!("invalid share percentage: {s:?}"));
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || frac.len() > 2 {
            return Err(invalid());
        }
        let whole: u16 = whole.parse().map_err(|_| invalid())?;
        let frac: u16 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u16>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let bps = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(invalid)?;
        Self::from_basis_points(bps)
    }

    pub fn basis_points(self) -> u16 {
        self.0
    }
}

impl core::fmt::Display for SharePercent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (whole, frac) = (self.0 / 100, self.0 % 100);
        if frac == 0 {
            write!(f, "{whole}%")
        } else {
            write!(f, "{whole}.{frac:02}%")
        }
    }
}

impl TryFrom<u16> for SharePercent {
    type Error = DomainError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        SharePercent::from_basis_points(value)
    }
}

impl From<SharePercent> for u16 {
    fn from(value: SharePercent) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Owner,
    Member,
}

impl TeamRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TeamRole::Owner => "owner",
            TeamRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "owner" => Ok(TeamRole::Owner),
            "member" => Ok(TeamRole::Member),
            other => Err(DomainError::validation(format!("unknown team role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Pending,
    Active,
}

impl MemberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Pending => "PENDING",
            MemberStatus::Active => "ACTIVE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "PENDING" => Ok(MemberStatus::Pending),
            "ACTIVE" => Ok(MemberStatus::Active),
            other => Err(DomainError::validation(format!("unknown member status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Expired,
}

impl InviteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InviteStatus::Pending => "PENDING",
            InviteStatus::Accepted => "ACCEPTED",
            InviteStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "PENDING" => Ok(InviteStatus::Pending),
            "ACCEPTED" => Ok(InviteStatus::Accepted),
            "EXPIRED" => Ok(InviteStatus::Expired),
            other => Err(DomainError::validation(format!("unknown invite status: {other}"))),
        }
    }
}

/// Single-use invite code handed out by email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
    /// 128 random bits rendered as 32 upper-case hex characters.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string().to_ascii_uppercase())
    }

    /// Codes are case-insensitive when typed back in.
    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let code = s.trim().to_ascii_uppercase();
        if code.len() == 32 && code.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(code))
        } else {
            Err(DomainError::validation("malformed invite code"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for InviteCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub owner_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for Team {
    type Id = TeamId;
    const KIND: &'static str = "team";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Team {
    pub fn validate_name(name: &str) -> Result<String, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("team name is required"));
        }
        if name.chars().count() > 120 {
            return Err(DomainError::validation("team name is too long"));
        }
        Ok(name.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: TeamMemberId,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub share: SharePercent,
    pub role: TeamRole,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

impl Entity for TeamMember {
    type Id = TeamMemberId;
    const KIND: &'static str = "team member";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TeamMember {
    /// The membership row created alongside a new team.
    pub fn owner(team_id: TeamId, owner_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            id: TeamMemberId::new(),
            team_id,
            user_id: owner_id,
            share: SharePercent::FULL,
            role: TeamRole::Owner,
            status: MemberStatus::Active,
            joined_at: at,
        }
    }

    pub fn from_invite(invite: &TeamInvite, user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            id: TeamMemberId::new(),
            team_id: invite.team_id,
            user_id,
            share: invite.share,
            role: TeamRole::Member,
            status: MemberStatus::Active,
            joined_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInvite {
    pub id: InviteId,
    pub team_id: TeamId,
    pub email: String,
    pub share: SharePercent,
    pub code: InviteCode,
    pub status: InviteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub accepted_by: Option<UserId>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Entity for TeamInvite {
    type Id = InviteId;
    const KIND: &'static str = "invite";

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl TeamInvite {
    /// Fails `Validation` when `ttl_days` is outside `1..=MAX_INVITE_TTL_DAYS`
    /// or the expiry would not be a representable time.
    pub fn issue(
        team_id: TeamId,
        email: String,
        share: SharePercent,
        at: DateTime<Utc>,
        ttl_days: i64,
    ) -> Result<Self, DomainError> {
        if !(1..=MAX_INVITE_TTL_DAYS).contains(&ttl_days) {
            return Err(DomainError::validation(format!(
                "invite lifetime must be 1..={MAX_INVITE_TTL_DAYS} days, got {ttl_days}"
            )));
        }
        let expires_at = Duration::try_days(ttl_days)
            .and_then(|ttl| at.checked_add_signed(ttl))
            .ok_or_else(|| DomainError::validation("invite expiry is out of range"))?;

        Ok(Self {
            id: InviteId::new(),
            team_id,
            email,
            share,
            code: InviteCode::generate(),
            status: InviteStatus::Pending,
            expires_at,
            created_at: at,
            accepted_by: None,
            accepted_at: None,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Why this invite cannot be accepted at `now`, if it cannot.
    pub fn check_acceptable(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.status {
            InviteStatus::Accepted => Err(DomainError::AlreadyConsumed),
            InviteStatus::Expired => Err(DomainError::Expired),
            InviteStatus::Pending if self.is_expired_at(now) => Err(DomainError::Expired),
            InviteStatus::Pending => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn invite(at: DateTime<Utc>) -> TeamInvite {
        TeamInvite::issue(
            TeamId::new(),
            "guest@label.com".to_string(),
            SharePercent::from_percent(25).unwrap(),
            at,
            DEFAULT_INVITE_TTL_DAYS,
        )
        .unwrap()
    }

    #[test]
    fn invite_lifetime_out_of_range_is_rejected() {
        let issue = |days| {
            TeamInvite::issue(
                TeamId::new(),
                "guest@label.com".to_string(),
                SharePercent::FULL,
                Utc::now(),
                days,
            )
        };
        assert!(issue(MAX_INVITE_TTL_DAYS).is_ok());
        for days in [0, -1, MAX_INVITE_TTL_DAYS + 1, 999_999_999_999, i64::MAX] {
            assert!(matches!(issue(days), Err(DomainError::Validation(_))), "{days} days");
        }
    }

    #[test]
    fn expiry_past_the_calendar_end_is_rejected() {
        let err = TeamInvite::issue(
            TeamId::new(),
            "guest@label.com".to_string(),
            SharePercent::FULL,
            DateTime::<Utc>::MAX_UTC,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn invite_expires_after_seven_days() {
        let now = Utc::now();
        let inv = invite(now);
        assert_eq!(inv.expires_at - inv.created_at, Duration::days(7));
        assert!(inv.check_acceptable(now + Duration::days(6)).is_ok());
        assert_eq!(inv.check_acceptable(now + Duration::days(7)), Err(DomainError::Expired));
    }

    #[test]
    fn consumed_invite_reports_consumed_even_when_expired() {
        let now = Utc::now();
        let mut inv = invite(now);
        inv.status = InviteStatus::Accepted;
        assert_eq!(inv.check_acceptable(now + Duration::days(30)), Err(DomainError::AlreadyConsumed));
    }

    #[test]
    fn generated_codes_parse_back_and_differ() {
        let a = InviteCode::generate();
        let b = InviteCode::generate();
        assert_ne!(a, b);
        assert_eq!(InviteCode::parse(&a.as_str().to_ascii_lowercase()).unwrap(), a);
        assert!(InviteCode::parse("short").is_err());
    }

    #[test]
    fn share_display_and_parse() {
        assert_eq!(SharePercent::parse("12.5").unwrap().basis_points(), 1250);
        assert_eq!(SharePercent::parse("33.33%").unwrap().to_string(), "33.33%");
        assert_eq!(SharePercent::from_percent(40).unwrap().to_string(), "40%");
        assert!(SharePercent::parse("0").is_err());
        assert!(SharePercent::parse("100.01").is_err());
        assert!(SharePercent::parse("12.345").is_err());
    }

    #[test]
    fn owner_row_is_active_with_full_share() {
        let m = TeamMember::owner(TeamId::new(), UserId::new(), Utc::now());
        assert_eq!(m.role, TeamRole::Owner);
        assert_eq!(m.status, MemberStatus::Active);
        assert_eq!(m.share, SharePercent::FULL);
    }

    #[test]
    fn team_name_is_trimmed() {
        assert_eq!(Team::validate_name("  The Band ").unwrap(), "The Band");
        assert!(Team::validate_name("   ").is_err());
    }

    proptest! {
        #[test]
        fn any_valid_basis_points_round_trip_through_display(bps in 1u16..=10_000) {
            let share = SharePercent::from_basis_points(bps).unwrap();
            prop_assert_eq!(SharePercent::parse(&share.to_string()).unwrap(), share);
        }
    }
}
