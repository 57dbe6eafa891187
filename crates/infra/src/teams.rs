//! Team split engine: teams, memberships with revenue shares, and invites.
//!
//! Shares are bookkeeping for how future royalties divide; nothing in this
//! module moves money. Invite acceptance consumes the code with a conditional
//! update, so of two concurrent acceptances exactly one inserts a member.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::{info, instrument};

use labelledger_core::{DomainError, Entity, InviteId, TeamId, TeamMemberId, UserId};
use labelledger_royalties::user::normalize_email;
use labelledger_royalties::{
    InviteCode, InviteStatus, MemberStatus, SharePercent, Team, TeamInvite, TeamMember, TeamRole, User,
    DEFAULT_INVITE_TTL_DAYS,
};

use crate::error::{corrupt_row, is_foreign_key_violation, map_sqlx_error, LedgerError, LedgerResult};
use crate::store::{timestamp, LedgerStore};

const TEAM_COLUMNS: &str = "id, owner_id, name, created_at";
const MEMBER_COLUMNS: &str = "id, team_id, user_id, share_bps, role, status, joined_at";
const INVITE_COLUMNS: &str =
    "id, team_id, email, share_bps, invite_code, status, expires_at, created_at, accepted_by, accepted_at";

/// Rows removed by [`TeamSplitEngine::delete_team`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeamDeletion {
    pub members: u64,
    pub invites: u64,
}

#[derive(Debug, Clone)]
pub struct TeamSplitEngine {
    store: LedgerStore,
    invite_ttl_days: i64,
}

impl TeamSplitEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            invite_ttl_days: DEFAULT_INVITE_TTL_DAYS,
        }
    }

    pub fn with_invite_ttl_days(mut self, days: i64) -> Self {
        self.invite_ttl_days = days;
        self
    }

    /// Create a team. The owner joins immediately as an active member
    /// holding the full share.
    #[instrument(skip(self), fields(owner_id = %owner_id), err)]
    pub async fn create_team(&self, owner_id: UserId, name: &str, at: DateTime<Utc>) -> LedgerResult<(Team, TeamMember)> {
        let team = Team {
            id: TeamId::new(),
            owner_id,
            name: Team::validate_name(name)?,
            created_at: at,
        };
        let owner = TeamMember::owner(team.id, owner_id, at);

        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("create_team", e))?;

        sqlx::query("INSERT INTO teams (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(team.id.as_uuid())
            .bind(owner_id.as_uuid())
            .bind(&team.name)
            .bind(timestamp(at))
            .execute(&mut *tx)
            .await
            .map_err(|e| missing_parent(e, "create_team", User::not_found(owner_id)))?;

        insert_member(&mut tx, &owner).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("create_team", e))?;

        info!(team_id = %team.id, "team created");
        Ok((team, owner))
    }

    /// Issue an invite code for `email` with the given share. Cumulative
    /// shares across a team are not capped.
    #[instrument(skip(self, email), fields(team_id = %team_id, share = %share), err)]
    pub async fn invite(
        &self,
        team_id: TeamId,
        email: &str,
        share: SharePercent,
        at: DateTime<Utc>,
    ) -> LedgerResult<TeamInvite> {
        let invite = TeamInvite::issue(team_id, normalize_email(email)?, share, at, self.invite_ttl_days)?;

        sqlx::query(&format!(
            "INSERT INTO team_invites ({INVITE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)"
        ))
        .bind(invite.id.as_uuid())
        .bind(team_id.as_uuid())
        .bind(&invite.email)
        .bind(i64::from(share.basis_points()))
        .bind(invite.code.as_str())
        .bind(invite.status.as_str())
        .bind(timestamp(invite.expires_at))
        .bind(timestamp(at))
        .execute(self.store.pool())
        .await
        .map_err(|e| missing_parent(e, "invite_to_team", Team::not_found(team_id)))?;

        info!(invite_id = %invite.id, expires_at = %invite.expires_at, "team invite issued");
        Ok(invite)
    }

    /// Redeem an invite code for `user_id`.
    ///
    /// Fails `NotFound` for an unknown code, `AlreadyConsumed` once accepted,
    /// `Expired` past the expiry, and `Conflict` (leaving the invite
    /// unconsumed) when the user is already on the team.
    #[instrument(skip(self, code), fields(user_id = %user_id), err)]
    pub async fn accept_invite(&self, code: &InviteCode, user_id: UserId, now: DateTime<Utc>) -> LedgerResult<TeamMember> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("accept_invite", e))?;

        let claimed = sqlx::query(&format!(
            r#"
            UPDATE team_invites SET status = 'ACCEPTED', accepted_by = ?1, accepted_at = ?2
            WHERE invite_code = ?3 AND status = 'PENDING'
            RETURNING {INVITE_COLUMNS}
            "#
        ))
        .bind(user_id.as_uuid())
        .bind(timestamp(now))
        .bind(code.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("accept_invite", e))?;

        let Some(row) = claimed else {
            let current = load_invite_by_code(&mut tx, code).await?;
            current.check_acceptable(now)?;
            // Still pending yet not claimable: someone else holds it.
            return Err(DomainError::AlreadyConsumed.into());
        };

        let invite = decode_invite(&row)?;
        if invite.is_expired_at(now) {
            // Dropping `tx` undoes the claim.
            return Err(DomainError::Expired.into());
        }

        let member = TeamMember::from_invite(&invite, user_id, now);
        insert_member(&mut tx, &member).await.map_err(|e| match e {
            LedgerError::Domain(DomainError::Conflict(_)) => {
                DomainError::conflict(format!("user {user_id} is already a member of team {}", invite.team_id)).into()
            }
            other => other,
        })?;

        tx.commit().await.map_err(|e| map_sqlx_error("accept_invite", e))?;

        info!(team_id = %member.team_id, share = %member.share, "team invite accepted");
        Ok(member)
    }

    /// Remove a member. Balances are not touched. The owner cannot be removed;
    /// delete the team instead.
    #[instrument(skip(self), fields(team_id = %team_id, user_id = %user_id), err)]
    pub async fn remove_member(&self, team_id: TeamId, user_id: UserId) -> LedgerResult<TeamMember> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("remove_team_member", e))?;

        let removed = sqlx::query(&format!(
            "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2 AND role = 'member' RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(team_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("remove_team_member", e))?;

        let Some(row) = removed else {
            let member = load_member(&mut tx, team_id, user_id).await?;
            return Err(match member.role {
                TeamRole::Owner => DomainError::invalid_state("the team owner cannot be removed; delete the team"),
                TeamRole::Member => DomainError::invalid_state("member could not be removed"),
            }
            .into());
        };
        let member = decode_member(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("remove_team_member", e))?;

        info!("team member removed");
        Ok(member)
    }

    /// Delete a team with all of its memberships and invites.
    #[instrument(skip(self), fields(team_id = %team_id), err)]
    pub async fn delete_team(&self, team_id: TeamId) -> LedgerResult<TeamDeletion> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("delete_team", e))?;

        let members = sqlx::query("DELETE FROM team_members WHERE team_id = ?1")
            .bind(team_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_team", e))?
            .rows_affected();

        let invites = sqlx::query("DELETE FROM team_invites WHERE team_id = ?1")
            .bind(team_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_team", e))?
            .rows_affected();

        let teams = sqlx::query("DELETE FROM teams WHERE id = ?1")
            .bind(team_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_team", e))?
            .rows_affected();
        if teams == 0 {
            return Err(Team::not_found(team_id).into());
        }

        tx.commit().await.map_err(|e| map_sqlx_error("delete_team", e))?;

        info!(members, invites, "team deleted");
        Ok(TeamDeletion { members, invites })
    }

    #[instrument(skip(self), fields(team_id = %team_id, user_id = %user_id, share = %share), err)]
    pub async fn update_member_share(
        &self,
        team_id: TeamId,
        user_id: UserId,
        share: SharePercent,
    ) -> LedgerResult<TeamMember> {
        let row = sqlx::query(&format!(
            "UPDATE team_members SET share_bps = ?1 WHERE team_id = ?2 AND user_id = ?3 RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(i64::from(share.basis_points()))
        .bind(team_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("update_member_share", e))?
        .ok_or_else(|| TeamMember::not_found(user_id))?;

        decode_member(&row)
    }

    /// Delete an invite that has not been accepted or expired yet.
    #[instrument(skip(self), fields(invite_id = %invite_id), err)]
    pub async fn revoke_invite(&self, invite_id: InviteId) -> LedgerResult<TeamInvite> {
        let mut tx = self.store.pool().begin().await.map_err(|e| map_sqlx_error("revoke_invite", e))?;

        let removed = sqlx::query(&format!(
            "DELETE FROM team_invites WHERE id = ?1 AND status = 'PENDING' RETURNING {INVITE_COLUMNS}"
        ))
        .bind(invite_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("revoke_invite", e))?;

        let Some(row) = removed else {
            let status: Option<String> = sqlx::query_scalar("SELECT status FROM team_invites WHERE id = ?1")
                .bind(invite_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("revoke_invite", e))?;
            return Err(match status {
                Some(status) => DomainError::invalid_state(format!("invite is {status}, only pending invites can be revoked")),
                None => TeamInvite::not_found(invite_id),
            }
            .into());
        };
        let invite = decode_invite(&row)?;

        tx.commit().await.map_err(|e| map_sqlx_error("revoke_invite", e))?;
        Ok(invite)
    }

    /// Mark every pending invite whose expiry is at or before `now` as
    /// expired. Returns how many were marked.
    #[instrument(skip(self), err)]
    pub async fn expire_stale_invites(&self, now: DateTime<Utc>) -> LedgerResult<u64> {
        let expired = sqlx::query("UPDATE team_invites SET status = 'EXPIRED' WHERE status = 'PENDING' AND expires_at <= ?1")
            .bind(timestamp(now))
            .execute(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("expire_stale_invites", e))?
            .rows_affected();

        if expired > 0 {
            info!(expired, "stale team invites expired");
        }
        Ok(expired)
    }

    #[instrument(skip(self), fields(team_id = %team_id), err)]
    pub async fn get_team(&self, team_id: TeamId) -> LedgerResult<Team> {
        let row = sqlx::query(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?1"))
            .bind(team_id.as_uuid())
            .fetch_optional(self.store.pool())
            .await
            .map_err(|e| map_sqlx_error("get_team", e))?
            .ok_or_else(|| Team::not_found(team_id))?;
        decode_team(&row)
    }

    /// Owner first, then by join time.
    #[instrument(skip(self), fields(team_id = %team_id), err)]
    pub async fn list_members(&self, team_id: TeamId) -> LedgerResult<Vec<TeamMember>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM team_members WHERE team_id = ?1 ORDER BY role = 'owner' DESC, joined_at ASC"
        ))
        .bind(team_id.as_uuid())
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_members", e))?;

        rows.iter().map(decode_member).collect()
    }

    /// Newest first.
    #[instrument(skip(self), fields(team_id = %team_id), err)]
    pub async fn list_invites(&self, team_id: TeamId) -> LedgerResult<Vec<TeamInvite>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVITE_COLUMNS} FROM team_invites WHERE team_id = ?1 ORDER BY created_at DESC"
        ))
        .bind(team_id.as_uuid())
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("list_invites", e))?;

        rows.iter().map(decode_invite).collect()
    }

    /// Teams the user owns or belongs to.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn teams_for_user(&self, user_id: UserId) -> LedgerResult<Vec<Team>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.owner_id, t.name, t.created_at
            FROM teams t
            JOIN team_members m ON m.team_id = t.id
            WHERE m.user_id = ?1
            ORDER BY t.created_at ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| map_sqlx_error("teams_for_user", e))?;

        rows.iter().map(decode_team).collect()
    }
}

async fn insert_member(conn: &mut SqliteConnection, member: &TeamMember) -> LedgerResult<()> {
    sqlx::query(&format!(
        "INSERT INTO team_members ({MEMBER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ))
    .bind(member.id.as_uuid())
    .bind(member.team_id.as_uuid())
    .bind(member.user_id.as_uuid())
    .bind(i64::from(member.share.basis_points()))
    .bind(member.role.as_str())
    .bind(member.status.as_str())
    .bind(timestamp(member.joined_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| missing_parent(e, "insert_team_member", User::not_found(member.user_id)))?;
    Ok(())
}

async fn load_invite_by_code(conn: &mut SqliteConnection, code: &InviteCode) -> LedgerResult<TeamInvite> {
    let row = sqlx::query(&format!("SELECT {INVITE_COLUMNS} FROM team_invites WHERE invite_code = ?1"))
        .bind(code.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("accept_invite", e))?
        .ok_or_else(|| TeamInvite::not_found(code))?;
    decode_invite(&row)
}

async fn load_member(conn: &mut SqliteConnection, team_id: TeamId, user_id: UserId) -> LedgerResult<TeamMember> {
    let row = sqlx::query(&format!(
        "SELECT {MEMBER_COLUMNS} FROM team_members WHERE team_id = ?1 AND user_id = ?2"
    ))
    .bind(team_id.as_uuid())
    .bind(user_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("get_team_member", e))?
    .ok_or_else(|| TeamMember::not_found(user_id))?;
    decode_member(&row)
}

/// A foreign key failure on insert means the referenced parent is missing.
fn missing_parent(err: sqlx::Error, operation: &'static str, not_found: DomainError) -> LedgerError {
    if is_foreign_key_violation(&err) {
        not_found.into()
    } else {
        map_sqlx_error(operation, err)
    }
}

// SQLx row types

struct TeamRow {
    id: uuid::Uuid,
    owner_id: uuid::Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for TeamRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(TeamRow {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<TeamRow> for Team {
    fn from(row: TeamRow) -> Self {
        Team {
            id: TeamId::from_uuid(row.id),
            owner_id: UserId::from_uuid(row.owner_id),
            name: row.name,
            created_at: row.created_at,
        }
    }
}

struct MemberRow {
    id: uuid::Uuid,
    team_id: uuid::Uuid,
    user_id: uuid::Uuid,
    share_bps: i64,
    role: String,
    status: String,
    joined_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for MemberRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(MemberRow {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            user_id: row.try_get("user_id")?,
            share_bps: row.try_get("share_bps")?,
            role: row.try_get("role")?,
            status: row.try_get("status")?,
            joined_at: row.try_get("joined_at")?,
        })
    }
}

impl TryFrom<MemberRow> for TeamMember {
    type Error = DomainError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        Ok(TeamMember {
            id: TeamMemberId::from_uuid(row.id),
            team_id: TeamId::from_uuid(row.team_id),
            user_id: UserId::from_uuid(row.user_id),
            share: share_from_column(row.share_bps)?,
            role: TeamRole::parse(&row.role)?,
            status: MemberStatus::parse(&row.status)?,
            joined_at: row.joined_at,
        })
    }
}

struct InviteRow {
    id: uuid::Uuid,
    team_id: uuid::Uuid,
    email: String,
    share_bps: i64,
    invite_code: String,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    accepted_by: Option<uuid::Uuid>,
    accepted_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, SqliteRow> for InviteRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(InviteRow {
            id: row.try_get("id")?,
            team_id: row.try_get("team_id")?,
            email: row.try_get("email")?,
            share_bps: row.try_get("share_bps")?,
            invite_code: row.try_get("invite_code")?,
            status: row.try_get("status")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            accepted_by: row.try_get("accepted_by")?,
            accepted_at: row.try_get("accepted_at")?,
        })
    }
}

impl TryFrom<InviteRow> for TeamInvite {
    type Error = DomainError;

    fn try_from(row: InviteRow) -> Result<Self, Self::Error> {
        Ok(TeamInvite {
            id: InviteId::from_uuid(row.id),
            team_id: TeamId::from_uuid(row.team_id),
            email: row.email,
            share: share_from_column(row.share_bps)?,
            code: InviteCode::parse(&row.invite_code)?,
            status: InviteStatus::parse(&row.status)?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            accepted_by: row.accepted_by.map(UserId::from_uuid),
            accepted_at: row.accepted_at,
        })
    }
}

fn share_from_column(bps: i64) -> Result<SharePercent, DomainError> {
    let bps = u16::try_from(bps).map_err(|_| DomainError::validation(format!("share out of range: {bps}")))?;
    SharePercent::from_basis_points(bps)
}

fn decode_team(row: &SqliteRow) -> LedgerResult<Team> {
    TeamRow::from_row(row)
        .map(Team::from)
        .map_err(|e| corrupt_row("decode_team", e))
}

fn decode_member(row: &SqliteRow) -> LedgerResult<TeamMember> {
    let row = MemberRow::from_row(row).map_err(|e| corrupt_row("decode_team_member", e))?;
    TeamMember::try_from(row).map_err(|e| corrupt_row("decode_team_member", e))
}

fn decode_invite(row: &SqliteRow) -> LedgerResult<TeamInvite> {
    let row = InviteRow::from_row(row).map_err(|e| corrupt_row("decode_team_invite", e))?;
    TeamInvite::try_from(row).map_err(|e| corrupt_row("decode_team_invite", e))
}
