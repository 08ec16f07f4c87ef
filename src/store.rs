//! Database store for invites and their responsibility units

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::assignment::invite::{Invite, LifecycleState, Transition};
use crate::error::{AppError, Result};
use crate::models::ResponsibilityUnit;

const INVITE_COLUMNS: &str = "id, passport_id, email, name, company, message, role, mode, state, \
    token, idempotency_key, submission, expires_at, notified_at, fulfilled_at, removed_at, \
    created_at, updated_at";

/// Apply the embedded migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::Database(e.into()))
}

/// Result of a checked insert
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(Invite),
    /// An invite with the same idempotency key already existed
    Existing(Invite),
}

impl CreateOutcome {
    pub fn invite(&self) -> &Invite {
        match self {
            CreateOutcome::Created(invite) | CreateOutcome::Existing(invite) => invite,
        }
    }

    pub fn into_invite(self) -> Invite {
        match self {
            CreateOutcome::Created(invite) | CreateOutcome::Existing(invite) => invite,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a saved invite after `check` accepted the passport's active
    /// invites, all inside one write transaction. Concurrent writers for the
    /// same passport serialize on the revision bump, so the check always sees
    /// every grant committed before it.
    pub async fn create_invite_checked<F>(&self, invite: Invite, check: F) -> Result<CreateOutcome>
    where
        F: FnOnce(&[Invite]) -> Result<()>,
    {
        let mut tx = self.pool.begin().await?;

        bump_revision(&mut tx, invite.passport_id).await?;

        if let Some(key) = invite.idempotency_key.as_deref() {
            if let Some(existing) = fetch_by_idempotency_key(&mut tx, invite.passport_id, key).await? {
                tx.rollback().await?;
                tracing::debug!(
                    "Idempotent replay of invite {} for key {}",
                    existing.id,
                    key
                );
                return Ok(CreateOutcome::Existing(existing));
            }
        }

        let active = fetch_passport_invites(&mut tx, invite.passport_id, true).await?;
        check(&active)?;

        insert_invite(&mut tx, &invite).await?;
        tx.commit().await?;

        Ok(CreateOutcome::Created(invite))
    }

    pub async fn get_invite(&self, id: Uuid) -> Result<Invite> {
        let mut conn = self.pool.acquire().await?;
        fetch_invite(&mut conn, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invite {} not found", id)))
    }

    pub async fn get_invite_by_token(&self, token: &str) -> Result<Option<Invite>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, InviteRow>(&format!(
            "SELECT {} FROM invites WHERE token = ?",
            INVITE_COLUMNS
        ))
        .bind(token)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => {
                let units = fetch_units(&mut conn, &row.id).await?;
                Ok(Some(row.into_invite(units)?))
            }
            None => Ok(None),
        }
    }

    /// Every invite of a passport, oldest first
    pub async fn list_invites(&self, passport_id: Uuid) -> Result<Vec<Invite>> {
        let mut conn = self.pool.acquire().await?;
        fetch_passport_invites(&mut conn, passport_id, false).await
    }

    /// Invites that count towards exclusivity, oldest first
    pub async fn list_active_invites(&self, passport_id: Uuid) -> Result<Vec<Invite>> {
        let mut conn = self.pool.acquire().await?;
        fetch_passport_invites(&mut conn, passport_id, true).await
    }

    pub async fn list_invites_in_state(
        &self,
        passport_id: Uuid,
        state: LifecycleState,
    ) -> Result<Vec<Invite>> {
        Ok(self
            .list_invites(passport_id)
            .await?
            .into_iter()
            .filter(|i| i.state == state)
            .collect())
    }

    /// Load an invite, apply a state change and persist it in one transaction.
    /// A refused change maps to `InvalidTransition`; an unchanged invite is not
    /// written.
    pub async fn transition<F>(&self, id: Uuid, change: F) -> Result<(Invite, Transition)>
    where
        F: FnOnce(&mut Invite) -> std::result::Result<Transition, String>,
    {
        // Looked up before the transaction so the first statement inside it is a write
        let passport_id = sqlx::query_scalar::<_, String>("SELECT passport_id FROM invites WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invite {} not found", id)))?;
        let passport_id = parse_uuid(&passport_id, "passport_id")?;

        let mut tx = self.pool.begin().await?;
        bump_revision(&mut tx, passport_id).await?;

        let mut invite = fetch_invite(&mut tx, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invite {} not found", id)))?;

        let outcome = change(&mut invite).map_err(AppError::InvalidTransition)?;
        if outcome == Transition::Applied {
            update_invite_state(&mut tx, &invite).await?;
        }
        tx.commit().await?;

        Ok((invite, outcome))
    }

    /// Current assignment revision of a passport (0 before any write)
    pub async fn revision(&self, passport_id: Uuid) -> Result<i64> {
        let revision = sqlx::query_scalar::<_, i64>(
            "SELECT revision FROM assignment_revisions WHERE passport_id = ?",
        )
        .bind(passport_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(revision.unwrap_or(0))
    }
}

async fn bump_revision(conn: &mut SqliteConnection, passport_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO assignment_revisions (passport_id, revision)
        VALUES (?, 1)
        ON CONFLICT(passport_id) DO UPDATE SET revision = revision + 1
        "#,
    )
    .bind(passport_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_invite(conn: &mut SqliteConnection, invite: &Invite) -> Result<()> {
    let submission = invite
        .submission
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode submission: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO invites (id, passport_id, email, name, company, message, role, mode, state,
            token, idempotency_key, submission, expires_at, notified_at, fulfilled_at, removed_at,
            created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(invite.id.to_string())
    .bind(invite.passport_id.to_string())
    .bind(&invite.email)
    .bind(&invite.name)
    .bind(&invite.company)
    .bind(&invite.message)
    .bind(invite.role.as_str())
    .bind(invite.mode.as_str())
    .bind(invite.state.as_str())
    .bind(&invite.token)
    .bind(&invite.idempotency_key)
    .bind(submission)
    .bind(invite.expires_at)
    .bind(invite.notified_at)
    .bind(invite.fulfilled_at)
    .bind(invite.removed_at)
    .bind(invite.created_at)
    .bind(invite.updated_at)
    .execute(&mut *conn)
    .await?;

    for (position, unit) in invite.units.iter().enumerate() {
        let (block_id, field_id, instance_id) = match unit {
            ResponsibilityUnit::Block { block_id } => (Some(block_id.as_str()), None, None),
            ResponsibilityUnit::Field {
                field_id,
                instance_id,
            } => (None, Some(field_id.as_str()), Some(instance_id.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO invite_units (invite_id, position, kind, block_id, field_id, instance_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(invite.id.to_string())
        .bind(position as i64)
        .bind(unit.kind_str())
        .bind(block_id)
        .bind(field_id)
        .bind(instance_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn update_invite_state(conn: &mut SqliteConnection, invite: &Invite) -> Result<()> {
    let submission = invite
        .submission
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode submission: {}", e)))?;

    sqlx::query(
        r#"
        UPDATE invites
        SET state = ?, submission = ?, notified_at = ?, fulfilled_at = ?, removed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(invite.state.as_str())
    .bind(submission)
    .bind(invite.notified_at)
    .bind(invite.fulfilled_at)
    .bind(invite.removed_at)
    .bind(invite.updated_at)
    .bind(invite.id.to_string())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn fetch_invite(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<Invite>> {
    let row = sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {} FROM invites WHERE id = ?",
        INVITE_COLUMNS
    ))
    .bind(id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let units = fetch_units(conn, &row.id).await?;
            Ok(Some(row.into_invite(units)?))
        }
        None => Ok(None),
    }
}

async fn fetch_by_idempotency_key(
    conn: &mut SqliteConnection,
    passport_id: Uuid,
    key: &str,
) -> Result<Option<Invite>> {
    let row = sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {} FROM invites WHERE passport_id = ? AND idempotency_key = ?",
        INVITE_COLUMNS
    ))
    .bind(passport_id.to_string())
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let units = fetch_units(conn, &row.id).await?;
            Ok(Some(row.into_invite(units)?))
        }
        None => Ok(None),
    }
}

async fn fetch_passport_invites(
    conn: &mut SqliteConnection,
    passport_id: Uuid,
    active_only: bool,
) -> Result<Vec<Invite>> {
    let filter = if active_only {
        "AND state IN ('saved', 'notified', 'fulfilled')"
    } else {
        ""
    };
    let rows = sqlx::query_as::<_, InviteRow>(&format!(
        "SELECT {} FROM invites WHERE passport_id = ? {} ORDER BY created_at ASC, id ASC",
        INVITE_COLUMNS, filter
    ))
    .bind(passport_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let unit_rows = sqlx::query_as::<_, UnitRow>(
        r#"
        SELECT u.invite_id, u.position, u.kind, u.block_id, u.field_id, u.instance_id
        FROM invite_units u
        JOIN invites i ON i.id = u.invite_id
        WHERE i.passport_id = ?
        ORDER BY u.invite_id, u.position
        "#,
    )
    .bind(passport_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    let mut units_by_invite: std::collections::HashMap<String, Vec<ResponsibilityUnit>> =
        std::collections::HashMap::new();
    for row in unit_rows {
        let invite_id = row.invite_id.clone();
        units_by_invite
            .entry(invite_id)
            .or_default()
            .push(row.try_into()?);
    }

    rows.into_iter()
        .map(|row| {
            let units = units_by_invite.remove(&row.id).unwrap_or_default();
            row.into_invite(units)
        })
        .collect()
}

async fn fetch_units(conn: &mut SqliteConnection, invite_id: &str) -> Result<Vec<ResponsibilityUnit>> {
    let rows = sqlx::query_as::<_, UnitRow>(
        r#"
        SELECT invite_id, position, kind, block_id, field_id, instance_id
        FROM invite_units
        WHERE invite_id = ?
        ORDER BY position ASC
        "#,
    )
    .bind(invite_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(|r| r.try_into()).collect()
}

fn parse_uuid(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::Internal(format!("Invalid {} UUID: {}", column, e)))
}

// Row types for database queries

#[derive(sqlx::FromRow)]
struct InviteRow {
    id: String,
    passport_id: String,
    email: String,
    name: Option<String>,
    company: Option<String>,
    message: String,
    role: String,
    mode: String,
    state: String,
    token: String,
    idempotency_key: Option<String>,
    submission: Option<String>,
    expires_at: DateTime<Utc>,
    notified_at: Option<DateTime<Utc>>,
    fulfilled_at: Option<DateTime<Utc>>,
    removed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InviteRow {
    fn into_invite(self, units: Vec<ResponsibilityUnit>) -> Result<Invite> {
        let submission = self
            .submission
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| AppError::Internal(format!("Invalid submission JSON: {}", e)))?;

        Ok(Invite {
            id: parse_uuid(&self.id, "id")?,
            passport_id: parse_uuid(&self.passport_id, "passport_id")?,
            email: self.email,
            name: self.name,
            company: self.company,
            message: self.message,
            role: self
                .role
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid role: {}", e)))?,
            mode: self
                .mode
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid mode: {}", e)))?,
            units,
            state: self
                .state
                .parse()
                .map_err(|e| AppError::Internal(format!("Invalid state: {}", e)))?,
            token: self.token,
            idempotency_key: self.idempotency_key,
            submission,
            expires_at: self.expires_at,
            notified_at: self.notified_at,
            fulfilled_at: self.fulfilled_at,
            removed_at: self.removed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    invite_id: String,
    #[allow(dead_code)]
    position: i64,
    kind: String,
    block_id: Option<String>,
    field_id: Option<String>,
    instance_id: Option<String>,
}

impl TryFrom<UnitRow> for ResponsibilityUnit {
    type Error = AppError;

    fn try_from(row: UnitRow) -> Result<Self> {
        match (row.kind.as_str(), row.block_id, row.field_id, row.instance_id) {
            ("block", Some(block_id), _, _) => Ok(ResponsibilityUnit::Block { block_id }),
            ("field", _, Some(field_id), Some(instance_id)) => Ok(ResponsibilityUnit::Field {
                field_id,
                instance_id,
            }),
            (kind, ..) => Err(AppError::Internal(format!(
                "Invalid unit row for invite {}: {}",
                row.invite_id, kind
            ))),
        }
    }
}
