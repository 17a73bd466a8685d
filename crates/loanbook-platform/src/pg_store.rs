use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use loanbook_core::{
    AccountId, AccountLedger, AccountState, ChangeSet, Component, ComponentAmounts,
    LedgerMutation, Obligation, ObligationGroup, PaymentEffect, PaymentStatus, PostedPayment,
    ServicingStore, StoreError,
};
use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// Postgres-backed account store. `commit` holds the account row
/// `FOR UPDATE` for the whole change set, so ledger rows and waiver records
/// move together or not at all.
#[derive(Clone)]
pub struct PgServicingStore {
    pool: PgPool,
}

impl PgServicingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ServicingStore for PgServicingStore {
    async fn load_account(&self, account_id: AccountId) -> Result<AccountState, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        let version: i64 = sqlx::query("SELECT version FROM loan_accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(backend)?
            .ok_or(StoreError::AccountNotFound(account_id))?
            .try_get("version")
            .map_err(backend)?;

        let ledger = load_ledger(&mut *conn, account_id).await?;
        let mut state = AccountState::new(ledger);
        state.version = from_db_version(version)?;
        state.requests = load_bodies(
            &mut *conn,
            "SELECT body FROM waiver_requests WHERE account_id = $1 ORDER BY created_at, id",
            account_id,
        )
        .await?;
        state.approvals = load_bodies(
            &mut *conn,
            "SELECT body FROM waiver_approvals WHERE account_id = $1 ORDER BY decided_at, id",
            account_id,
        )
        .await?;
        state.pending_waivers = load_bodies(
            &mut *conn,
            "SELECT body FROM pending_waivers WHERE account_id = $1 ORDER BY id",
            account_id,
        )
        .await?;
        state.ptp_schedules = load_bodies(
            &mut *conn,
            "SELECT body FROM multiple_payment_ptps WHERE account_id = $1 ORDER BY request_id, sequence",
            account_id,
        )
        .await?;

        Ok(state)
    }

    async fn find_request_account(
        &self,
        request_id: Uuid,
    ) -> Result<Option<AccountId>, StoreError> {
        let row = sqlx::query("SELECT account_id FROM waiver_requests WHERE id = $1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(|row| row.try_get("account_id").map_err(backend))
            .transpose()
    }

    async fn commit(
        &self,
        account_id: AccountId,
        expected_version: u64,
        changes: ChangeSet,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(
            r#"
            SELECT version
            FROM loan_accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Err(StoreError::AccountNotFound(account_id));
        };
        let found = from_db_version(row.try_get("version").map_err(backend)?)?;
        if found != expected_version {
            return Err(StoreError::VersionConflict {
                account_id,
                expected: expected_version,
                found,
            });
        }

        if !changes.ledger.is_empty() {
            // Replay the mutations over the locked ledger first; the same
            // checks as in memory reject a bad change set before any write.
            let mut ledger = load_ledger(&mut *tx, account_id).await?;
            let mut touched: BTreeSet<i64> = BTreeSet::new();
            for mutation in &changes.ledger {
                ledger
                    .apply(mutation)
                    .map_err(|err| StoreError::Backend(anyhow::anyhow!(err)))?;
                write_mutation(&mut *tx, account_id, mutation).await?;
                touched.extend(touched_obligations(&ledger, mutation));
            }
            write_balances(&mut *tx, &ledger, &touched).await?;
        }

        for request in &changes.requests {
            sqlx::query(
                r#"
                INSERT INTO waiver_requests (id, account_id, disposition, valid_until, created_at, body)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE
                SET disposition = EXCLUDED.disposition,
                    valid_until = EXCLUDED.valid_until,
                    body = EXCLUDED.body
                "#,
            )
            .bind(request.id)
            .bind(account_id)
            .bind(request.disposition.as_str())
            .bind(request.valid_until)
            .bind(request.created_at)
            .bind(Json(request))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for approval in &changes.approvals {
            sqlx::query(
                r#"
                INSERT INTO waiver_approvals (id, request_id, account_id, decided_at, body)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(approval.id)
            .bind(approval.request_id)
            .bind(account_id)
            .bind(approval.decided_at)
            .bind(Json(approval))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for pending in &changes.pending_waivers {
            sqlx::query(
                r#"
                INSERT INTO pending_waivers (id, account_id, request_id, status, valid_until, body)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    valid_until = EXCLUDED.valid_until,
                    body = EXCLUDED.body
                "#,
            )
            .bind(pending.id)
            .bind(account_id)
            .bind(pending.request_id)
            .bind(pending.status.as_str())
            .bind(pending.valid_until)
            .bind(Json(pending))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for entry in &changes.ptp_schedules {
            sqlx::query(
                r#"
                INSERT INTO multiple_payment_ptps (id, request_id, account_id, sequence, body)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (id) DO UPDATE
                SET body = EXCLUDED.body
                "#,
            )
            .bind(entry.id)
            .bind(entry.request_id)
            .bind(account_id)
            .bind(i32::try_from(entry.sequence).map_err(backend)?)
            .bind(Json(entry))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        let version: i64 = sqlx::query(
            "UPDATE loan_accounts SET version = version + 1 WHERE id = $1 RETURNING version",
        )
        .bind(account_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?
        .try_get("version")
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;

        let version = from_db_version(version)?;
        debug!(account_id, version, "committed account change set");
        Ok(version)
    }

    async fn accounts_with_open_waivers(&self) -> Result<Vec<AccountId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT account_id FROM waiver_requests WHERE disposition = 'pending'
            UNION
            SELECT account_id FROM pending_waivers WHERE status = 'active'
            ORDER BY account_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| row.try_get("account_id").map_err(backend))
            .collect()
    }
}

async fn load_ledger(
    conn: &mut PgConnection,
    account_id: AccountId,
) -> Result<AccountLedger, StoreError> {
    let group_rows = sqlx::query(
        r#"
        SELECT id, due_date, paid_off
        FROM obligation_groups
        WHERE account_id = $1
        ORDER BY due_date, id
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let mut groups = Vec::with_capacity(group_rows.len());
    for row in group_rows {
        groups.push(ObligationGroup {
            id: row.try_get("id").map_err(backend)?,
            account_id,
            due_date: row.try_get::<NaiveDate, _>("due_date").map_err(backend)?,
            paid_off: row.try_get("paid_off").map_err(backend)?,
            obligations: Vec::new(),
        });
    }

    let obligation_rows = sqlx::query(
        r#"
        SELECT o.id, o.group_id, o.due_date, o.late_fee, o.interest, o.principal
        FROM obligations o
        JOIN obligation_groups g ON g.id = o.group_id
        WHERE g.account_id = $1
        ORDER BY o.due_date, o.id
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    for row in obligation_rows {
        let obligation = Obligation {
            id: row.try_get("id").map_err(backend)?,
            group_id: row.try_get("group_id").map_err(backend)?,
            due_date: row.try_get("due_date").map_err(backend)?,
            remaining: ComponentAmounts::new(
                row.try_get("late_fee").map_err(backend)?,
                row.try_get("interest").map_err(backend)?,
                row.try_get("principal").map_err(backend)?,
            ),
        };
        if let Some(group) = groups.iter_mut().find(|group| group.id == obligation.group_id) {
            group.obligations.push(obligation);
        }
    }

    let payment_rows = sqlx::query(
        r#"
        SELECT id, amount, paid_at, status, unapplied, replayed_from, effects
        FROM account_payments
        WHERE account_id = $1
        ORDER BY paid_at, id
        "#,
    )
    .bind(account_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(backend)?;

    let mut ledger = AccountLedger::new(account_id, groups);
    for row in payment_rows {
        let status: String = row.try_get("status").map_err(backend)?;
        let effects: Json<Vec<PaymentEffect>> = row.try_get("effects").map_err(backend)?;
        ledger.payments.push(PostedPayment {
            id: row.try_get("id").map_err(backend)?,
            account_id,
            amount: row.try_get("amount").map_err(backend)?,
            paid_at: row.try_get::<DateTime<Utc>, _>("paid_at").map_err(backend)?,
            status: parse_payment_status(&status)?,
            effects: effects.0,
            unapplied: row.try_get("unapplied").map_err(backend)?,
            replayed_from: row.try_get("replayed_from").map_err(backend)?,
        });
    }

    Ok(ledger)
}

async fn load_bodies<T>(
    conn: &mut PgConnection,
    sql: &'static str,
    account_id: AccountId,
) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned + Send + Unpin + 'static,
{
    let rows = sqlx::query(sql)
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(backend)?;

    rows.iter()
        .map(|row| {
            row.try_get::<Json<T>, _>("body")
                .map(|body| body.0)
                .map_err(backend)
        })
        .collect()
}

async fn write_mutation(
    conn: &mut PgConnection,
    account_id: AccountId,
    mutation: &LedgerMutation,
) -> Result<(), StoreError> {
    match mutation {
        LedgerMutation::PostPayment(payment) => {
            sqlx::query(
                r#"
                INSERT INTO account_payments
                    (id, account_id, amount, paid_at, status, unapplied, replayed_from, effects)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(payment.id)
            .bind(account_id)
            .bind(payment.amount)
            .bind(payment.paid_at)
            .bind(payment_status_str(payment.status))
            .bind(payment.unapplied)
            .bind(payment.replayed_from)
            .bind(Json(&payment.effects))
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }
        LedgerMutation::VoidPayment { payment_id } => {
            sqlx::query("UPDATE account_payments SET status = $2 WHERE id = $1")
                .bind(payment_id)
                .bind(payment_status_str(PaymentStatus::Voided))
                .execute(&mut *conn)
                .await
                .map_err(backend)?;
        }
        LedgerMutation::Forgive(forgiveness) => {
            sqlx::query(
                r#"
                INSERT INTO waiver_forgiveness
                    (pending_waiver_id, group_id, obligation_id, component, amount)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(forgiveness.pending_waiver_id)
            .bind(forgiveness.group_id)
            .bind(forgiveness.obligation_id)
            .bind(forgiveness.component.as_str())
            .bind(forgiveness.amount)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        }
        LedgerMutation::MarkPaidOff { .. } => {}
    }
    Ok(())
}

fn touched_obligations(ledger: &AccountLedger, mutation: &LedgerMutation) -> Vec<i64> {
    match mutation {
        LedgerMutation::PostPayment(payment) => payment
            .effects
            .iter()
            .map(|effect| effect.obligation_id)
            .collect(),
        LedgerMutation::VoidPayment { payment_id } => ledger
            .payment(*payment_id)
            .map(|payment| payment.effects.iter().map(|e| e.obligation_id).collect())
            .unwrap_or_default(),
        LedgerMutation::Forgive(forgiveness) => vec![forgiveness.obligation_id],
        LedgerMutation::MarkPaidOff { .. } => Vec::new(),
    }
}

async fn write_balances(
    conn: &mut PgConnection,
    ledger: &AccountLedger,
    touched: &BTreeSet<i64>,
) -> Result<(), StoreError> {
    for obligation_id in touched {
        let Some(obligation) = ledger.obligation(*obligation_id) else {
            continue;
        };
        sqlx::query(
            r#"
            UPDATE obligations
            SET late_fee = $2, interest = $3, principal = $4
            WHERE id = $1
            "#,
        )
        .bind(obligation.id)
        .bind(obligation.remaining.get(Component::LateFee))
        .bind(obligation.remaining.get(Component::Interest))
        .bind(obligation.remaining.get(Component::Principal))
        .execute(&mut *conn)
        .await
        .map_err(backend)?;
    }

    for group in &ledger.groups {
        sqlx::query("UPDATE obligation_groups SET paid_off = $2 WHERE id = $1 AND paid_off <> $2")
            .bind(group.id)
            .bind(group.paid_off)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
    }
    Ok(())
}

fn payment_status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Posted => "posted",
        PaymentStatus::Voided => "voided",
    }
}

fn parse_payment_status(value: &str) -> Result<PaymentStatus, StoreError> {
    match value {
        "posted" => Ok(PaymentStatus::Posted),
        "voided" => Ok(PaymentStatus::Voided),
        other => Err(StoreError::Backend(anyhow::anyhow!(
            "unknown payment status {other}"
        ))),
    }
}

fn from_db_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(backend)
}

fn backend(err: impl Into<anyhow::Error>) -> StoreError {
    StoreError::Backend(err.into())
}

