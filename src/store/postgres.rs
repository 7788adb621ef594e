//! Postgres-backed implementation of [`SettlementStore`], following the
//! teacher's idiom of dynamic `sqlx::query` + manual `Row::get` rather than
//! the `query!`/`query_as!` compile-time-checked macros, since no live
//! database is available here to build the `.sqlx` offline cache against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{ApiError, Result};
use crate::models::{
    ActionType, BusinessStatus, CalculationRule, DeadLetterEvent, Direction, GroupKey,
    NotificationFailure, NotificationQueueEntry, RunningTotal, Settlement, SettlementType,
    WorkflowState,
};

use super::{IngestOutcome, NewSettlement, SearchCriteria, SettlementStore};

#[derive(Clone)]
pub struct PgSettlementStore {
    pool: PgPool,
}

impl PgSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_settlement(row: &sqlx::postgres::PgRow) -> Result<Settlement> {
    let business_status: String = row.get("business_status");
    let direction: String = row.get("direction");
    let settlement_type: String = row.get("settlement_type");

    Ok(Settlement {
        ref_id: row.get("ref_id"),
        settlement_id: row.get("settlement_id"),
        settlement_version: row.get("settlement_version"),
        pts: row.get("pts"),
        processing_entity: row.get("processing_entity"),
        counterparty_id: row.get("counterparty_id"),
        value_date: row.get("value_date"),
        currency: row.get("currency"),
        amount: row.get("amount"),
        business_status: BusinessStatus::from_str(&business_status)
            .map_err(ApiError::Internal)?,
        direction: Direction::from_str(&direction).map_err(ApiError::Internal)?,
        settlement_type: SettlementType::from_str(&settlement_type).map_err(ApiError::Internal)?,
        is_old: row.get("is_old"),
        created_at: row.get("created_at"),
    })
}

const SETTLEMENT_COLUMNS: &str = "ref_id, settlement_id, settlement_version, pts, \
    processing_entity, counterparty_id, value_date, currency, amount, business_status, \
    direction, settlement_type, is_old, created_at";

#[async_trait]
impl SettlementStore for PgSettlementStore {
    async fn ingest_settlement(&self, settlement: &NewSettlement) -> Result<IngestOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT ref_id FROM settlement \
             WHERE settlement_id = $1 AND pts = $2 AND processing_entity = $3 \
               AND settlement_version = $4",
        )
        .bind(&settlement.settlement_id)
        .bind(&settlement.pts)
        .bind(&settlement.processing_entity)
        .bind(settlement.settlement_version)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let ref_id: i64 = row.get("ref_id");
            tx.commit().await?;
            return Ok(IngestOutcome {
                ref_id,
                inserted: false,
                previous_counterparty: None,
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO settlement \
                (settlement_id, settlement_version, pts, processing_entity, counterparty_id, \
                 value_date, currency, amount, business_status, direction, settlement_type, \
                 is_old, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, now()) \
             RETURNING ref_id",
        )
        .bind(&settlement.settlement_id)
        .bind(settlement.settlement_version)
        .bind(&settlement.pts)
        .bind(&settlement.processing_entity)
        .bind(&settlement.counterparty_id)
        .bind(settlement.value_date)
        .bind(&settlement.currency)
        .bind(settlement.amount)
        .bind(settlement.business_status.as_str())
        .bind(settlement.direction.as_str())
        .bind(settlement.settlement_type.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let ref_id: i64 = inserted.get("ref_id");

        let previous = sqlx::query(
            "SELECT counterparty_id FROM settlement \
             WHERE settlement_id = $1 AND pts = $2 AND processing_entity = $3 \
               AND ref_id < $4 \
             ORDER BY ref_id DESC LIMIT 1",
        )
        .bind(&settlement.settlement_id)
        .bind(&settlement.pts)
        .bind(&settlement.processing_entity)
        .bind(ref_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous_counterparty = previous.map(|r| r.get::<String, _>("counterparty_id"));

        sqlx::query(
            "UPDATE settlement SET is_old = true \
             WHERE settlement_id = $1 AND pts = $2 AND processing_entity = $3 AND ref_id < $4",
        )
        .bind(&settlement.settlement_id)
        .bind(&settlement.pts)
        .bind(&settlement.processing_entity)
        .bind(ref_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IngestOutcome {
            ref_id,
            inserted: true,
            previous_counterparty,
        })
    }

    async fn find_latest_version(
        &self,
        settlement_id: &str,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement \
             WHERE settlement_id = $1 AND pts = $2 AND processing_entity = $3 \
             ORDER BY ref_id DESC LIMIT 1"
        ))
        .bind(settlement_id)
        .bind(pts)
        .bind(processing_entity)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_settlement).transpose()
    }

    async fn find_by_group_filtered(
        &self,
        group: &GroupKey,
        max_ref_id: i64,
    ) -> Result<Vec<Settlement>> {
        let rows = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement \
             WHERE pts = $1 AND processing_entity = $2 AND counterparty_id = $3 \
               AND value_date = $4 AND ref_id <= $5 AND is_old = false \
               AND business_status != 'CANCELLED'"
        ))
        .bind(&group.pts)
        .bind(&group.processing_entity)
        .bind(&group.counterparty_id)
        .bind(group.value_date)
        .bind(max_ref_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_settlement).collect()
    }

    async fn search(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Settlement>> {
        let mut clauses: Vec<String> = vec!["is_old = false".to_string()];
        let mut binds: Vec<String> = Vec::new();

        macro_rules! push_eq {
            ($field:expr, $col:literal) => {
                if let Some(v) = $field {
                    binds.push(v.clone());
                    clauses.push(format!("{} = ${}", $col, binds.len()));
                }
            };
        }
        push_eq!(&criteria.pts, "pts");
        push_eq!(&criteria.processing_entity, "processing_entity");
        push_eq!(&criteria.counterparty_id, "counterparty_id");
        push_eq!(&criteria.direction, "direction");
        push_eq!(&criteria.business_status, "business_status");

        let where_clause = clauses.join(" AND ");
        let mut query = format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement WHERE {where_clause}"
        );
        let mut bind_idx = binds.len();
        if criteria.value_date_from.is_some() {
            bind_idx += 1;
            query.push_str(&format!(" AND value_date >= ${bind_idx}"));
        }
        if criteria.value_date_to.is_some() {
            bind_idx += 1;
            query.push_str(&format!(" AND value_date <= ${bind_idx}"));
        }
        bind_idx += 1;
        query.push_str(&format!(" ORDER BY ref_id DESC LIMIT ${bind_idx}"));
        bind_idx += 1;
        query.push_str(&format!(" OFFSET ${bind_idx}"));

        let mut q = sqlx::query(&query);
        for b in &binds {
            q = q.bind(b);
        }
        if let Some(d) = criteria.value_date_from {
            q = q.bind(d);
        }
        if let Some(d) = criteria.value_date_to {
            q = q.bind(d);
        }
        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_settlement).collect()
    }

    async fn find_by_id(&self, settlement_id: &str) -> Result<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement \
             WHERE settlement_id = $1 ORDER BY ref_id DESC LIMIT 1"
        ))
        .bind(settlement_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_settlement).transpose()
    }

    async fn find_by_settlement_version(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlement \
             WHERE settlement_id = $1 AND settlement_version = $2 \
             ORDER BY ref_id DESC LIMIT 1"
        ))
        .bind(settlement_id)
        .bind(settlement_version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_settlement).transpose()
    }

    async fn get_distinct_groups(&self, criteria: &SearchCriteria) -> Result<Vec<GroupKey>> {
        let mut clauses: Vec<String> = vec!["is_old = false".to_string()];
        let mut binds: Vec<String> = Vec::new();
        macro_rules! push_eq {
            ($field:expr, $col:literal) => {
                if let Some(v) = $field {
                    binds.push(v.clone());
                    clauses.push(format!("{} = ${}", $col, binds.len()));
                }
            };
        }
        push_eq!(&criteria.pts, "pts");
        push_eq!(&criteria.processing_entity, "processing_entity");

        let where_clause = clauses.join(" AND ");
        let query = format!(
            "SELECT DISTINCT pts, processing_entity, counterparty_id, value_date \
             FROM settlement WHERE {where_clause}"
        );
        let mut q = sqlx::query(&query);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| GroupKey {
                pts: row.get("pts"),
                processing_entity: row.get("processing_entity"),
                counterparty_id: row.get("counterparty_id"),
                value_date: row.get("value_date"),
            })
            .collect())
    }

    async fn get_running_total(&self, group: &GroupKey) -> Result<Option<RunningTotal>> {
        let row = sqlx::query(
            "SELECT id, pts, processing_entity, counterparty_id, value_date, total, ref_id, \
                    updated_at \
             FROM running_total \
             WHERE pts = $1 AND processing_entity = $2 AND counterparty_id = $3 \
               AND value_date = $4",
        )
        .bind(&group.pts)
        .bind(&group.processing_entity)
        .bind(&group.counterparty_id)
        .bind(group.value_date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RunningTotal {
            id: r.get("id"),
            pts: r.get("pts"),
            processing_entity: r.get("processing_entity"),
            counterparty_id: r.get("counterparty_id"),
            value_date: r.get("value_date"),
            total: r.get("total"),
            ref_id: r.get("ref_id"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn upsert_running_total(
        &self,
        group: &GroupKey,
        total: Decimal,
        watermark_ref_id: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO running_total \
                (pts, processing_entity, counterparty_id, value_date, total, ref_id, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now()) \
             ON CONFLICT (pts, processing_entity, counterparty_id, value_date) \
             DO UPDATE SET total = EXCLUDED.total, ref_id = EXCLUDED.ref_id, \
                           updated_at = EXCLUDED.updated_at",
        )
        .bind(&group.pts)
        .bind(&group.processing_entity)
        .bind(&group.counterparty_id)
        .bind(group.value_date)
        .bind(total)
        .bind(watermark_ref_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_calculation_rule(
        &self,
        pts: &str,
        processing_entity: &str,
    ) -> Result<Option<CalculationRule>> {
        let row = sqlx::query(
            "SELECT included_business_statuses, included_directions, included_settlement_types \
             FROM calculation_rule WHERE pts = $1 AND processing_entity = $2",
        )
        .bind(pts)
        .bind(processing_entity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let statuses: Vec<String> = row.get("included_business_statuses");
        let directions: Vec<String> = row.get("included_directions");
        let types: Vec<String> = row.get("included_settlement_types");

        Ok(Some(CalculationRule {
            pts: pts.to_string(),
            processing_entity: processing_entity.to_string(),
            included_business_statuses: statuses
                .iter()
                .filter_map(|s| BusinessStatus::from_str(s).ok())
                .collect::<HashSet<_>>(),
            included_directions: directions
                .iter()
                .filter_map(|s| Direction::from_str(s).ok())
                .collect::<HashSet<_>>(),
            included_settlement_types: types
                .iter()
                .filter_map(|s| SettlementType::from_str(s).ok())
                .collect::<HashSet<_>>(),
        }))
    }

    async fn get_exposure_limit(&self, counterparty_id: &str) -> Result<Option<Decimal>> {
        let row = sqlx::query("SELECT limit_usd FROM exposure_limit WHERE counterparty_id = $1")
            .bind(counterparty_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("limit_usd")))
    }

    async fn get_workflow_state(
        &self,
        settlement_id: &str,
        settlement_version: i64,
    ) -> Result<Option<WorkflowState>> {
        let row = sqlx::query(
            "SELECT state FROM workflow_state \
             WHERE settlement_id = $1 AND settlement_version = $2",
        )
        .bind(settlement_id)
        .bind(settlement_version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let state: String = r.get("state");
            WorkflowState::from_str(&state).map_err(ApiError::Internal)
        })
        .transpose()
    }

    async fn transition_workflow(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        pts: &str,
        processing_entity: &str,
        new_state: WorkflowState,
        action_type: ActionType,
        user_id: &str,
        user_name: &str,
        comment: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_state (settlement_id, settlement_version, state, updated_at) \
             VALUES ($1, $2, $3, now()) \
             ON CONFLICT (settlement_id, settlement_version) \
             DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at",
        )
        .bind(settlement_id)
        .bind(settlement_version)
        .bind(new_state.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO activity \
                (pts, processing_entity, settlement_id, settlement_version, user_id, user_name, \
                 action_type, comment, create_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())",
        )
        .bind(pts)
        .bind(processing_entity)
        .bind(settlement_id)
        .bind(settlement_version)
        .bind(user_id)
        .bind(user_name)
        .bind(action_type.as_str())
        .bind(comment)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_activity_user(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        action_type: ActionType,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT user_id FROM activity \
             WHERE settlement_id = $1 AND settlement_version = $2 AND action_type = $3 \
             ORDER BY create_time DESC LIMIT 1",
        )
        .bind(settlement_id)
        .bind(settlement_version)
        .bind(action_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("user_id")))
    }

    async fn enqueue_notification(
        &self,
        settlement_id: &str,
        settlement_version: i64,
        status: &str,
        details: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO notification_queue \
                (settlement_id, settlement_version, status, details, retry_count, \
                 next_attempt_at, created_at) \
             VALUES ($1, $2, $3, $4, 0, now(), now()) RETURNING id",
        )
        .bind(settlement_id)
        .bind(settlement_version)
        .bind(status)
        .bind(details)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn due_notifications(&self, now: DateTime<Utc>) -> Result<Vec<NotificationQueueEntry>> {
        let rows = sqlx::query(
            "SELECT id, settlement_id, settlement_version, status, details, retry_count, \
                    next_attempt_at, created_at, last_error \
             FROM notification_queue WHERE next_attempt_at <= $1 ORDER BY next_attempt_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| NotificationQueueEntry {
                id: r.get("id"),
                settlement_id: r.get("settlement_id"),
                settlement_version: r.get("settlement_version"),
                status: r.get("status"),
                details: r.get("details"),
                retry_count: r.get("retry_count"),
                next_attempt_at: r.get("next_attempt_at"),
                created_at: r.get("created_at"),
                last_error: r.get("last_error"),
            })
            .collect())
    }

    async fn delete_notification(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM notification_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule_notification(
        &self,
        id: i64,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE notification_queue \
             SET retry_count = $1, next_attempt_at = $2, last_error = $3 WHERE id = $4",
        )
        .bind(retry_count)
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn move_notification_to_failure(&self, entry: &NotificationQueueEntry) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO notification_failure \
                (settlement_id, settlement_version, status, details, attempts, failed_at) \
             VALUES ($1, $2, $3, $4, $5, now())",
        )
        .bind(&entry.settlement_id)
        .bind(entry.settlement_version)
        .bind(&entry.status)
        .bind(&entry.details)
        .bind(entry.retry_count)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM notification_queue WHERE id = $1")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_notification_failures(&self) -> Result<Vec<NotificationFailure>> {
        let rows = sqlx::query(
            "SELECT id, settlement_id, settlement_version, status, details, attempts, failed_at \
             FROM notification_failure ORDER BY failed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| NotificationFailure {
                id: r.get("id"),
                settlement_id: r.get("settlement_id"),
                settlement_version: r.get("settlement_version"),
                status: r.get("status"),
                details: r.get("details"),
                attempts: r.get("attempts"),
                failed_at: r.get("failed_at"),
            })
            .collect())
    }

    async fn write_dead_letter(
        &self,
        group: &GroupKey,
        ref_id: i64,
        attempts: i32,
        last_error: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO dead_letter_event \
                (pts, processing_entity, counterparty_id, value_date, ref_id, attempts, \
                 last_error, failed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, now())",
        )
        .bind(&group.pts)
        .bind(&group.processing_entity)
        .bind(&group.counterparty_id)
        .bind(group.value_date)
        .bind(ref_id)
        .bind(attempts)
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(&self) -> Result<Vec<DeadLetterEvent>> {
        let rows = sqlx::query(
            "SELECT id, pts, processing_entity, counterparty_id, value_date, ref_id, attempts, \
                    last_error, failed_at \
             FROM dead_letter_event ORDER BY failed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DeadLetterEvent {
                id: r.get("id"),
                pts: r.get("pts"),
                processing_entity: r.get("processing_entity"),
                counterparty_id: r.get("counterparty_id"),
                value_date: r.get("value_date"),
                ref_id: r.get("ref_id"),
                attempts: r.get("attempts"),
                last_error: r.get("last_error"),
                failed_at: r.get("failed_at"),
            })
            .collect())
    }
}
