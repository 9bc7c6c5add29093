//! Postgres store backend.
//!
//! Row structs mirror the migration schema; domain conversions happen
//! at the edge of each query so the engines never see raw rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::attribution::model::{Conversion, Touchpoint};
use crate::config::DatabaseConfig;
use crate::error::{ErrorContext, Result};
use crate::experiments::model::{
    Experiment, ExperimentAssignment, ExperimentEvent, ExperimentStatus, Variant, VariantStats,
};
use crate::store::{AssignmentInsert, ExperimentStore, SpendLedger, TouchpointStore};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a pool sized from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .context("Failed to connect to Postgres")?;

        info!(
            max_connections = config.max_connections,
            "Database pool established"
        );

        Ok(Self { pool })
    }

    /// Apply pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row types
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(FromRow)]
struct ExperimentRow {
    id: Uuid,
    org_id: Uuid,
    name: String,
    primary_metric: String,
    confidence_level: f64,
    required_sample_size: Option<i64>,
    auto_winner_enabled: bool,
    status: String,
    variants: serde_json::Value,
    winner_variant_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ExperimentRow {
    fn into_domain(self) -> Result<Experiment> {
        let variants: BTreeMap<String, Variant> = serde_json::from_value(self.variants)?;
        Ok(Experiment {
            id: self.id,
            org_id: self.org_id,
            name: self.name,
            primary_metric: self.primary_metric,
            confidence_level: self.confidence_level,
            required_sample_size: self.required_sample_size.map(|n| n as u64),
            auto_winner_enabled: self.auto_winner_enabled,
            status: ExperimentStatus::parse(&self.status)?,
            variants,
            winner_variant_id: self.winner_variant_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    experiment_id: Uuid,
    actor_id: String,
    variant_id: String,
    assigned_at: DateTime<Utc>,
}

impl From<AssignmentRow> for ExperimentAssignment {
    fn from(row: AssignmentRow) -> Self {
        Self {
            experiment_id: row.experiment_id,
            actor_id: row.actor_id,
            variant_id: row.variant_id,
            assigned_at: row.assigned_at,
        }
    }
}

#[derive(FromRow)]
struct VariantStatsRow {
    variant_id: String,
    impressions: i64,
    conversions: i64,
    revenue: f64,
}

#[derive(FromRow)]
struct TouchpointRow {
    channel: String,
    campaign_id: Option<String>,
    source: Option<String>,
    medium: Option<String>,
    interaction: String,
    occurred_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ConversionRow {
    actor_id: String,
    value: f64,
    occurred_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SpendRow {
    channel: String,
    amount: f64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ExperimentStore
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ExperimentStore for PostgresStore {
    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        let variants = serde_json::to_value(&experiment.variants)?;
        sqlx::query(
            r#"
            INSERT INTO experiments
                (id, org_id, name, primary_metric, confidence_level,
                 required_sample_size, auto_winner_enabled, status, variants,
                 winner_variant_id, started_at, ended_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(experiment.id)
        .bind(experiment.org_id)
        .bind(&experiment.name)
        .bind(&experiment.primary_metric)
        .bind(experiment.confidence_level)
        .bind(experiment.required_sample_size.map(|n| n as i64))
        .bind(experiment.auto_winner_enabled)
        .bind(experiment.status.as_str())
        .bind(variants)
        .bind(&experiment.winner_variant_id)
        .bind(experiment.started_at)
        .bind(experiment.ended_at)
        .bind(experiment.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert experiment")?;
        Ok(())
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        let row: Option<ExperimentRow> =
            sqlx::query_as("SELECT * FROM experiments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch experiment")?;
        row.map(ExperimentRow::into_domain).transpose()
    }

    async fn update_experiment_status(
        &self,
        id: Uuid,
        status: ExperimentStatus,
        winner_variant_id: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE experiments
            SET status = $2,
                winner_variant_id = COALESCE($3, winner_variant_id),
                started_at = $4,
                ended_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(winner_variant_id)
        .bind(started_at)
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .context("Failed to update experiment status")?;
        Ok(())
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: &ExperimentAssignment,
    ) -> Result<AssignmentInsert> {
        let result = sqlx::query(
            r#"
            INSERT INTO experiment_assignments
                (experiment_id, actor_id, variant_id, assigned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (experiment_id, actor_id) DO NOTHING
            "#,
        )
        .bind(assignment.experiment_id)
        .bind(&assignment.actor_id)
        .bind(&assignment.variant_id)
        .bind(assignment.assigned_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert assignment")?;

        if result.rows_affected() == 1 {
            return Ok(AssignmentInsert::Inserted);
        }

        // Lost the race; read back the row that won.
        let row: AssignmentRow = sqlx::query_as(
            r#"
            SELECT experiment_id, actor_id, variant_id, assigned_at
            FROM experiment_assignments
            WHERE experiment_id = $1 AND actor_id = $2
            "#,
        )
        .bind(assignment.experiment_id)
        .bind(&assignment.actor_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to read back existing assignment")?;

        Ok(AssignmentInsert::Existing(row.into()))
    }

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<ExperimentAssignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            r#"
            SELECT experiment_id, actor_id, variant_id, assigned_at
            FROM experiment_assignments
            WHERE experiment_id = $1 AND actor_id = $2
            "#,
        )
        .bind(experiment_id)
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch assignment")?;
        Ok(row.map(Into::into))
    }

    async fn append_event(&self, event: &ExperimentEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO experiment_events
                (experiment_id, actor_id, variant_id, event_type, value, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.experiment_id)
        .bind(&event.actor_id)
        .bind(&event.variant_id)
        .bind(event.event_type.as_str())
        .bind(event.value)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .context("Failed to append experiment event")?;
        Ok(())
    }

    async fn variant_stats(&self, experiment_id: Uuid) -> Result<Vec<VariantStats>> {
        let rows: Vec<VariantStatsRow> = sqlx::query_as(
            r#"
            SELECT
                variant_id,
                COUNT(*) FILTER (WHERE event_type = 'impression') AS impressions,
                COUNT(*) FILTER (WHERE event_type = 'conversion') AS conversions,
                COALESCE(SUM(value) FILTER (WHERE event_type = 'conversion'), 0.0) AS revenue
            FROM experiment_events
            WHERE experiment_id = $1
            GROUP BY variant_id
            ORDER BY variant_id
            "#,
        )
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to aggregate variant stats")?;

        Ok(rows
            .into_iter()
            .map(|row| VariantStats {
                variant_id: row.variant_id,
                impressions: row.impressions.max(0) as u64,
                conversions: row.conversions.max(0) as u64,
                revenue: row.revenue,
            })
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TouchpointStore & SpendLedger
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TouchpointStore for PostgresStore {
    async fn touchpoints_in_window(
        &self,
        actor_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>> {
        let rows: Vec<TouchpointRow> = sqlx::query_as(
            r#"
            SELECT channel, campaign_id, source, medium, interaction, occurred_at
            FROM touchpoints
            WHERE actor_id = $1 AND occurred_at >= $2 AND occurred_at < $3
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(actor_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch touchpoints")?;

        Ok(rows
            .into_iter()
            .map(|row| Touchpoint {
                occurred_at: row.occurred_at,
                channel: row.channel,
                campaign_id: row.campaign_id,
                source: row.source,
                medium: row.medium,
                interaction: row.interaction,
            })
            .collect())
    }

    async fn conversions_in_window(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Conversion>> {
        let rows: Vec<ConversionRow> = sqlx::query_as(
            r#"
            SELECT actor_id, value, occurred_at
            FROM conversions
            WHERE org_id = $1 AND occurred_at >= $2 AND occurred_at < $3
            ORDER BY occurred_at ASC
            "#,
        )
        .bind(org_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversions")?;

        Ok(rows
            .into_iter()
            .map(|row| Conversion {
                actor_id: row.actor_id,
                value: row.value,
                occurred_at: row.occurred_at,
            })
            .collect())
    }
}

#[async_trait]
impl SpendLedger for PostgresStore {
    async fn spend_by_channel(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, f64>> {
        // Overlap semantics: any spend period intersecting the report
        // window counts in full.
        let rows: Vec<SpendRow> = sqlx::query_as(
            r#"
            SELECT channel, SUM(amount) AS amount
            FROM channel_spend
            WHERE org_id = $1 AND period_start < $3 AND period_end > $2
            GROUP BY channel
            "#,
        )
        .bind(org_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch channel spend")?;

        Ok(rows.into_iter().map(|r| (r.channel, r.amount)).collect())
    }
}
