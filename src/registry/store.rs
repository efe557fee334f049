//! `SQLite` implementation of [`RegistryStore`] (§3, §6 "Relational
//! tables", §5 "multi-statement work uses transactions").

use super::{RegistryError, RegistryStore};
use crate::domain::{
    Agent, AgentId, Probe, ProbeId, ProbeKind, Target, TargetId, TargetRef, Workspace, WorkspaceId,
};
use crate::relational::RelationalConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use tracing::instrument;

/// `SQLite`-backed registry store.
pub struct SqliteRegistryStore {
    connection: RelationalConnection,
}

impl SqliteRegistryStore {
    /// Wraps an initialized relational connection.
    #[must_use]
    pub fn new(connection: RelationalConnection) -> Self {
        Self { connection }
    }

    async fn load_targets(
        &self,
        probe_id: ProbeId,
    ) -> Result<Vec<Target>, RegistryError> {
        let rows = sqlx::query("SELECT id, literal_target, agent_target_id FROM probe_targets WHERE probe_id = ?1")
            .bind(probe_id.to_string())
            .fetch_all(self.connection.pool())
            .await?;
        rows.into_iter().map(|row| row_to_target(probe_id, &row)).collect()
    }

    async fn load_probe_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Probe, RegistryError> {
        let id: String = row.try_get("id")?;
        let probe_id: ProbeId = id
            .parse::<uuid::Uuid>()
            .map_err(|e| RegistryError::InvalidInput(e.to_string()))?
            .into();
        let metadata_json: String = row.try_get("metadata_json")?;
        let metadata: HashMap<String, String> = serde_json::from_str(&metadata_json)?;
        Ok(Probe {
            id: probe_id,
            workspace_id: parse_uuid_col::<WorkspaceId>(row, "workspace_id")?,
            agent_id: parse_uuid_col::<AgentId>(row, "agent_id")?,
            kind: parse_kind(row.try_get::<String, _>("kind")?.as_str())?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            interval_secs: u32::try_from(row.try_get::<i64, _>("interval_secs")?)
                .map_err(|e| RegistryError::InvalidInput(e.to_string()))?,
            timeout_secs: u32::try_from(row.try_get::<i64, _>("timeout_secs")?)
                .map_err(|e| RegistryError::InvalidInput(e.to_string()))?,
            count: row
                .try_get::<Option<i64>, _>("count")?
                .map(|v| u32::try_from(v).unwrap_or(0)),
            duration_secs: row
                .try_get::<Option<i64>, _>("duration_secs")?
                .map(|v| u32::try_from(v).unwrap_or(0)),
            server_mode: row.try_get::<i64, _>("server_mode")? != 0,
            label: row.try_get("label")?,
            metadata,
            targets: self.load_targets(probe_id).await?,
            server_port: row
                .try_get::<Option<i64>, _>("server_port")?
                .map(|v| u16::try_from(v).unwrap_or(0)),
        })
    }

    async fn insert_probe_tx(
        tx: &mut Transaction<'_, Sqlite>,
        probe: &Probe,
    ) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO probes (id, workspace_id, agent_id, kind, enabled, interval_secs, \
             timeout_secs, count, duration_secs, server_mode, server_port, label, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(probe.id.to_string())
        .bind(probe.workspace_id.to_string())
        .bind(probe.agent_id.to_string())
        .bind(kind_to_str(probe.kind))
        .bind(probe.enabled)
        .bind(i64::from(probe.interval_secs))
        .bind(i64::from(probe.timeout_secs))
        .bind(probe.count.map(i64::from))
        .bind(probe.duration_secs.map(i64::from))
        .bind(probe.server_mode)
        .bind(probe.server_port.map(i64::from))
        .bind(&probe.label)
        .bind(serde_json::to_string(&probe.metadata)?)
        .execute(&mut **tx)
        .await?;

        for target in &probe.targets {
            let (literal, agent_ref) = match &target.target {
                TargetRef::Literal(l) => (Some(l.clone()), None),
                TargetRef::Agent(a) => (None, Some(a.to_string())),
            };
            sqlx::query(
                "INSERT INTO probe_targets (id, probe_id, literal_target, agent_target_id) \
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(target.id.to_string())
            .bind(probe.id.to_string())
            .bind(literal)
            .bind(agent_ref)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn parse_uuid_col<T: From<uuid::Uuid>>(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<T, RegistryError> {
    let raw: String = row.try_get(col)?;
    let uuid = raw
        .parse::<uuid::Uuid>()
        .map_err(|e| RegistryError::InvalidInput(e.to_string()))?;
    Ok(T::from(uuid))
}

fn row_to_target(probe_id: ProbeId, row: &sqlx::sqlite::SqliteRow) -> Result<Target, RegistryError> {
    let id: String = row.try_get("id")?;
    let target_id: TargetId = id
        .parse::<uuid::Uuid>()
        .map_err(|e| RegistryError::InvalidInput(e.to_string()))?
        .into();
    let literal: Option<String> = row.try_get("literal_target")?;
    let agent_ref: Option<String> = row.try_get("agent_target_id")?;
    let target_ref = match (literal, agent_ref) {
        (Some(l), None) => TargetRef::Literal(l),
        (None, Some(a)) => TargetRef::Agent(
            a.parse::<uuid::Uuid>()
                .map_err(|e| RegistryError::InvalidInput(e.to_string()))?
                .into(),
        ),
        _ => {
            return Err(RegistryError::InvalidInput(
                "target row has neither or both of literal_target/agent_target_id".to_string(),
            ))
        }
    };
    Ok(Target {
        id: target_id,
        probe_id,
        target: target_ref,
    })
}

fn kind_to_str(kind: ProbeKind) -> &'static str {
    match kind {
        ProbeKind::Ping => "PING",
        ProbeKind::Mtr => "MTR",
        ProbeKind::Rperf => "RPERF",
        ProbeKind::Speedtest => "SPEEDTEST",
        ProbeKind::NetInfo => "NETINFO",
        ProbeKind::SysInfo => "SYSINFO",
        ProbeKind::TrafficSim => "TRAFFICSIM",
        ProbeKind::Agent => "AGENT",
    }
}

fn parse_kind(raw: &str) -> Result<ProbeKind, RegistryError> {
    Ok(match raw {
        "PING" => ProbeKind::Ping,
        "MTR" => ProbeKind::Mtr,
        "RPERF" => ProbeKind::Rperf,
        "SPEEDTEST" => ProbeKind::Speedtest,
        "NETINFO" => ProbeKind::NetInfo,
        "SYSINFO" => ProbeKind::SysInfo,
        "TRAFFICSIM" => ProbeKind::TrafficSim,
        "AGENT" => ProbeKind::Agent,
        other => return Err(RegistryError::InvalidInput(format!("unknown probe kind {other}"))),
    })
}

#[async_trait]
impl RegistryStore for SqliteRegistryStore {
    #[instrument(skip(self), err)]
    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>, RegistryError> {
        let row = sqlx::query("SELECT id, name FROM workspaces WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.map(|r| {
            Ok(Workspace {
                id,
                name: r.try_get("name")?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_agent(&self, id: AgentId) -> Result<Option<Agent>, RegistryError> {
        let row = sqlx::query(
            "SELECT workspace_id, name, last_seen, public_address_override, location \
             FROM agents WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.connection.pool())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let last_seen: String = row.try_get("last_seen")?;
        Ok(Some(Agent {
            id,
            workspace_id: parse_uuid_col(&row, "workspace_id")?,
            name: row.try_get("name")?,
            last_seen: last_seen
                .parse::<DateTime<Utc>>()
                .map_err(|e| RegistryError::InvalidInput(e.to_string()))?,
            public_address_override: row.try_get("public_address_override")?,
            location: row.try_get("location")?,
        }))
    }

    #[instrument(skip(self), err)]
    async fn list_workspaces(&self) -> Result<Vec<Workspace>, RegistryError> {
        let rows = sqlx::query("SELECT id, name FROM workspaces")
            .fetch_all(self.connection.pool())
            .await?;
        rows.into_iter()
            .map(|r| {
                Ok(Workspace {
                    id: parse_uuid_col(&r, "id")?,
                    name: r.try_get("name")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn list_agents_for_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<Agent>, RegistryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, name, last_seen, public_address_override, location \
             FROM agents WHERE workspace_id = ?1",
        )
        .bind(workspace_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        rows.into_iter()
            .map(|r| {
                let id: AgentId = parse_uuid_col(&r, "id")?;
                let last_seen: String = r.try_get("last_seen")?;
                Ok(Agent {
                    id,
                    workspace_id,
                    name: r.try_get("name")?,
                    last_seen: last_seen
                        .parse::<DateTime<Utc>>()
                        .map_err(|e| RegistryError::InvalidInput(e.to_string()))?,
                    public_address_override: r.try_get("public_address_override")?,
                    location: r.try_get("location")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn get_probe(&self, id: ProbeId) -> Result<Option<Probe>, RegistryError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, agent_id, kind, enabled, interval_secs, timeout_secs, \
             count, duration_secs, server_mode, server_port, label, metadata_json \
             FROM probes WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(self.connection.pool())
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(self.load_probe_row(&row).await?))
    }

    #[instrument(skip(self), err)]
    async fn list_probes_for_agent(&self, agent_id: AgentId) -> Result<Vec<Probe>, RegistryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, agent_id, kind, enabled, interval_secs, timeout_secs, \
             count, duration_secs, server_mode, server_port, label, metadata_json \
             FROM probes WHERE agent_id = ?1",
        )
        .bind(agent_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.load_probe_row(row).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self), err)]
    async fn list_probes_for_agent_kind(
        &self,
        agent_id: AgentId,
        kind: ProbeKind,
    ) -> Result<Vec<Probe>, RegistryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, agent_id, kind, enabled, interval_secs, timeout_secs, \
             count, duration_secs, server_mode, server_port, label, metadata_json \
             FROM probes WHERE agent_id = ?1 AND kind = ?2",
        )
        .bind(agent_id.to_string())
        .bind(kind_to_str(kind))
        .fetch_all(self.connection.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.load_probe_row(row).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self, probe, mirrors), err)]
    async fn insert_probe_atomic(
        &self,
        probe: &Probe,
        mirrors: &[Probe],
    ) -> Result<(), RegistryError> {
        let mut tx = self.connection.pool().begin().await?;
        Self::insert_probe_tx(&mut tx, probe).await?;
        for mirror in mirrors {
            Self::insert_probe_tx(&mut tx, mirror).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_probe(&self, id: ProbeId) -> Result<(), RegistryError> {
        // probe_targets.probe_id has ON DELETE CASCADE; one statement
        // removes the probe and its targets together (§8).
        sqlx::query("DELETE FROM probes WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_reverse_agent_probes(
        &self,
        target_agent_id: AgentId,
    ) -> Result<Vec<Probe>, RegistryError> {
        let rows = sqlx::query(
            "SELECT p.id, p.workspace_id, p.agent_id, p.kind, p.enabled, p.interval_secs, \
             p.timeout_secs, p.count, p.duration_secs, p.server_mode, p.server_port, p.label, \
             p.metadata_json \
             FROM probes p \
             JOIN probe_targets t ON t.probe_id = p.id \
             WHERE p.kind = 'AGENT' AND t.agent_target_id = ?1 AND p.agent_id != ?1",
        )
        .bind(target_agent_id.to_string())
        .fetch_all(self.connection.pool())
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.load_probe_row(row).await?);
        }
        Ok(out)
    }
}
