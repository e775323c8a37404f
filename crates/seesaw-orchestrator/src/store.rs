//! Deployment record store: one sqlite file under the state directory
//! (`SEESAW_STATE_DIR`, default `~/.seesaw`). Only touched by the
//! coordinator and the CLI; the proxy never blocks on it.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use seesaw_common::{DeployRequest, DeployStatus, DeploymentResult, Error, HybridDeployment};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS deployments (
    service_name TEXT PRIMARY KEY,
    model_name   TEXT NOT NULL,
    gpu          TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    request_json TEXT NOT NULL,
    router_url   TEXT,
    serverless_json TEXT,
    spot_json    TEXT,
    router_json  TEXT
)";

/// One persisted deployment.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    pub service_name: String,
    pub model_name: String,
    pub gpu: String,
    pub status: DeployStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub request: DeployRequest,
    pub deployment: HybridDeployment,
}

impl DeploymentRecord {
    pub fn new(request: DeployRequest, deployment: HybridDeployment) -> Self {
        let now = Utc::now();
        Self {
            service_name: request.service_name.clone(),
            model_name: request.model_name.clone(),
            gpu: request.gpu.clone(),
            status: deployment.status(),
            created_at: now,
            updated_at: now,
            request,
            deployment,
        }
    }
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SEESAW_STATE_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".seesaw")
}

impl Store {
    /// Open (and create if needed) the default store.
    pub async fn open_default() -> Result<Self, Error> {
        Self::open(state_dir()).await
    }

    pub async fn open(dir: PathBuf) -> Result<Self, Error> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Store(format!("create state dir {}: {e}", dir.display())))?;
        let path = dir.join("deployments.db");
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| Error::Store(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| Error::Store(format!("open {}: {e}", path.display())))?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Insert or replace by service name.
    pub async fn save(&self, record: &DeploymentRecord) -> Result<(), Error> {
        let request_json =
            serde_json::to_string(&record.request).map_err(|e| Error::Store(e.to_string()))?;
        let to_json = |r: &Option<DeploymentResult>| -> Result<Option<String>, Error> {
            r.as_ref()
                .map(|v| serde_json::to_string(v).map_err(|e| Error::Store(e.to_string())))
                .transpose()
        };

        sqlx::query(
            "INSERT INTO deployments
                (service_name, model_name, gpu, status, created_at, updated_at,
                 request_json, router_url, serverless_json, spot_json, router_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(service_name) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                router_url = excluded.router_url,
                serverless_json = excluded.serverless_json,
                spot_json = excluded.spot_json,
                router_json = excluded.router_json",
        )
        .bind(&record.service_name)
        .bind(&record.model_name)
        .bind(&record.gpu)
        .bind(record.status.as_str())
        .bind(record.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(request_json)
        .bind(&record.deployment.router_url)
        .bind(to_json(&record.deployment.serverless)?)
        .bind(to_json(&record.deployment.spot)?)
        .bind(to_json(&record.deployment.router)?)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }

    pub async fn load(&self, service_name: &str) -> Result<Option<DeploymentRecord>, Error> {
        let row = sqlx::query("SELECT * FROM deployments WHERE service_name = ?1")
            .bind(service_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        row.map(row_to_record).transpose()
    }

    /// All records, optionally filtered by status, newest first.
    pub async fn list(&self, status: Option<DeployStatus>) -> Result<Vec<DeploymentRecord>, Error> {
        let rows = match status {
            Some(s) => {
                sqlx::query(
                    "SELECT * FROM deployments WHERE status = ?1 ORDER BY created_at DESC",
                )
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM deployments ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(|e| Error::Store(e.to_string()))?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn update_status(
        &self,
        service_name: &str,
        status: DeployStatus,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE deployments SET status = ?1, updated_at = ?2 WHERE service_name = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(service_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(())
    }
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<DeploymentRecord, Error> {
    let parse_ts = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Store(format!("bad timestamp: {e}")))
    };
    let from_json = |s: Option<String>| -> Result<Option<DeploymentResult>, Error> {
        s.map(|v| serde_json::from_str(&v).map_err(|e| Error::Store(e.to_string())))
            .transpose()
    };

    let status_raw: String = row.get("status");
    let status = DeployStatus::parse(&status_raw)
        .ok_or_else(|| Error::Store(format!("unknown status '{status_raw}'")))?;
    let request: DeployRequest = serde_json::from_str(&row.get::<String, _>("request_json"))
        .map_err(|e| Error::Store(e.to_string()))?;

    Ok(DeploymentRecord {
        service_name: row.get("service_name"),
        model_name: row.get("model_name"),
        gpu: row.get("gpu"),
        status,
        created_at: parse_ts(row.get("created_at"))?,
        updated_at: parse_ts(row.get("updated_at"))?,
        request,
        deployment: HybridDeployment {
            serverless: from_json(row.get("serverless_json"))?,
            spot: from_json(row.get("spot_json"))?,
            router: from_json(row.get("router_json"))?,
            router_url: row.get("router_url"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> Store {
        let dir = std::env::temp_dir().join(format!("seesaw_store_{}", uuid_ish()));
        Store::open(dir).await.unwrap()
    }

    fn uuid_ish() -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        format!("{nanos}_{}", std::process::id())
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = temp_store().await;
        let request = DeployRequest::new("Qwen/Qwen2.5-7B-Instruct", "L4");
        let name = request.service_name.clone();
        let deployment = HybridDeployment {
            serverless: Some(DeploymentResult {
                provider: "modal".to_string(),
                endpoint_url: Some("http://sls.example".to_string()),
                ..Default::default()
            }),
            spot: Some(DeploymentResult::failed("skyserve", "quota")),
            router_url: Some("http://0.0.0.0:18080".to_string()),
            ..Default::default()
        };

        store
            .save(&DeploymentRecord::new(request, deployment))
            .await
            .unwrap();

        let loaded = store.load(&name).await.unwrap().unwrap();
        assert_eq!(loaded.status, DeployStatus::Degraded);
        assert_eq!(loaded.model_name, "Qwen/Qwen2.5-7B-Instruct");
        assert_eq!(
            loaded.deployment.serverless.unwrap().endpoint_url.as_deref(),
            Some("http://sls.example")
        );
        assert_eq!(
            loaded.deployment.spot.unwrap().error.as_deref(),
            Some("quota")
        );
    }

    #[tokio::test]
    async fn test_save_is_upsert_and_list_filters() {
        let store = temp_store().await;
        let request = DeployRequest::new("m", "L4");
        let name = request.service_name.clone();
        let ok = DeploymentResult {
            provider: "modal".to_string(),
            endpoint_url: Some("http://a".to_string()),
            ..Default::default()
        };
        let mut record = DeploymentRecord::new(
            request,
            HybridDeployment {
                serverless: Some(ok.clone()),
                spot: Some(ok.clone()),
                ..Default::default()
            },
        );
        store.save(&record).await.unwrap();

        record.status = DeployStatus::Degraded;
        store.save(&record).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 1);

        store
            .update_status(&name, DeployStatus::Destroyed)
            .await
            .unwrap();
        let destroyed = store.list(Some(DeployStatus::Destroyed)).await.unwrap();
        assert_eq!(destroyed.len(), 1);
        let active = store.list(Some(DeployStatus::Active)).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = temp_store().await;
        assert!(store.load("nope").await.unwrap().is_none());
    }
}
