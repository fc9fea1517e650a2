use std::sync::Arc;
use std::time::Duration;

use crate::entities;
use crate::errors::GateError;
use crate::rbac::SnapshotCache;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

pub const RELOAD_AUTHZ_SNAPSHOT: &str = "reload_authz_snapshot";

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    db: DatabaseConnection,
    cache: Arc<SnapshotCache>,
    refresh_secs: u64,
) -> Result<JobScheduler, GateError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| GateError::Other(format!("Failed to create job scheduler: {}", e)))?;

    // Picks up writes made by other instances sharing the database
    let reload_job = Job::new_repeated_async(
        Duration::from_secs(refresh_secs.max(1)),
        move |_uuid, _l| {
            let db = db.clone();
            let cache = cache.clone();
            Box::pin(async move {
                run_recorded(&db, RELOAD_AUTHZ_SNAPSHOT, || {
                    reload_authz_snapshot(&db, &cache)
                })
                .await;
            })
        },
    )
    .map_err(|e| GateError::Other(format!("Failed to create snapshot reload job: {}", e)))?;

    sched
        .add(reload_job)
        .await
        .map_err(|e| GateError::Other(format!("Failed to add snapshot reload job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| GateError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!(refresh_secs, "Job scheduler started with {} jobs", 1);

    Ok(sched)
}

/// Rebuild the shared snapshot. Returns the number of roles and permissions
/// it now holds.
pub async fn reload_authz_snapshot(
    db: &DatabaseConnection,
    cache: &SnapshotCache,
) -> Result<u64, GateError> {
    if cache.is_stale() {
        warn!("Authorization snapshot is stale, reloading");
    }
    let generation = cache.reload(db).await?;
    let snapshot = cache.current_snapshot();
    let count = (snapshot.roles.len() + snapshot.permissions.len()) as u64;
    info!(generation, records = count, "Reloaded authorization snapshot");
    Ok(count)
}

async fn run_recorded<F, Fut>(db: &DatabaseConnection, job_name: &str, job: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<u64, GateError>>,
{
    info!("Running {} job", job_name);
    let execution_id = start_job_execution(db, job_name).await.ok();

    match job().await {
        Ok(count) => {
            if let Some(id) = execution_id {
                let _ = complete_job_execution(db, id, true, None, Some(count as i64)).await;
            }
        }
        Err(e) => {
            error!("Job {} failed: {}", job_name, e);
            if let Some(id) = execution_id {
                let _ = complete_job_execution(db, id, false, Some(e.to_string()), None).await;
            }
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, GateError> {
    use entities::job_execution;

    let now = Utc::now().timestamp();

    let execution = job_execution::ActiveModel {
        id: sea_orm::ActiveValue::NotSet,
        job_name: Set(job_name.to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), GateError> {
    use entities::job_execution::{Column, Entity};

    let now = Utc::now().timestamp();

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(now));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Manually trigger a job by name (used by the admin API)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    cache: &SnapshotCache,
    job_name: &str,
) -> Result<u64, GateError> {
    info!("Manually triggering job: {}", job_name);

    let result = match job_name {
        RELOAD_AUTHZ_SNAPSHOT => {
            let execution_id = start_job_execution(db, job_name).await?;
            let result = reload_authz_snapshot(db, cache).await;
            match &result {
                Ok(count) => {
                    complete_job_execution(db, execution_id, true, None, Some(*count as i64))
                        .await?
                }
                Err(e) => {
                    error!("Manually triggered job {} failed: {}", job_name, e);
                    complete_job_execution(db, execution_id, false, Some(e.to_string()), None)
                        .await?
                }
            }
            result
        }
        _ => Err(GateError::Other(format!("Unknown job name: {}", job_name))),
    }?;

    info!(
        "Manually triggered job {} completed: {} records",
        job_name, result
    );
    Ok(result)
}
