use atlas_core::{RunId, RunStatus, Timestamp};
use tracing::info;

use crate::{Database, DbResult, LOG_TARGET, get_last_in_range, runs};

impl Database {
    /// Start a new run in `Running` state with a frozen config snapshot.
    pub async fn start_run(&self, config_version: &str, config_json: &str) -> DbResult<RunId> {
        let config_version = config_version.to_owned();
        let config_json = config_json.to_owned();
        self.write_with(|tx| {
            let mut runs_table = tx.open_table(&runs::TABLE)?;

            let run_id = get_last_in_range(&runs_table, ..)?
                .map(RunId::next)
                .unwrap_or(RunId::ZERO);

            runs_table.insert(
                &run_id,
                &runs::Value {
                    started_at: Timestamp::now(),
                    finished_at: None,
                    status: RunStatus::Running,
                    config_version,
                    config_json,
                    notes: None,
                },
            )?;

            info!(target: LOG_TARGET, %run_id, "Started run");
            Ok(run_id)
        })
        .await
    }

    /// Transition a run to its terminal status.
    pub async fn finish_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        notes: Option<String>,
    ) -> DbResult<()> {
        self.write_with(|tx| {
            let mut runs_table = tx.open_table(&runs::TABLE)?;

            let Some(mut record) = runs_table.get(&run_id)?.map(|g| g.value()) else {
                return Ok(());
            };
            record.finished_at = Some(Timestamp::now());
            record.status = status;
            record.notes = notes;
            runs_table.insert(&run_id, &record)?;

            info!(target: LOG_TARGET, %run_id, %status, "Finished run");
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, run_id: RunId) -> DbResult<Option<runs::Value>> {
        self.read_with(|tx| {
            let runs_table = tx.open_table(&runs::TABLE)?;
            Ok(runs_table.get(&run_id)?.map(|g| g.value()))
        })
        .await
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: usize) -> DbResult<Vec<(RunId, runs::Value)>> {
        self.read_with(|tx| {
            let runs_table = tx.open_table(&runs::TABLE)?;
            let (page, _) =
                Self::paginate_table_rev(&runs_table, None, limit, |k, v| Ok(Some((k, v))))?;
            Ok(page)
        })
        .await
    }
}
