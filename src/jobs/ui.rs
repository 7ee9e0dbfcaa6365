//! System UI restart

use crate::error::Result;
use crate::id::JobId;
use crate::system::ProcessService;

/// Force-stop the system UI process; the platform respawns it
pub fn restart(processes: &dyn ProcessService, id: JobId, process_name: &str) -> Result<()> {
    tracing::info!(job_id = %id, process = process_name, "Restarting system UI");
    processes.force_stop(process_name).inspect_err(|e| {
        tracing::error!(job_id = %id, process = process_name, error = %e, "Failed to restart system UI");
    })
}
