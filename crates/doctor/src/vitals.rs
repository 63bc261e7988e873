//! Vital sign check: one inspect call per patient per round.

use tracing::{debug, warn};

use crate::patient::Patient;
use crate::runtime::ControlPlane;

/// Inspect the patient's container and record what we saw.
///
/// Returns whether the patient is healthy. Control plane failures mark the
/// patient `missing`; nothing is retried here.
pub async fn check(control: &dyn ControlPlane, patient: &mut Patient) -> bool {
    match control.inspect(&patient.name).await {
        Ok(inspection) => {
            debug!(
                container = %patient.name,
                status = %inspection.status,
                health = %inspection.health,
                "Inspected container"
            );
            patient.observe(inspection);
        }
        Err(e) => {
            warn!(container = %patient.name, error = %e, "Inspect failed");
            patient.mark_missing();
        }
    }
    patient.is_healthy()
}
