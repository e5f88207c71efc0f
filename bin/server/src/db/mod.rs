//! Postgres-backed flow storage and device registry.

mod device;
mod flow;

pub use device::DeviceRepository;
pub use flow::{FlowRepository, INTERRUPTED_RUN_MESSAGE};

use boardflow_core::UserId;
use boardflow_flow::StoreError;
use std::str::FromStr;

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: err.to_string(),
    }
}

/// Checks that a row's stored owner matches the caller.
fn check_owner(resource: &str, stored_owner: &str, owner_id: UserId) -> Result<(), StoreError> {
    let stored = UserId::from_str(stored_owner).map_err(|e| StoreError::Backend {
        details: format!("invalid owner id '{stored_owner}' on {resource}: {e}"),
    })?;
    if stored == owner_id {
        Ok(())
    } else {
        Err(StoreError::AccessDenied {
            resource: resource.to_string(),
        })
    }
}
