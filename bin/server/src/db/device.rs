//! Device repository.

use super::{backend, check_owner};
use async_trait::async_trait;
use boardflow_core::{DeviceId, UserId};
use boardflow_flow::{DeviceRegistry, DeviceStatus, StoreError};
use boardflow_remote::{ConnectionDescriptor, Credential};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// Row type for descriptor queries.
#[derive(FromRow)]
struct DeviceRow {
    owner_id: String,
    host: String,
    port: i32,
    username: String,
    credential: serde_json::Value,
}

impl DeviceRow {
    fn try_into_descriptor(
        self,
        device_id: DeviceId,
        owner_id: UserId,
    ) -> Result<ConnectionDescriptor, StoreError> {
        check_owner(&resource(device_id), &self.owner_id, owner_id)?;
        let port = u16::try_from(self.port).map_err(|_| StoreError::Backend {
            details: format!("invalid port {} for {}", self.port, resource(device_id)),
        })?;
        let credential: Credential =
            serde_json::from_value(self.credential).map_err(|e| StoreError::Backend {
                details: format!("invalid credential for {}: {}", resource(device_id), e),
            })?;
        Ok(ConnectionDescriptor::new(self.host, self.username, credential).with_port(port))
    }
}

fn resource(device_id: DeviceId) -> String {
    format!("device {device_id}")
}

/// Repository for registered devices.
pub struct DeviceRepository {
    pool: PgPool,
}

impl DeviceRepository {
    /// Creates a new repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRegistry for DeviceRepository {
    async fn resolve_device(
        &self,
        device_id: DeviceId,
        owner_id: UserId,
    ) -> Result<ConnectionDescriptor, StoreError> {
        let row: Option<DeviceRow> = sqlx::query_as(
            r#"
            SELECT owner_id, host, port, username, credential
            FROM devices
            WHERE id = $1
            "#,
        )
        .bind(device_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.ok_or_else(|| StoreError::NotFound {
            resource: resource(device_id),
        })?
        .try_into_descriptor(device_id, owner_id)
    }

    async fn mark_device_status(
        &self,
        device_id: DeviceId,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // last_connected_at only moves on a successful connection.
        sqlx::query(
            r#"
            UPDATE devices
            SET status = $2,
                last_connected_at = CASE WHEN $2 = 'online' THEN $3 ELSE last_connected_at END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(device_id.to_string())
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(owner: UserId, port: i32, credential: serde_json::Value) -> DeviceRow {
        DeviceRow {
            owner_id: owner.to_string(),
            host: "pi.local".to_string(),
            port,
            username: "pi".to_string(),
            credential,
        }
    }

    #[test]
    fn row_becomes_descriptor() {
        let owner = UserId::new();
        let descriptor = row(owner, 2222, json!({"type": "password", "password": "secret"}))
            .try_into_descriptor(DeviceId::new(), owner)
            .expect("descriptor");

        assert_eq!(descriptor.address(), "pi.local:2222");
        assert_eq!(descriptor.username, "pi");
        assert_eq!(descriptor.credential, Credential::password("secret"));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let owner = UserId::new();
        let err = row(owner, 70_000, json!({"type": "password", "password": "x"}))
            .try_into_descriptor(DeviceId::new(), owner)
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
    }

    #[test]
    fn unknown_credential_type_is_rejected() {
        let owner = UserId::new();
        let err = row(owner, 22, json!({"type": "kerberos"}))
            .try_into_descriptor(DeviceId::new(), owner)
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend { .. }));
    }

    #[test]
    fn foreign_device_is_denied() {
        let err = row(UserId::new(), 22, json!({"type": "password", "password": "x"}))
            .try_into_descriptor(DeviceId::new(), UserId::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));
    }
}
