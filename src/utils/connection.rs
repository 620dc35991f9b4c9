// Live connectivity check against a resolved target.
use sqlx::Connection;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use std::time::Duration;
use tokio::time::timeout;

use crate::model::ConnectionDescriptor;

/// Opens and closes one connection. Returns `false` on any failure or when `limit` elapses.
pub async fn check_connection(descriptor: &ConnectionDescriptor, limit: Duration) -> bool {
    if !descriptor.is_running {
        return false;
    }

    let options = PgConnectOptions::new()
        .host(&descriptor.host)
        .port(descriptor.port)
        .username(&descriptor.user)
        .password(&descriptor.password)
        .database(&descriptor.database);

    match timeout(limit, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "closing probe connection failed");
            }
            tracing::info!(host = %descriptor.host, port = descriptor.port, "connection check succeeded");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!(host = %descriptor.host, port = descriptor.port, error = %e, "connection check failed");
            false
        }
        Err(_) => {
            tracing::warn!(host = %descriptor.host, port = descriptor.port, "connection check timed out");
            false
        }
    }
}
