// ABOUTME: Post-migration hardening of the destination database
// ABOUTME: Enables row level security on every table pgloader created

use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::error::{MigratorError, Result};
use crate::uri::ConnectionEndpoint;

/// Procedural block enabling RLS on each table of `schema`.
pub fn enable_rls_sql(schema: &str) -> String {
    let literal = schema.replace('\'', "''");
    format!(
        r#"DO $$
DECLARE
    r RECORD;
BEGIN
    FOR r IN SELECT tablename FROM pg_tables WHERE schemaname = '{literal}'
    LOOP
        EXECUTE 'ALTER TABLE ' || quote_ident('{literal}') || '.' || quote_ident(r.tablename) || ' ENABLE ROW LEVEL SECURITY;';
    END LOOP;
END$$"#,
        literal = literal
    )
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the hardening session. The endpoint carries
/// `sslmode=disable` for pgloader; this session always requires TLS.
pub fn connection_config(destination: &ConnectionEndpoint) -> Result<PgConfig> {
    let mut config: PgConfig = destination
        .url()
        .as_str()
        .parse()
        .map_err(|e| MigratorError::Hardening(format!("invalid destination: {}", e)))?;
    config
        .ssl_mode(SslMode::Require)
        .connect_timeout(CONNECT_TIMEOUT);
    Ok(config)
}

/// Connects to the destination and enables RLS on every table in `schema`.
pub async fn enable_row_level_security(destination: &ConnectionEndpoint, schema: &str) -> Result<()> {
    // TLS without certificate verification: the pooler certificate does not
    // chain to the system trust store.
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| MigratorError::Hardening(format!("TLS setup failed: {}", e)))?;
    let tls = MakeTlsConnector::new(connector);

    debug!("Connecting to {} for hardening", destination.redacted());
    let (client, connection) = connection_config(destination)?
        .connect(tls)
        .await
        .map_err(|e| MigratorError::Hardening(format!("failed to connect: {}", e)))?;

    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Destination connection error: {}", e);
        }
    });

    let result = client
        .batch_execute(&enable_rls_sql(schema))
        .await
        .map_err(|e| MigratorError::Hardening(e.to_string()));

    drop(client);
    let _ = driver.await;

    result?;
    info!("Row level security enabled on all tables in schema '{}'", schema);
    Ok(())
}
