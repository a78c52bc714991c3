//! PostgreSQL connection pool construction.
//!
//! The clone borrows connections from a size-bounded deadpool pool. Callers
//! that already run a pool for request handling can pass it to
//! [`Orchestrator::with_pool`](crate::Orchestrator::with_pool) instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio_postgres::Config as PgConfig;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{CloneError, Result};

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a pool from configuration and verify it can connect.
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port);
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);
    pg_config.application_name("pg-schema-clone");

    let pool = create_pool_from(
        pg_config,
        &config.ssl_mode,
        config.get_max_connections(),
    )?;

    let client = pool
        .get()
        .await
        .map_err(|e| CloneError::pool(e, "testing PostgreSQL connection"))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL: {}:{}/{}",
        config.host, config.port, config.database
    );

    Ok(pool)
}

/// Create a pool from an already-built driver config. Does not connect.
pub fn create_pool_from(mut pg_config: PgConfig, ssl_mode: &str, max_conns: usize) -> Result<Pool> {
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(CONNECT_TIMEOUT);

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let pool = match ssl_mode.to_lowercase().as_str() {
        "disable" => {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
            let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
            Pool::builder(mgr)
                .max_size(max_conns)
                .build()
                .map_err(|e| CloneError::pool(e, "creating PostgreSQL pool"))?
        }
        other => {
            let tls_config = build_tls_config(other)?;
            let tls_connector = MakeRustlsConnect::new(tls_config);
            let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
            Pool::builder(mgr)
                .max_size(max_conns)
                .build()
                .map_err(|e| CloneError::pool(e, "creating PostgreSQL pool"))?
        }
    };

    Ok(pool)
}

/// Build TLS configuration based on ssl_mode.
fn build_tls_config(ssl_mode: &str) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| CloneError::Config(format!("TLS setup failed: {}", e)))?;

    let config = match ssl_mode {
        "require" => {
            warn!(
                "ssl_mode=require: TLS enabled but server certificate is not verified. \
                 Consider using 'verify-full' for production."
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
        "verify-ca" | "verify-full" => {
            info!("ssl_mode={}: certificate verification enabled", ssl_mode);
            let mut root_store = rustls::RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        }
        other => {
            return Err(CloneError::Config(format!(
                "Invalid ssl_mode '{}'. Valid options: disable, require, verify-ca, verify-full",
                other
            )));
        }
    };

    Ok(config)
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Whether a connection could be made and queried.
    pub connected: bool,

    /// Round-trip time of the probe.
    pub latency_ms: u64,

    /// `server_version` reported by PostgreSQL.
    pub server_version: Option<String>,

    /// Error text when not connected.
    pub error: Option<String>,
}

/// Probe the pool with a trivial query.
pub async fn health_check(pool: &Pool) -> HealthCheckResult {
    let start = Instant::now();
    let probe = async {
        let client = pool
            .get()
            .await
            .map_err(|e| CloneError::pool(e, "health check"))?;
        let row = client.query_one("SHOW server_version", &[]).await?;
        Ok::<String, CloneError>(row.get(0))
    };

    match probe.await {
        Ok(version) => HealthCheckResult {
            connected: true,
            latency_ms: start.elapsed().as_millis() as u64,
            server_version: Some(version),
            error: None,
        },
        Err(e) => HealthCheckResult {
            connected: false,
            latency_ms: start.elapsed().as_millis() as u64,
            server_version: None,
            error: Some(e.to_string()),
        },
    }
}

/// Certificate verifier that accepts any server certificate (ssl_mode=require).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
