use std::time::Duration;

use reelgen_queue::{QueueConfig, RedisStateStore, StateStore};
use reelgen_services::ContentClient;
use reelgen_worker::WorkerConfig;

const SELFCHECK_KEY: &str = "reelgen:selfcheck";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    println!(
        "worker-selfcheck: starting with max_concurrent_jobs={} max_attempts={}",
        config.max_concurrent_jobs, config.max_attempts
    );
    config.validate()?;
    ensure_env_present(&["REDIS_URL"])?;
    ensure_state_store(&QueueConfig::from_env().redis_url).await?;
    ensure_content_service().await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_state_store(redis_url: &str) -> anyhow::Result<()> {
    let store = RedisStateStore::new(redis_url)?;
    store
        .set_ex(SELFCHECK_KEY, "ok", Duration::from_secs(10))
        .await
        .map_err(|e| anyhow::anyhow!("state store not writable: {}", e))?;
    let value = store.get(SELFCHECK_KEY).await?;
    store.delete(SELFCHECK_KEY).await?;

    if value.as_deref() != Some("ok") {
        return Err(anyhow::anyhow!("state store roundtrip returned {:?}", value));
    }
    Ok(())
}

async fn ensure_content_service() -> anyhow::Result<()> {
    let client = ContentClient::from_env()?;
    if !client.health_check().await? {
        return Err(anyhow::anyhow!(
            "content service at {} is unhealthy",
            client.config().base_url
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
