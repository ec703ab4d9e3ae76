use chrono::Utc;
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::scheduler::Scheduler;
use crate::store::IdentityStore;

/// Register the mapping retention purge, if a retention window is configured
pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    store: IdentityStore,
    config: &StoreConfig,
) -> anyhow::Result<()> {
    let Some(days) = config.mapping_retention_days else {
        info!("Mapping retention disabled, relayed message ids are kept forever");
        return Ok(());
    };

    scheduler
        .add_cron_job("mapping-purge", &config.purge_cron, move || {
            let store = store.clone();
            async move { purge_expired_mappings(&store, days).await }
        })
        .await?;

    Ok(())
}

async fn purge_expired_mappings(store: &IdentityStore, retention_days: u32) {
    let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
    match store.purge_mappings_before(cutoff).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, %cutoff, "Purged expired message mappings"),
        Err(e) => error!("Mapping purge failed: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mappings::MessageMapping;

    #[tokio::test]
    async fn test_retention_disabled_registers_nothing() {
        let store = IdentityStore::open_in_memory().unwrap();
        let mut scheduler = Scheduler::new().await.unwrap();
        let config = StoreConfig {
            database_path: ":memory:".into(),
            mapping_retention_days: None,
            purge_cron: "0 0 3 * * *".to_string(),
        };
        register_builtin_tasks(&mut scheduler, store.clone(), &config)
            .await
            .unwrap();
        assert!(scheduler.jobs.is_empty());

        let config = StoreConfig {
            mapping_retention_days: Some(30),
            purge_cron: "nonsense".to_string(),
            ..config
        };
        assert!(register_builtin_tasks(&mut scheduler, store, &config)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_purge_keeps_recent_mappings() {
        let store = IdentityStore::open_in_memory().unwrap();
        store
            .save_mapping(&MessageMapping {
                group_message_id: 1,
                topic_id: 55,
                client_message_id: 1,
                user_id: 1001,
            })
            .await
            .unwrap();

        purge_expired_mappings(&store, 30).await;
        assert_eq!(store.client_message_id(1, 55).await.unwrap(), Some(1));
    }
}
