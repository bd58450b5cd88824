#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    };
    use work_coordinator::{
        Config, ConfigError, HandleRegistry, NoTransactionManager, ThreadPoolManager, WorkItem,
        WorkManagerProxy,
    };

    fn process_registry() -> Arc<HandleRegistry> {
        static INIT: OnceLock<()> = OnceLock::new();
        INIT.get_or_init(|| {
            let pools = ThreadPoolManager::with_default("default", Config::with_threads(2)).unwrap();
            HandleRegistry::new(pools, Arc::new(NoTransactionManager)).install();
        });
        HandleRegistry::process().unwrap()
    }

    #[test]
    fn test_proxy_serializes_owner_only() {
        println!("\n=== TEST: proxy serialization ===");
        let registry = process_registry();
        let proxy = registry.proxy("billing");
        proxy.resolve().unwrap();

        let json = serde_json::to_string(&proxy).unwrap();
        assert_eq!(json, r#"{"owner":"billing"}"#);

        let restored: WorkManagerProxy = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, proxy);
        assert!(!restored.is_bound());
        println!("  ✓ {}", json);
    }

    #[test]
    fn test_deserialized_proxy_binds_to_process_registry() {
        println!("\n=== TEST: proxy rebinding ===");
        let registry = process_registry();
        let live = registry.get("inventory").unwrap();

        let restored: WorkManagerProxy = serde_json::from_str(r#"{"owner":"inventory"}"#).unwrap();
        let resolved = restored.resolve().unwrap();
        assert!(Arc::ptr_eq(&live, &resolved));

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        restored
            .do_work(WorkItem::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        restored.start_work(WorkItem::new(|| Ok(()))).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        println!("  ✓ resolved to the live manager");
    }

    #[test]
    fn test_unresolvable_owner_rejects_work() {
        let registry = process_registry();
        registry.configure(
            "misconfigured",
            work_coordinator::WorkManagerConfig {
                thread_pool_id: Some("no-such-pool".into()),
                monitoring: false,
            },
        );

        let proxy: WorkManagerProxy = serde_json::from_str(r#"{"owner":"misconfigured"}"#).unwrap();
        assert!(matches!(proxy.resolve(), Err(ConfigError::ThreadPoolNotFound { .. })));

        let err = proxy.schedule_work(WorkItem::new(|| Ok(()))).unwrap_err();
        assert!(err.is_rejected());
        assert!(err.cause_as::<ConfigError>().is_some());
    }
}
