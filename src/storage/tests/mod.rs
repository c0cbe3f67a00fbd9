// src/storage/tests/mod.rs


// Behaviour every counter store must share
pub(crate) mod common {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::CounterStore;

    // Counting, expiry set on create and left alone afterwards, peek
    pub async fn check_counter_semantics<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let window = Duration::from_secs(60);

        assert_eq!(store.peek(key).await?, None);
        assert_eq!(store.ttl_remaining(key).await?, None);

        assert_eq!(store.increment_and_get(key, window).await?, 1);
        let first_ttl = store.ttl_remaining(key).await?.expect("new key must expire");
        assert!(first_ttl <= window);
        assert!(first_ttl > window - Duration::from_secs(5));

        // a longer ttl on later hits must not push the expiry out
        assert_eq!(store.increment_and_get(key, window * 10).await?, 2);
        assert_eq!(store.increment_and_get(key, window * 10).await?, 3);
        let ttl = store.ttl_remaining(key).await?.expect("key still expires");
        assert!(ttl <= first_ttl);

        let snapshot = store.peek(key).await?.expect("key exists");
        assert_eq!(snapshot.count, 3);
        assert!(snapshot.ttl_remaining.is_some_and(|ttl| ttl <= window));

        // peek does not count
        assert_eq!(store.peek(key).await?.map(|s| s.count), Some(3));

        Ok(())
    }

    // Concurrent increments of one key each observe a distinct count
    pub async fn check_concurrent_increments<S>(store: Arc<S>, key: &str, tasks: u64) -> Result<()>
    where
        S: CounterStore + 'static,
    {
        let handles: Vec<_> = (0..tasks)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = key.to_string();
                tokio::spawn(async move {
                    store
                        .increment_and_get(&key, Duration::from_secs(60))
                        .await
                })
            })
            .collect();

        let mut counts = Vec::new();
        for result in futures::future::join_all(handles).await {
            counts.push(result.expect("task panicked")?);
        }
        counts.sort_unstable();

        assert_eq!(counts, (1..=tasks).collect::<Vec<_>>());
        Ok(())
    }

    // The expiry handed back with each count belongs to the key's first hit
    pub async fn check_reported_expiry<S: CounterStore>(store: &S, key: &str) -> Result<()> {
        let window = Duration::from_secs(60);

        let first = store.increment_with_expiry(key, window).await?;
        assert_eq!(first.count, 1);
        let first_expiry = first.expires_at.expect("new key must expire");

        let second = store.increment_with_expiry(key, window * 10).await?;
        assert_eq!(second.count, 2);
        let second_expiry = second.expires_at.expect("key still expires");

        // a shared store rounds to whole milliseconds
        let drift = (second_expiry - first_expiry).num_milliseconds().abs();
        assert!(drift <= 5, "expiry moved by {}ms", drift);

        let ttl = store.ttl_remaining(key).await?.expect("key still expires");
        assert!(ttl <= window);
        Ok(())
    }
}
