//! Edit ingestion pipeline integration tests

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use voxel_world::api::WorldApi;
    use voxel_world::error::StoreError;
    use voxel_world::grid::region_topic;
    use voxel_world::protocol::{Broadcast, ModifyRequest};
    use voxel_world::service::WorldService;
    use voxel_world::store::{KvStore, MemoryKv};
    use voxel_world::transport::{MemoryTransport, Subscription, Transport};
    use voxel_world::types::{
        now_ms, BlockPos, Modification, ModifyAction, ServerConfig,
    };

    fn make_service(kv: Arc<dyn KvStore>) -> (Arc<WorldService>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let service = Arc::new(WorldService::new(
            ServerConfig {
                max_coord: 1000,
                ..Default::default()
            },
            kv,
            transport.clone(),
        ));
        (service, transport)
    }

    fn place(x: i32, y: i32, z: i32) -> Modification {
        Modification {
            position: BlockPos::new(x, y, z),
            block_type: Some(4),
            action: ModifyAction::Place,
            client_timestamp: now_ms(),
        }
    }

    fn remove(x: i32, y: i32, z: i32) -> Modification {
        Modification {
            position: BlockPos::new(x, y, z),
            block_type: None,
            action: ModifyAction::Remove,
            client_timestamp: now_ms(),
        }
    }

    fn batch(mods: Vec<Modification>) -> ModifyRequest {
        ModifyRequest {
            username: "ada".into(),
            level: "earth".into(),
            modifications: mods,
        }
    }

    fn drain_block_modifies(sub: &mut Subscription) -> Vec<Broadcast> {
        let mut out = Vec::new();
        while let Some(payload) = sub.try_recv() {
            out.push(serde_json::from_slice(&payload).unwrap());
        }
        out
    }

    // -----------------------------------------------------------------------
    // Happy path: broadcast before persistence
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn valid_batch_broadcasts_and_persists() {
        let (service, transport) = make_service(Arc::new(MemoryKv::new()));
        let mut sub = transport.subscribe(&region_topic("earth", 0, 0));

        let resp = service
            .modify_blocks(batch(vec![place(10, 5, 3), place(11, 5, 3), remove(12, 5, 3)]))
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.failed_at, None);

        // All three fanned out, stamped with a server timestamp.
        let msgs = drain_block_modifies(&mut sub);
        assert_eq!(msgs.len(), 3);
        for msg in &msgs {
            match msg {
                Broadcast::BlockModify(m) => {
                    assert_eq!(m.username, "ada");
                    assert!(m.server_timestamp > 0);
                }
                other => panic!("unexpected broadcast: {:?}", other),
            }
        }

        // Persistence runs on a spawned task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let blocks = service.store().chunk_blocks("earth", 0, 0).unwrap();
        assert_eq!(blocks.len(), 3);

        let tomb = blocks.iter().find(|b| b.x == 12).unwrap();
        assert!(!tomb.placed);
        assert_eq!(tomb.block_type, None);
    }

    // -----------------------------------------------------------------------
    // Sequential validation stops at the first bad entry
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failure_at_index_k_processes_exactly_k_entries() {
        let (service, transport) = make_service(Arc::new(MemoryKv::new()));
        let mut sub = transport.subscribe(&region_topic("earth", 0, 0));

        let resp = service
            .modify_blocks(batch(vec![
                place(1, 10, 1),
                place(2, 10, 1),
                place(3, 300, 1), // y out of range
                place(4, 10, 1),  // never reached
            ]))
            .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.failed_at, Some(2));
        assert!(resp.message.is_some());

        assert_eq!(drain_block_modifies(&mut sub).len(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let blocks = service.store().chunk_blocks("earth", 0, 0).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.x == 1 || b.x == 2));
    }

    #[tokio::test]
    async fn coordinate_bound_is_enforced() {
        let (service, _) = make_service(Arc::new(MemoryKv::new()));
        let resp = service
            .modify_blocks(batch(vec![place(1001, 10, 0)]))
            .unwrap();
        assert_eq!(resp.failed_at, Some(0));
    }

    #[tokio::test]
    async fn empty_batch_is_accepted() {
        let (service, _) = make_service(Arc::new(MemoryKv::new()));
        let resp = service.modify_blocks(batch(vec![])).unwrap();
        assert!(resp.ok);
    }

    // -----------------------------------------------------------------------
    // Persistence retry with backoff
    // -----------------------------------------------------------------------

    /// Fails the first `failures` field writes, then behaves normally.
    struct FlakyKv {
        inner: MemoryKv,
        failures: AtomicU32,
    }

    impl FlakyKv {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryKv::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    impl KvStore for FlakyKv {
        fn get_hash(&self, key: &str) -> Result<std::collections::HashMap<String, String>, StoreError> {
            self.inner.get_hash(key)
        }
        fn put_hash(
            &self,
            key: &str,
            hash: std::collections::HashMap<String, String>,
        ) -> Result<(), StoreError> {
            self.inner.put_hash(key, hash)
        }
        fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
            self.inner.get_field(key, field)
        }
        fn set_field(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Unavailable("injected failure".into()));
            }
            self.inner.set_field(key, field, value)
        }
        fn del_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
            self.inner.del_field(key, field)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_retries_until_the_store_recovers() {
        let (service, _) = make_service(Arc::new(FlakyKv::new(2)));

        let resp = service.modify_blocks(batch(vec![place(5, 10, 5)])).unwrap();
        assert!(resp.ok, "broadcast path is independent of the store");

        // Backoff schedule is 100/200/400 ms; two failures resolve inside it.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        let blocks = service.store().chunk_blocks("earth", 0, 0).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_non_fatal() {
        let (service, _) = make_service(Arc::new(FlakyKv::new(u32::MAX)));

        let resp = service.modify_blocks(batch(vec![place(5, 10, 5)])).unwrap();
        assert!(resp.ok);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        // Nothing persisted, nothing crashed; the service still answers.
        let blocks = service.store().chunk_blocks("earth", 0, 0).unwrap();
        assert!(blocks.is_empty());
        assert!(service.modify_blocks(batch(vec![])).unwrap().ok);
    }
}
