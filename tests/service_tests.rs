//! WorldService integration tests

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use voxel_world::api::WorldApi;
    use voxel_world::grid::{chunk_of, level_topic, region_of, region_topic};
    use voxel_world::protocol::{
        Broadcast, ChunkCoord, ChunkStateRequest, ClientMode, ConnectRequest, FriendRequest,
        PositionUpdate, UpvoteRequest,
    };
    use voxel_world::service::WorldService;
    use voxel_world::store::MemoryKv;
    use voxel_world::transport::{MemoryTransport, Transport};
    use voxel_world::types::{BlockRecord, ServerConfig, Vec3};

    fn make_service() -> (Arc<WorldService>, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let service = Arc::new(WorldService::new(
            ServerConfig::default(),
            Arc::new(MemoryKv::new()),
            transport.clone(),
        ));
        (service, transport)
    }

    fn connect(service: &WorldService, level: &str, username: &str) -> voxel_world::protocol::ConnectResponse {
        service
            .connect(ConnectRequest {
                level: level.into(),
                username: Some(username.into()),
            })
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Connect
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn connect_registers_presence_and_counts() {
        let (service, _) = make_service();
        let resp = connect(&service, "earth", "ada");

        assert_eq!(resp.mode, ClientMode::Player);
        assert_eq!(resp.username, "ada");
        assert_eq!(resp.player_count, 1);
        assert!(resp.players.is_empty());
        assert!(service.presence().is_active("earth", "ada"));

        let resp2 = connect(&service, "earth", "grace");
        assert_eq!(resp2.player_count, 2);
        assert_eq!(resp2.players.len(), 1);
        assert_eq!(resp2.players[0].username, "ada");
    }

    #[tokio::test]
    async fn connect_mints_username_when_absent() {
        let (service, _) = make_service();
        let resp = service
            .connect(ConnectRequest {
                level: "earth".into(),
                username: None,
            })
            .unwrap();
        assert!(resp.username.starts_with("player-"));
        assert!(service.presence().is_active("earth", &resp.username));
    }

    #[tokio::test]
    async fn duplicate_same_level_connect_is_viewer() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");
        let second = connect(&service, "earth", "ada");

        assert_eq!(second.mode, ClientMode::Viewer);
        // The viewer never touched presence: still one player.
        assert_eq!(service.presence().level_count("earth"), 1);

        // The same identity in a *different* level is a regular player.
        let other = connect(&service, "moon", "ada");
        assert_eq!(other.mode, ClientMode::Player);
    }

    #[tokio::test]
    async fn initial_chunks_cover_the_draw_distance_box() {
        let (service, _) = make_service();
        let resp = connect(&service, "earth", "ada");
        let r = service.config().draw_distance;
        assert_eq!(resp.initial_chunks.len(), ((2 * r + 1) * (2 * r + 1)) as usize);

        let (pcx, pcz) = chunk_of(resp.spawn_position.x as i32, resp.spawn_position.z as i32);
        assert!(resp
            .initial_chunks
            .iter()
            .any(|c| c.chunk_x == pcx && c.chunk_z == pcz));
    }

    #[tokio::test]
    async fn initial_chunks_carry_persisted_blocks() {
        let (service, _) = make_service();
        // Seed a block near where ada will spawn, before she connects.
        let probe = connect(&service, "earth", "scout");
        let (sx, sz) = (probe.spawn_position.x as i32, probe.spawn_position.z as i32);
        service
            .store()
            .write_blocks(
                "earth",
                &[BlockRecord {
                    x: sx + 1,
                    y: 10,
                    z: sz,
                    block_type: Some(3),
                    placed: true,
                    username: "scout".into(),
                    timestamp: 1,
                }],
            )
            .unwrap();

        // Reconnect scout: same spawn area, block must be in the box.
        service.disconnect("scout", "earth").unwrap();
        let again = connect(&service, "earth", "scout");
        let found = again
            .initial_chunks
            .iter()
            .flat_map(|c| c.blocks.iter())
            .any(|b| b.x == sx + 1 && b.y == 10 && b.z == sz);
        assert!(found);
    }

    // -----------------------------------------------------------------------
    // Reconnect-to-last-spot
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn disconnect_persists_position_for_reconnect() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");

        let moved = Vec3::new(123.0, 40.0, -77.0);
        service
            .update_position(PositionUpdate {
                username: "ada".into(),
                level: "earth".into(),
                position: moved,
                rotation: Vec3::zero(),
            })
            .unwrap();
        service.disconnect("ada", "earth").unwrap();
        assert!(!service.presence().is_active("earth", "ada"));

        let resp = connect(&service, "earth", "ada");
        assert_eq!(resp.spawn_position, moved);
    }

    // -----------------------------------------------------------------------
    // Position updates
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn position_update_refreshes_presence() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");

        let ack = service
            .update_position(PositionUpdate {
                username: "ada".into(),
                level: "earth".into(),
                position: Vec3::new(5.0, 32.0, 6.0),
                rotation: Vec3::new(0.0, 1.5, 0.0),
            })
            .unwrap();
        assert!(ack.ok);
        let rec = service.presence().get("earth", "ada").unwrap();
        assert_eq!(rec.position.x, 5.0);
        assert_eq!(rec.rotation.y, 1.5);
    }

    #[tokio::test]
    async fn position_update_for_unknown_identity_is_refused() {
        let (service, _) = make_service();
        let ack = service
            .update_position(PositionUpdate {
                username: "ghost".into(),
                level: "earth".into(),
                position: Vec3::zero(),
                rotation: Vec3::zero(),
            })
            .unwrap();
        assert!(!ack.ok);
    }

    // -----------------------------------------------------------------------
    // Position fanout
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn broadcast_positions_diffs_per_topic() {
        let (service, transport) = make_service();
        let resp = connect(&service, "earth", "ada");

        let (cx, cz) = chunk_of(resp.spawn_position.x as i32, resp.spawn_position.z as i32);
        let (rx, rz) = region_of(cx, cz);
        let mut sub = transport.subscribe(&region_topic("earth", rx, rz));

        service.broadcast_positions();
        service.broadcast_positions(); // unchanged → skipped

        let payload = sub.try_recv().expect("first pass publishes");
        let msg: Broadcast = serde_json::from_slice(&payload).unwrap();
        match msg {
            Broadcast::PlayerPositions { level, players } => {
                assert_eq!(level, "earth");
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].username, "ada");
            }
            other => panic!("unexpected broadcast: {:?}", other),
        }
        assert!(sub.try_recv().is_none(), "second pass must be skipped");

        // A pose change alters the payload → published again. Rotation
        // only, so the pose stays in the same region topic.
        service
            .update_position(PositionUpdate {
                username: "ada".into(),
                level: "earth".into(),
                position: resp.spawn_position,
                rotation: Vec3::new(0.0, 1.5, 0.0),
            })
            .unwrap();
        service.broadcast_positions();
        assert!(sub.try_recv().is_some());
    }

    // -----------------------------------------------------------------------
    // Chunk-state queries
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn chunk_query_filters_out_of_bounds_silently() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");

        let resp = service
            .chunk_state(ChunkStateRequest {
                username: "ada".into(),
                level: "earth".into(),
                chunks: vec![
                    ChunkCoord { chunk_x: 0, chunk_z: 0 },
                    ChunkCoord { chunk_x: 999_999, chunk_z: 0 },
                    ChunkCoord { chunk_x: 1, chunk_z: -1 },
                ],
            })
            .unwrap();
        assert_eq!(resp.chunks.len(), 2);
        assert!(resp.response_timestamp >= resp.request_timestamp);
    }

    // -----------------------------------------------------------------------
    // Friends
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn friendship_round_trip_with_level_broadcast() {
        let (service, transport) = make_service();
        connect(&service, "earth", "ada");
        connect(&service, "earth", "grace");

        let mut sub = transport.subscribe(&level_topic("earth"));

        let resp = service
            .add_friend(FriendRequest {
                username: "ada".into(),
                level: "earth".into(),
                friend_username: "grace".into(),
            })
            .unwrap();
        assert!(resp.ok);
        assert_eq!(resp.friends, vec!["grace".to_string()]);

        let payload = sub.try_recv().expect("friendship broadcast");
        let msg: Broadcast = serde_json::from_slice(&payload).unwrap();
        assert!(matches!(msg, Broadcast::FriendshipAdded { ref username, .. } if username == "ada"));

        // Duplicate add is acknowledged without a second broadcast.
        let again = service
            .add_friend(FriendRequest {
                username: "ada".into(),
                level: "earth".into(),
                friend_username: "grace".into(),
            })
            .unwrap();
        assert!(again.ok);
        assert_eq!(again.message.as_deref(), Some("already friends"));
        assert!(sub.try_recv().is_none());

        let removed = service
            .remove_friend(FriendRequest {
                username: "ada".into(),
                level: "earth".into(),
                friend_username: "grace".into(),
            })
            .unwrap();
        assert!(removed.ok);
        assert!(removed.friends.is_empty());
        let payload = sub.try_recv().expect("unfriend broadcast");
        let msg: Broadcast = serde_json::from_slice(&payload).unwrap();
        assert!(matches!(msg, Broadcast::FriendshipRemoved { .. }));
    }

    #[tokio::test]
    async fn self_friendship_is_rejected() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");
        let resp = service
            .add_friend(FriendRequest {
                username: "ada".into(),
                level: "earth".into(),
                friend_username: "ada".into(),
            })
            .unwrap();
        assert!(!resp.ok);
    }

    // -----------------------------------------------------------------------
    // Upvotes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn upvote_acks_then_increments_asynchronously() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");
        connect(&service, "earth", "grace");

        let ack = service
            .upvote(UpvoteRequest {
                username: "ada".into(),
                level: "earth".into(),
                builder_username: "grace".into(),
            })
            .unwrap();
        assert!(ack.ok);

        // The mutation is fire-and-forget; give the task a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let record = service.store().player_record("earth", "grace").unwrap().unwrap();
        assert_eq!(record.score, 1);
    }

    #[tokio::test]
    async fn self_and_unknown_upvotes_are_refused() {
        let (service, _) = make_service();
        connect(&service, "earth", "ada");

        let self_vote = service
            .upvote(UpvoteRequest {
                username: "ada".into(),
                level: "earth".into(),
                builder_username: "ada".into(),
            })
            .unwrap();
        assert!(!self_vote.ok);

        let unknown = service
            .upvote(UpvoteRequest {
                username: "ada".into(),
                level: "earth".into(),
                builder_username: "nobody".into(),
            })
            .unwrap();
        assert!(!unknown.ok);
    }

    // -----------------------------------------------------------------------
    // Presence sweep
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn sweep_announces_new_count() {
        let (service, transport) = make_service();
        connect(&service, "earth", "ada");

        let mut sub = transport.subscribe(&level_topic("earth"));

        // Fresh entry: nothing to sweep.
        assert_eq!(service.sweep_presence(), 0);
        assert!(sub.try_recv().is_none());
    }
}
