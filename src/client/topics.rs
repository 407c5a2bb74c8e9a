//! Topic registry — table-driven dispatch of incoming broadcasts.
//!
//! Routes are data, not closures: each subscribed topic maps to a
//! [`Route`] descriptor, and [`TopicRegistry::dispatch`] pairs the decoded
//! payload with its route. Messages on unregistered topics (late arrivals
//! after an unsubscribe) are dropped with a debug log.

use crate::protocol::Broadcast;
use std::collections::HashMap;

/// Where a topic's traffic belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Regional block/position traffic.
    Region { region_x: i32, region_z: i32 },
    /// Level-wide friendship/count traffic.
    Level { level: String },
}

#[derive(Default)]
pub struct TopicRegistry {
    routes: HashMap<String, Route>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, topic: &str, route: Route) {
        self.routes.insert(topic.to_string(), route);
    }

    pub fn unregister(&mut self, topic: &str) -> Option<Route> {
        self.routes.remove(topic)
    }

    pub fn route(&self, topic: &str) -> Option<&Route> {
        self.routes.get(topic)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Decode a payload and pair it with the topic's route.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Option<(Route, Broadcast)> {
        let route = match self.routes.get(topic) {
            Some(r) => r.clone(),
            None => {
                log::debug!("dropping message on unregistered topic {}", topic);
                return None;
            }
        };
        match serde_json::from_slice::<Broadcast>(payload) {
            Ok(msg) => Some((route, msg)),
            Err(e) => {
                log::warn!("bad payload on {}: {}", topic, e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::region_topic;

    #[test]
    fn dispatch_requires_registration() {
        let mut reg = TopicRegistry::new();
        let topic = region_topic("earth", 0, 0);
        let payload = serde_json::to_vec(&Broadcast::PlayerCountUpdate {
            level: "earth".into(),
            count: 3,
        })
        .unwrap();

        assert!(reg.dispatch(&topic, &payload).is_none());

        reg.register(&topic, Route::Region {
            region_x: 0,
            region_z: 0,
        });
        let (route, msg) = reg.dispatch(&topic, &payload).unwrap();
        assert_eq!(route, Route::Region { region_x: 0, region_z: 0 });
        assert!(matches!(msg, Broadcast::PlayerCountUpdate { count: 3, .. }));

        reg.unregister(&topic);
        assert!(reg.dispatch(&topic, &payload).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn bad_json_is_dropped() {
        let mut reg = TopicRegistry::new();
        reg.register("game:earth", Route::Level {
            level: "earth".into(),
        });
        assert!(reg.dispatch("game:earth", b"not json").is_none());
    }
}
