//! Weighted round-robin routing handler (§4.6).
//!
//! Maps destination daemon type to an ordered set of `(client, weight)` entries and hands out
//! selections using the classical smooth WRR algorithm (the same "current weight climbs by its
//! static weight each round, winner drops by the total" scheme nginx and LVS use), so a burst
//! of equal-weight clients doesn't get served in unbroken runs.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::asn1::Endpoint;

struct Entry<C> {
    endpoint: Endpoint,
    client: Arc<C>,
    weight: i64,
    current: i64,
}

/// Destination-type keyed WRR table. Guarded by a single `RwLock` shared with the session's
/// client table, per §4.6 "Thread-safety": `remove_node` during a `get` must never hand back a
/// dangling entry, which a single lock across both tables gives for free.
pub struct RoutingHandler<C> {
    tables: RwLock<HashMap<String, Vec<Entry<C>>>>,
}

impl<C> RoutingHandler<C> {
    pub fn new() -> RoutingHandler<C> {
        RoutingHandler { tables: RwLock::new(HashMap::new()) }
    }

    pub fn add_node(&self, dest_type: impl Into<String>, endpoint: Endpoint, client: Arc<C>, weight: i64) {
        let mut tables = self.tables.write().unwrap();
        let bucket = tables.entry(dest_type.into()).or_default();
        bucket.retain(|e| e.endpoint != endpoint);
        bucket.push(Entry { endpoint, client, weight, current: 0 });
    }

    pub fn remove_node(&self, dest_type: &str, endpoint: &Endpoint) {
        let mut tables = self.tables.write().unwrap();
        if let Some(bucket) = tables.get_mut(dest_type) {
            bucket.retain(|e| &e.endpoint != endpoint);
        }
    }

    /// Rebind an existing entry's weight (e.g. after heartbeat recovery), preserving its
    /// position and resetting its smoothing counter so the cycle doesn't carry stale bias.
    pub fn update_client(&self, dest_type: &str, endpoint: &Endpoint, weight: i64) {
        let mut tables = self.tables.write().unwrap();
        if let Some(bucket) = tables.get_mut(dest_type) {
            if let Some(entry) = bucket.iter_mut().find(|e| &e.endpoint == endpoint) {
                entry.weight = weight;
                entry.current = 0;
            }
        }
    }

    /// Advance the WRR cursor for `dest_type` and return the selected client, or `None` if
    /// every entry has weight 0 (or the type is unknown).
    pub fn get(&self, dest_type: &str) -> Option<Arc<C>> {
        let mut tables = self.tables.write().unwrap();
        let bucket = tables.get_mut(dest_type)?;
        select_smooth_wrr(bucket)
    }
}

impl<C> Default for RoutingHandler<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn select_smooth_wrr<C>(bucket: &mut [Entry<C>]) -> Option<Arc<C>> {
    let total: i64 = bucket.iter().map(|e| e.weight).sum();
    if total <= 0 {
        return None;
    }

    for entry in bucket.iter_mut() {
        entry.current += entry.weight;
    }

    let winner_index = bucket
        .iter()
        .enumerate()
        .filter(|(_, e)| e.weight > 0)
        .max_by_key(|(_, e)| e.current)
        .map(|(i, _)| i)?;

    bucket[winner_index].current -= total;
    Some(bucket[winner_index].client.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClient(u32);

    /// Scenario 3 from §8: weights 3,1,2 over six selections must be a permutation of
    /// (c1,c1,c1,c2,c3,c3) respecting WRR smoothness.
    #[test]
    fn test_wrr_over_three_matches_weight_distribution() {
        let handler: RoutingHandler<FakeClient> = RoutingHandler::new();
        let c1 = Endpoint::new("svc", "c1");
        let c2 = Endpoint::new("svc", "c2");
        let c3 = Endpoint::new("svc", "c3");
        handler.add_node("svc", c1.clone(), Arc::new(FakeClient(1)), 3);
        handler.add_node("svc", c2.clone(), Arc::new(FakeClient(2)), 1);
        handler.add_node("svc", c3.clone(), Arc::new(FakeClient(3)), 2);

        let mut counts = HashMap::new();
        for _ in 0..6 {
            let picked = handler.get("svc").unwrap();
            *counts.entry(picked.0).or_insert(0) += 1;
        }

        assert_eq!(counts.get(&1), Some(&3));
        assert_eq!(counts.get(&2), Some(&1));
        assert_eq!(counts.get(&3), Some(&2));
    }

    #[test]
    fn test_zero_weight_never_selected_and_updates_take_effect() {
        let handler: RoutingHandler<FakeClient> = RoutingHandler::new();
        let c1 = Endpoint::new("svc", "c1");
        let c2 = Endpoint::new("svc", "c2");
        handler.add_node("svc", c1.clone(), Arc::new(FakeClient(1)), 1);
        handler.add_node("svc", c2.clone(), Arc::new(FakeClient(2)), 1);

        handler.update_client("svc", &c2, 0);

        for _ in 0..10 {
            let picked = handler.get("svc").unwrap();
            assert_eq!(picked.0, 1);
        }
    }

    #[test]
    fn test_all_zero_weight_returns_none() {
        let handler: RoutingHandler<FakeClient> = RoutingHandler::new();
        let c1 = Endpoint::new("svc", "c1");
        handler.add_node("svc", c1, Arc::new(FakeClient(1)), 0);
        assert!(handler.get("svc").is_none());
    }
}
