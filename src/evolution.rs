//! The situation evolution store.
//!
//! Owns every `SituationInstance`, keyed by node id. The store is built
//! by the model loader and mutated only by the reasoner inside a
//! reasoning cycle.

use std::collections::BTreeMap;

use crate::instance::{InstanceKind, SituationInstance};
use crate::time::SimTime;

/// Id-keyed store of situation instances.
#[derive(Debug, Clone, Default)]
pub struct SituationEvolution {
    instances: BTreeMap<i64, SituationInstance>,
}

impl SituationEvolution {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance for node `id`.
    ///
    /// Idempotent by id: re-registering keeps the existing state and
    /// counter but takes the new duration and cycle.
    pub fn add_instance(
        &mut self,
        id: i64,
        kind: InstanceKind,
        duration: SimTime,
        cycle: Option<SimTime>,
    ) {
        self.instances
            .entry(id)
            .and_modify(|instance| {
                instance.duration = duration;
                instance.cycle = cycle;
            })
            .or_insert_with(|| SituationInstance::new(id, kind, duration, cycle));
    }

    /// Looks up an instance.
    #[must_use]
    pub fn instance(&self, id: i64) -> Option<&SituationInstance> {
        self.instances.get(&id)
    }

    /// Looks up an instance mutably.
    #[must_use]
    pub fn instance_mut(&mut self, id: i64) -> Option<&mut SituationInstance> {
        self.instances.get_mut(&id)
    }

    /// All instances in id order.
    pub fn instances(&self) -> impl Iterator<Item = &SituationInstance> {
        self.instances.values()
    }

    /// All instances in id order, mutably.
    pub fn instances_mut(&mut self) -> impl Iterator<Item = &mut SituationInstance> {
        self.instances.values_mut()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::InstanceState;

    #[test]
    fn test_add_and_lookup() {
        let mut store = SituationEvolution::new();
        store.add_instance(1, InstanceKind::Normal, SimTime::from_secs(10.0), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.instance(1).unwrap().state, InstanceState::Untriggered);
        assert!(store.instance(2).is_none());
    }

    #[test]
    fn test_add_instance_idempotent_last_write_wins() {
        let mut store = SituationEvolution::new();
        store.add_instance(1, InstanceKind::Normal, SimTime::from_secs(10.0), None);
        store.instance_mut(1).unwrap().counter = 3;

        store.add_instance(
            1,
            InstanceKind::Normal,
            SimTime::from_secs(20.0),
            Some(SimTime::from_secs(5.0)),
        );
        let instance = store.instance(1).unwrap();
        // state survives, timing is replaced
        assert_eq!(instance.counter, 3);
        assert_eq!(instance.duration, SimTime::from_secs(20.0));
        assert_eq!(instance.cycle, Some(SimTime::from_secs(5.0)));
    }

    #[test]
    fn test_iteration_in_id_order() {
        let mut store = SituationEvolution::new();
        store.add_instance(3, InstanceKind::Normal, SimTime::ZERO, None);
        store.add_instance(1, InstanceKind::Hidden, SimTime::ZERO, None);
        store.add_instance(2, InstanceKind::Normal, SimTime::ZERO, None);
        let ids: Vec<i64> = store.instances().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
