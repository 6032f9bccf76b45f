//! Instance array and free pool of one actor type.

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    actor::{ActorInstance, InstanceHandle},
    env::Environment,
    error::ResourceError,
};

/// The instances of one actor type and the subset free for allocation.
///
/// Shared checkout peeks at a free instance; exclusive checkout removes it
/// from the free list until [`Population::return_individual`]. All pool
/// operations run under one lock.
pub struct Population {
    actor: String,
    instances: Vec<InstanceHandle>,
    pool: Mutex<FreePool>,
}

struct FreePool {
    /// Zero-based slots of free instances.
    free: Vec<usize>,
    /// Exclusively checked-out flag per slot.
    checked_out: Vec<bool>,
}

impl Population {
    /// Build a population; every instance starts free.
    pub fn new(actor: impl Into<String>, instances: Vec<Arc<dyn ActorInstance>>) -> Self {
        let actor: Arc<str> = Arc::from(actor.into());
        let count = instances.len();
        Self {
            actor: actor.to_string(),
            instances: instances.into_iter().map(|i| InstanceHandle::new(Arc::clone(&actor), i)).collect(),
            pool: Mutex::new(FreePool { free: (0..count).collect(), checked_out: vec![false; count] }),
        }
    }

    /// Actor id.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Population size `N`.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True if `N == 0`.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances currently free.
    pub fn free_count(&self) -> usize {
        self.lock().free.len()
    }

    /// Instance by 1-based index.
    pub fn instance(&self, index: usize) -> Option<&InstanceHandle> {
        index.checked_sub(1).and_then(|slot| self.instances.get(slot))
    }

    /// Every instance, ordered by index.
    pub fn instances(&self) -> &[InstanceHandle] {
        &self.instances
    }

    /// True if the instance with this 1-based index is checked out
    /// exclusively.
    pub fn is_checked_out(&self, index: usize) -> bool {
        index.checked_sub(1).is_some_and(|slot| self.lock().checked_out.get(slot).copied().unwrap_or(false))
    }

    /// Check out the free instance at `position` of the free list.
    pub fn get_free_individual(
        &self,
        position: usize,
        exclusive: bool,
    ) -> Result<InstanceHandle, ResourceError> {
        let mut pool = self.lock();
        self.checkout_locked(&mut pool, position, exclusive)
    }

    /// Check out a free instance picked with the environment's RNG.
    pub fn checkout_random(
        &self,
        env: &dyn Environment,
        exclusive: bool,
    ) -> Result<InstanceHandle, ResourceError> {
        let mut pool = self.lock();
        let position = env.random_index(pool.free.len());
        self.checkout_locked(&mut pool, position, exclusive)
    }

    /// Return an exclusively checked-out instance to the free list.
    pub fn return_individual(&self, handle: &InstanceHandle) -> Result<(), ResourceError> {
        let slot = handle.index().checked_sub(1);
        let owned = handle.actor() == self.actor
            && slot.and_then(|s| self.instances.get(s)).is_some_and(|mine| mine == handle);
        let (true, Some(slot)) = (owned, slot) else {
            return Err(ResourceError::ForeignInstance {
                id: handle.id().to_string(),
                actor: self.actor.clone(),
            });
        };

        let mut pool = self.lock();
        if !pool.checked_out[slot] {
            return Err(ResourceError::NotCheckedOut { id: handle.id().to_string() });
        }
        pool.checked_out[slot] = false;
        pool.free.push(slot);
        Ok(())
    }

    fn checkout_locked(
        &self,
        pool: &mut FreePool,
        position: usize,
        exclusive: bool,
    ) -> Result<InstanceHandle, ResourceError> {
        if pool.free.is_empty() {
            return Err(ResourceError::PoolExhausted { actor: self.actor.clone() });
        }
        if position >= pool.free.len() {
            return Err(ResourceError::PositionOutOfRange {
                actor: self.actor.clone(),
                position,
                free: pool.free.len(),
            });
        }

        let slot = if exclusive {
            let slot = pool.free.remove(position);
            pool.checked_out[slot] = true;
            slot
        } else {
            pool.free[position]
        };
        Ok(self.instances[slot].clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FreePool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{actor::InstanceLifecycle, testing::TokioEnv, value::ActivityObject};

    struct Plain {
        index: usize,
        id: String,
    }

    #[async_trait]
    impl InstanceLifecycle for Plain {}

    impl ActorInstance for Plain {
        fn index(&self) -> usize {
            self.index
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn activity_object(&self) -> ActivityObject {
            Arc::new(())
        }
    }

    fn population(actor: &str, n: usize) -> Population {
        let instances = (1..=n)
            .map(|index| Arc::new(Plain { index, id: format!("{actor}{index}") }) as Arc<dyn ActorInstance>)
            .collect();
        Population::new(actor, instances)
    }

    #[test]
    fn exclusive_checkout_removes_from_pool() {
        let pop = population("A", 3);
        let first = pop.get_free_individual(0, true).unwrap();
        assert_eq!(first.id(), "A1");
        assert_eq!(pop.free_count(), 2);
        assert!(pop.is_checked_out(1));

        // A1 is gone from the free list, so position 0 is now A2.
        assert_eq!(pop.get_free_individual(0, true).unwrap().id(), "A2");
        assert_eq!(pop.free_count(), 1);
    }

    #[test]
    fn shared_checkout_is_a_peek() {
        let pop = population("A", 2);
        let a = pop.get_free_individual(1, false).unwrap();
        let b = pop.get_free_individual(1, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(pop.free_count(), 2);
        assert!(matches!(pop.return_individual(&a), Err(ResourceError::NotCheckedOut { .. })));
    }

    #[test]
    fn exhaustion_and_range_errors() {
        let pop = population("A", 1);
        assert!(matches!(
            pop.get_free_individual(3, false),
            Err(ResourceError::PositionOutOfRange { position: 3, free: 1, .. })
        ));
        pop.get_free_individual(0, true).unwrap();
        assert!(matches!(pop.get_free_individual(0, true), Err(ResourceError::PoolExhausted { .. })));
    }

    #[test]
    fn double_return_is_rejected() {
        let pop = population("A", 2);
        let handle = pop.get_free_individual(0, true).unwrap();
        pop.return_individual(&handle).unwrap();
        assert!(matches!(pop.return_individual(&handle), Err(ResourceError::NotCheckedOut { .. })));
        assert_eq!(pop.free_count(), 2);
    }

    #[test]
    fn foreign_instances_are_rejected() {
        let a = population("A", 1);
        let b = population("B", 1);
        let handle = b.get_free_individual(0, true).unwrap();
        assert!(matches!(a.return_individual(&handle), Err(ResourceError::ForeignInstance { .. })));
    }

    #[test]
    fn random_checkout_draws_from_free_list() {
        let pop = population("A", 5);
        let env = TokioEnv::new(7);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(pop.checkout_random(&env, true).unwrap().index());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert!(pop.checkout_random(&env, true).is_err());
    }

    #[test]
    fn empty_population() {
        let pop = population("A", 0);
        assert!(pop.is_empty());
        assert!(pop.instance(1).is_none());
        assert!(matches!(pop.get_free_individual(0, false), Err(ResourceError::PoolExhausted { .. })));
    }
}
