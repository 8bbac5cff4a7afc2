//! Load-balancing strategies.
//!
//! A balancer is a pure selection strategy over the candidate set the
//! service hands it — it holds no instance state of its own, so services
//! can swap strategies without rewiring.

use std::rc::Rc;

use rand::Rng;

use gridsim_core::{Instance, SimContext};

/// Selects one instance among the ACTIVE candidates, or `None` when the
/// set is empty (the caller reports CONNECTION_REFUSED).
pub trait LoadBalancer {
    fn select(&self, candidates: &[Rc<dyn Instance>]) -> Option<Rc<dyn Instance>>;
}

/// Uniform-random selection, drawn from the run's seeded RNG so routing
/// replays deterministically.
pub struct RandomLoadBalancer {
    ctx: SimContext,
}

impl RandomLoadBalancer {
    pub fn new(ctx: &SimContext) -> Self {
        RandomLoadBalancer { ctx: ctx.clone() }
    }
}

impl LoadBalancer for RandomLoadBalancer {
    fn select(&self, candidates: &[Rc<dyn Instance>]) -> Option<Rc<dyn Instance>> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.ctx.with_rng(|rng| rng.gen_range(0..candidates.len()));
        Some(Rc::clone(&candidates[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsim_core::{Component, InstanceStatus, RequestRef};

    struct FakeInstance {
        name: String,
    }

    impl Component for FakeInstance {
        fn name(&self) -> &str {
            &self.name
        }
        fn recv_request(&self, _h: &str, _e: &str, _rc: RequestRef) {}
    }

    impl Instance for FakeInstance {
        fn status(&self) -> InstanceStatus {
            InstanceStatus::Active
        }
        fn terminate(&self) {}
    }

    fn candidates(n: usize) -> Vec<Rc<dyn Instance>> {
        (0..n)
            .map(|i| {
                Rc::new(FakeInstance {
                    name: format!("inst-{i}"),
                }) as Rc<dyn Instance>
            })
            .collect()
    }

    #[test]
    fn empty_candidate_set_yields_none() {
        let ctx = SimContext::new(0);
        let lb = RandomLoadBalancer::new(&ctx);
        assert!(lb.select(&candidates(0)).is_none());
    }

    #[test]
    fn selection_stays_within_the_set() {
        let ctx = SimContext::new(0);
        let lb = RandomLoadBalancer::new(&ctx);
        let set = candidates(3);
        for _ in 0..50 {
            let picked = lb.select(&set).unwrap();
            assert!(set.iter().any(|c| c.name() == picked.name()));
        }
    }

    #[test]
    fn same_seed_picks_the_same_sequence() {
        let picks = |seed: u64| -> Vec<String> {
            let ctx = SimContext::new(seed);
            let lb = RandomLoadBalancer::new(&ctx);
            let set = candidates(5);
            (0..10)
                .map(|_| lb.select(&set).unwrap().name().to_string())
                .collect()
        };
        assert_eq!(picks(7), picks(7));
    }
}
