#![forbid(unsafe_code)]

//! Fractional sort keys for orderable sibling lists.
//!
//! Values stay strictly increasing in list order with at least
//! `minimal_delta` between neighbours. Appends land one `target_delta` above
//! the current maximum, reorders only move the siblings that actually break the
//! spacing, and a full rebalance spreads the list evenly across a power-of-two
//! capacity window when the values drift too far from the base.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderPolicy {
    /// Value given to the first sibling of an empty list.
    pub base_value: f64,
    /// Nominal spacing between consecutive siblings.
    pub target_delta: f64,
    pub minimal_delta: f64,
    /// Jitter amplitude as a fraction of the spacing it perturbs.
    pub jitter_ratio: f64,
    /// Rebalance once values leave `acceptable_multiple` nominal windows.
    pub acceptable_multiple: f64,
    pub capacity_floor: usize,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            base_value: 0.0,
            target_delta: 1.0,
            minimal_delta: 0.001,
            jitter_ratio: 0.1,
            acceptable_multiple: 8.0,
            capacity_floor: 8,
        }
    }
}

impl OrderPolicy {
    pub fn validate(&self) -> Result<(), OrderError> {
        let finite = [
            self.base_value,
            self.target_delta,
            self.minimal_delta,
            self.jitter_ratio,
            self.acceptable_multiple,
        ];
        if finite.iter().any(|v| !v.is_finite()) {
            return Err(OrderError::InvalidPolicy("values must be finite"));
        }
        if self.target_delta <= 0.0 || self.minimal_delta <= 0.0 {
            return Err(OrderError::InvalidPolicy("deltas must be positive"));
        }
        if !(0.0..=0.25).contains(&self.jitter_ratio) {
            return Err(OrderError::InvalidPolicy("jitter_ratio must be within 0..=0.25"));
        }
        // Two jittered neighbours must still be at least minimal_delta apart.
        if self.minimal_delta > self.target_delta * (1.0 - 2.0 * self.jitter_ratio) {
            return Err(OrderError::InvalidPolicy(
                "minimal_delta does not fit inside a jittered target_delta",
            ));
        }
        if self.acceptable_multiple < 1.0 {
            return Err(OrderError::InvalidPolicy("acceptable_multiple must be >= 1"));
        }
        if self.capacity_floor == 0 {
            return Err(OrderError::InvalidPolicy("capacity_floor must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("invalid order policy: {0}")]
    InvalidPolicy(&'static str),
    #[error(
        "order values at {index} break spacing: {previous} then {value} (minimal delta {minimal_delta})"
    )]
    GapViolated {
        index: usize,
        previous: f64,
        value: f64,
        minimal_delta: f64,
    },
    #[error("order value at {index} is not finite")]
    NotFinite { index: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderValueManager {
    policy: OrderPolicy,
}

impl Default for OrderValueManager {
    fn default() -> Self {
        Self {
            policy: OrderPolicy::default(),
        }
    }
}

impl OrderValueManager {
    pub fn new(policy: OrderPolicy) -> Result<Self, OrderError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// Order value for a sibling appended after `siblings`.
    pub fn append_value<R: Rng + ?Sized>(&self, siblings: &[f64], rng: &mut R) -> f64 {
        let max = siblings
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));
        match max {
            None => self.policy.base_value,
            Some(max) => {
                max + self.policy.target_delta + self.jitter(self.policy.target_delta, rng)
            }
        }
    }

    /// `(capacity, width)` of the nominal window for `len` siblings.
    pub fn window(&self, len: usize) -> (usize, f64) {
        let capacity = len.next_power_of_two().max(self.policy.capacity_floor);
        (capacity, capacity as f64 * self.policy.target_delta)
    }

    /// Whether the list has drifted outside the acceptable bound.
    pub fn needs_rebalance(&self, orders: &[f64]) -> bool {
        if orders.is_empty() {
            return false;
        }
        let (_, width) = self.window(orders.len());
        let reach = self.policy.acceptable_multiple * width;
        let lo = self.policy.base_value - reach;
        let hi = self.policy.base_value + reach;
        orders.iter().any(|v| !v.is_finite() || *v < lo || *v > hi)
    }

    /// Spreads every sibling evenly across the window when `forced` or when the
    /// list has drifted. Returns the indices that received a new value.
    pub fn rebalance<R: Rng + ?Sized>(
        &self,
        orders: &mut [f64],
        forced: bool,
        rng: &mut R,
    ) -> Result<Vec<usize>, OrderError> {
        if orders.is_empty() || !(forced || self.needs_rebalance(orders)) {
            return Ok(Vec::new());
        }
        let (_, width) = self.window(orders.len());
        let step = width / orders.len() as f64;
        for (i, value) in orders.iter_mut().enumerate() {
            *value = self.policy.base_value + step * i as f64 + self.jitter(step, rng);
        }
        self.validate(orders)?;
        Ok((0..orders.len()).collect())
    }

    /// Repairs spacing after the user moved siblings into a new sequence.
    ///
    /// Walks the list once. A sibling keeps its value unless it crowds the
    /// previous one or sits above both of its next two neighbours; in that case
    /// it is centred between the previous sibling and the first following
    /// neighbour that leaves room. When no room is left the whole list is
    /// rebalanced. The result is re-validated and a failure is a logic error.
    pub fn adjust_after_reorder<R: Rng + ?Sized>(
        &self,
        orders: &mut [f64],
        rng: &mut R,
    ) -> Result<Vec<usize>, OrderError> {
        let min = self.policy.minimal_delta;
        let mut changed = Vec::new();

        for index in 0..orders.len() {
            let lower = index.checked_sub(1).map(|i| orders[i]);
            let next = orders.get(index + 1).copied();
            let after_next = orders.get(index + 2).copied();
            if !self.misplaced(lower, orders[index], next, after_next) {
                continue;
            }

            let upper = [next, after_next].into_iter().flatten().find(|v| {
                v.is_finite()
                    && match lower {
                        Some(lower) => *v - lower >= min,
                        None => true,
                    }
            });
            let value = match (lower, upper) {
                (Some(lower), Some(upper)) => {
                    if upper - lower < 2.0 * min {
                        tracing::debug!(
                            target: "arbor::order",
                            index,
                            lower,
                            upper,
                            "no room between neighbours, rebalancing"
                        );
                        return self.rebalance(orders, true, rng);
                    }
                    lower + (upper - lower) / 2.0
                }
                (Some(lower), None) => lower + self.policy.target_delta,
                (None, Some(upper)) => upper - self.policy.target_delta,
                (None, None) => self.policy.base_value,
            };
            orders[index] = value;
            changed.push(index);
        }

        self.validate(orders)?;
        Ok(changed)
    }

    pub fn validate(&self, orders: &[f64]) -> Result<(), OrderError> {
        for (index, value) in orders.iter().enumerate() {
            if !value.is_finite() {
                return Err(OrderError::NotFinite { index });
            }
        }
        for (index, pair) in orders.windows(2).enumerate() {
            let (previous, value) = (pair[0], pair[1]);
            if value - previous < self.policy.minimal_delta {
                return Err(OrderError::GapViolated {
                    index: index + 1,
                    previous,
                    value,
                    minimal_delta: self.policy.minimal_delta,
                });
            }
        }
        Ok(())
    }

    fn misplaced(
        &self,
        lower: Option<f64>,
        current: f64,
        next: Option<f64>,
        after_next: Option<f64>,
    ) -> bool {
        let min = self.policy.minimal_delta;
        if !current.is_finite() {
            return true;
        }
        if lower.is_some_and(|lower| current - lower < min) {
            return true;
        }
        let crowds = |neighbour: f64| neighbour - current < min;
        // Only move `current` when it is out of place against both lookahead
        // neighbours; otherwise a later sibling is the one that moved.
        match (next, after_next) {
            (Some(next), Some(after_next)) => crowds(next) && crowds(after_next),
            _ => false,
        }
    }

    fn jitter<R: Rng + ?Sized>(&self, scale: f64, rng: &mut R) -> f64 {
        let spread = scale * self.policy.jitter_ratio;
        if spread > 0.0 {
            rng.gen_range(-spread..=spread)
        } else {
            0.0
        }
    }
}
