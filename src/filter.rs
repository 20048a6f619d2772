//! Pure derivation of the displayed incident subset.
//!
//! The engine runs every store result through [`select`], so a store that
//! filters remotely and one that returns everything produce the same view.

use crate::model::{EventFilter, Incident};

/// Active incidents admitted by `filter`, in input order.
#[must_use]
pub fn select(events: &[Incident], filter: &EventFilter) -> Vec<Incident> {
    events
        .iter()
        .filter(|e| e.is_active && filter.admits(&e.event_type))
        .cloned()
        .collect()
}
