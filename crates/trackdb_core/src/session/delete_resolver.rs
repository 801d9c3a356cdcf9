//! Delete closure under the model's delete policies.
//!
//! # Responsibility
//! - Expand staged deletes with cascade dependents read from storage.
//! - Reject the commit when a restrict dependent would be left behind.
//!
//! # Invariants
//! - Runs inside the commit transaction; reads observe its state.
//! - One storage read per ownership relation per level; each (kind, id)
//!   is expanded at most once.

use crate::error::{ConstraintViolation, OrmResult, StoreError};
use crate::model::entity::EntityKey;
use crate::model::relation::{DeletePolicy, Model, Relation};
use crate::model::value::{EntityId, EntityKind};
use crate::session::gateway::Gateway;
use crate::store::{BackendTransaction, ReadRequest, RelatedRead};
use log::{debug, error};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Returns `roots` plus every cascade dependent, transitively.
///
/// # Errors
/// - `RestrictedDelete` when a restrict dependent is not itself deleted.
pub(crate) fn resolve(
    gateway: &mut Gateway,
    tx: &mut dyn BackendTransaction,
    model: &Model,
    roots: &[EntityKey],
) -> OrmResult<BTreeSet<EntityKey>> {
    let started_at = Instant::now();
    let mut visited = roots.iter().copied().collect::<BTreeSet<_>>();
    let mut frontier = visited.iter().copied().collect::<Vec<_>>();
    let mut restricted: Vec<(EntityKey, Relation, EntityKey)> = Vec::new();
    let mut levels = 0usize;

    while !frontier.is_empty() {
        levels += 1;
        let mut by_kind: BTreeMap<EntityKind, Vec<EntityId>> = BTreeMap::new();
        for key in &frontier {
            by_kind.entry(key.kind).or_default().push(key.id);
        }

        let mut next = Vec::new();
        for (kind, ids) in by_kind {
            for (relation, policy) in model.ownerships(kind) {
                let rows = gateway.read_in(
                    &mut *tx,
                    &ReadRequest::Related(RelatedRead {
                        relation,
                        source_ids: ids.clone(),
                    }),
                )?;
                for row in rows {
                    if row.len() < 2 {
                        return Err(StoreError::InvalidData(format!(
                            "{relation} row has {} columns",
                            row.len()
                        ))
                        .into());
                    }
                    let owner = EntityKey::new(kind, row[0].expect_id("source_id")?);
                    let dependent =
                        EntityKey::new(relation.target(), row[1].expect_id("target id")?);
                    match policy {
                        DeletePolicy::Cascade => {
                            if visited.insert(dependent) {
                                next.push(dependent);
                            }
                        }
                        DeletePolicy::Restrict => restricted.push((owner, relation, dependent)),
                    }
                }
            }
        }
        frontier = next;
    }

    let mut blocked: BTreeMap<(EntityKey, Relation), usize> = BTreeMap::new();
    for (owner, relation, dependent) in restricted {
        if !visited.contains(&dependent) {
            *blocked.entry((owner, relation)).or_default() += 1;
        }
    }
    if let Some(((owner, relation), dependents)) = blocked.into_iter().next() {
        error!(
            "event=delete_resolve module=session status=error owner={} relation={} dependents={} duration_ms={}",
            owner,
            relation,
            dependents,
            started_at.elapsed().as_millis()
        );
        return Err(ConstraintViolation::RestrictedDelete {
            owner: owner.kind,
            owner_id: owner.id,
            relation,
            dependents,
        }
        .into());
    }

    debug!(
        "event=delete_resolve module=session status=ok roots={} deleted={} levels={} duration_ms={}",
        roots.len(),
        visited.len(),
        levels,
        started_at.elapsed().as_millis()
    );
    Ok(visited)
}

/// Ownership relation whose dependents are of `kind`.
pub(crate) fn owning_relation(kind: EntityKind) -> Option<Relation> {
    Relation::ALL
        .into_iter()
        .find(|relation| relation.is_ownership() && relation.target() == kind)
}
