//! Loading engine: row materialization and relationship resolution.
//!
//! # Responsibility
//! - Turn stored rows into entity instances, reusing tracked instances.
//! - Resolve include paths in single-query (one combined join) or split
//!   (one round trip per relation per level) mode.
//! - Load one relation for a set of parents, used by eager, explicit and
//!   lazy loading alike.
//!
//! # Invariants
//! - Within one query a (kind, id) is materialized once.
//! - Tracking queries never replace an instance already in the identity map.
//! - A resolved collection is merged into, never overwritten.
//! - Loading a collection resolves the still-unresolved inverse reference
//!   of each loaded child (tracking loads only).

pub(crate) mod dispatch;

use crate::error::{OrmResult, StoreError};
use crate::model::entity::{AnyRef, EntityKey};
use crate::model::relation::{Link, Relation};
use crate::model::value::{EntityId, EntityKind, Value};
use crate::query::expr::IncludePath;
use crate::session::Session;
use crate::store::{QueryPlan, ReadRequest, RelatedRead, Row, Selection};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Builds entity instances for one query or load call.
pub(crate) struct Materializer {
    tracking: bool,
    seen: HashMap<EntityKey, AnyRef>,
}

impl Materializer {
    pub(crate) fn new(tracking: bool) -> Self {
        Self {
            tracking,
            seen: HashMap::new(),
        }
    }

    /// Instance for `row` of `kind`.
    ///
    /// Tracking: the identity-map instance when present, otherwise a new one
    /// registered with an `Unchanged` snapshot. Stored values never
    /// overwrite a tracked instance.
    pub(crate) fn materialize(
        &mut self,
        session: &mut Session,
        kind: EntityKind,
        row: &[Value],
    ) -> OrmResult<AnyRef> {
        let id = row_id(kind, row)?;
        let key = EntityKey::new(kind, id);
        if let Some(existing) = self.seen.get(&key) {
            return Ok(existing.clone());
        }

        let entity = if self.tracking {
            match session.identity_map.get(kind, id) {
                Some(existing) => existing.clone(),
                None => {
                    let entity = AnyRef::from_row(kind, row)?;
                    session.identity_map.register(&entity)?;
                    session.tracker.track_unchanged(key, entity.values());
                    entity
                }
            }
        } else {
            AnyRef::from_row(kind, row)?
        };

        self.seen.insert(key, entity.clone());
        Ok(entity)
    }
}

fn row_id(kind: EntityKind, row: &[Value]) -> OrmResult<EntityId> {
    let id = row
        .first()
        .ok_or_else(|| StoreError::InvalidData(format!("empty {} row", kind.table())))?
        .expect_id(&format!("{}.id", kind.table()))?;
    Ok(id)
}

/// Include paths merged into a tree, first-level relations in request order.
#[derive(Debug, Default)]
struct IncludeTree {
    children: Vec<(Relation, IncludeTree)>,
}

impl IncludeTree {
    fn from_paths(paths: &[IncludePath]) -> Self {
        let mut root = Self::default();
        for path in paths {
            let mut node = &mut root;
            for step in path.steps() {
                node = node.child(*step);
            }
        }
        root
    }

    fn child(&mut self, relation: Relation) -> &mut IncludeTree {
        let index = match self
            .children
            .iter()
            .position(|(existing, _)| *existing == relation)
        {
            Some(index) => index,
            None => {
                self.children.push((relation, IncludeTree::default()));
                self.children.len() - 1
            }
        };
        &mut self.children[index].1
    }
}

/// Runs an entity query and resolves its include paths.
///
/// `plan.selection` is replaced by the entity selection for the mode.
pub(crate) fn fetch(
    session: &mut Session,
    mut plan: QueryPlan,
    includes: &[IncludePath],
    tracking: bool,
    split: bool,
) -> OrmResult<Vec<AnyRef>> {
    let tree = IncludeTree::from_paths(includes);
    let mut materializer = Materializer::new(tracking);
    let root = plan.root;

    if split || tree.children.is_empty() {
        plan.selection = Selection::Entities { joins: Vec::new() };
        let rows = read(session, ReadRequest::Query(plan))?;
        let mut roots = Vec::with_capacity(rows.len());
        for row in &rows {
            roots.push(materializer.materialize(session, root, row)?);
        }
        load_tree(session, &mut materializer, &roots, &tree)?;
        return Ok(roots);
    }

    let joins = tree
        .children
        .iter()
        .map(|(relation, _)| *relation)
        .collect::<Vec<_>>();
    plan.selection = Selection::Entities {
        joins: joins.clone(),
    };
    let rows = read(session, ReadRequest::Query(plan))?;

    let mut roots: Vec<AnyRef> = Vec::new();
    let mut root_keys = HashSet::new();
    let mut found: HashMap<(EntityKey, Relation), Vec<AnyRef>> = HashMap::new();
    for row in &rows {
        let mut offset = root.columns().len();
        let entity = materializer.materialize(session, root, slice(row, 0, offset)?)?;
        if root_keys.insert(entity.key()) {
            roots.push(entity.clone());
        }

        for relation in &joins {
            let width = relation.target().columns().len();
            let columns = slice(row, offset, width)?;
            offset += width;
            // Left join without a match.
            if columns[0].is_null() {
                continue;
            }
            let target = materializer.materialize(session, relation.target(), columns)?;
            let bucket = found.entry((entity.key(), *relation)).or_default();
            if !bucket.iter().any(|member| member.ptr_eq(&target)) {
                bucket.push(target);
            }
        }
    }

    for (relation, subtree) in &tree.children {
        let mut level = Vec::new();
        let mut distinct = HashSet::new();
        for parent in &roots {
            let members = found
                .get(&(parent.key(), *relation))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            attach_loaded(session, &materializer, parent, *relation, members)?;
            for member in members {
                if distinct.insert(member.key()) {
                    level.push(member.clone());
                }
            }
        }
        load_tree(session, &mut materializer, &level, subtree)?;
    }

    Ok(roots)
}

fn slice(row: &[Value], offset: usize, width: usize) -> OrmResult<&[Value]> {
    row.get(offset..offset + width).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "joined row has {} columns, expected at least {}",
            row.len(),
            offset + width
        ))
        .into()
    })
}

fn load_tree(
    session: &mut Session,
    materializer: &mut Materializer,
    parents: &[AnyRef],
    tree: &IncludeTree,
) -> OrmResult<()> {
    for (relation, subtree) in &tree.children {
        let loaded = load_relation(session, materializer, parents, *relation)?;
        load_tree(session, materializer, &loaded, subtree)?;
    }
    Ok(())
}

/// Loads `relation` for every parent in one round trip and resolves it on
/// each of them, with an empty value when nothing matched.
///
/// Returns the distinct loaded targets in storage order.
pub(crate) fn load_relation(
    session: &mut Session,
    materializer: &mut Materializer,
    parents: &[AnyRef],
    relation: Relation,
) -> OrmResult<Vec<AnyRef>> {
    if parents.is_empty() {
        return Ok(Vec::new());
    }

    let mut source_ids = Vec::with_capacity(parents.len());
    let mut requested = BTreeSet::new();
    for parent in parents {
        if requested.insert(parent.id()) {
            source_ids.push(parent.id());
        }
    }
    let rows = read(
        session,
        ReadRequest::Related(RelatedRead {
            relation,
            source_ids,
        }),
    )?;

    let target_kind = relation.target();
    let width = target_kind.columns().len();
    let mut targets = Vec::new();
    let mut distinct = HashSet::new();
    let mut grouped: HashMap<EntityId, Vec<AnyRef>> = HashMap::new();
    for row in &rows {
        if row.len() != width + 1 {
            return Err(StoreError::InvalidData(format!(
                "{relation} row has {} columns, expected {}",
                row.len(),
                width + 1
            ))
            .into());
        }
        let source_id = row[0].expect_id("source_id")?;
        let target = materializer.materialize(session, target_kind, &row[1..])?;
        if distinct.insert(target.key()) {
            targets.push(target.clone());
        }
        let bucket = grouped.entry(source_id).or_default();
        if !bucket.iter().any(|member| member.ptr_eq(&target)) {
            bucket.push(target);
        }
    }

    for parent in parents {
        let members = grouped
            .get(&parent.id())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        attach_loaded(session, materializer, parent, relation, members)?;
    }

    Ok(targets)
}

fn attach_loaded(
    session: &mut Session,
    materializer: &Materializer,
    parent: &AnyRef,
    relation: Relation,
    members: &[AnyRef],
) -> OrmResult<()> {
    dispatch::resolve(parent, relation, members)?;
    if !materializer.tracking {
        return Ok(());
    }

    if relation.is_tracked_collection() && session.identity_map.holds(parent) {
        session
            .tracker
            .snapshot_collection(&parent.key(), relation, members.iter().map(AnyRef::id));
    }

    if let Link::TargetColumn(_) = relation.link() {
        let inverse = relation.inverse();
        for child in members {
            if !dispatch::is_resolved(child, inverse) {
                dispatch::resolve(child, inverse, std::slice::from_ref(parent))?;
            }
        }
    }
    Ok(())
}

fn read(session: &mut Session, request: ReadRequest) -> OrmResult<Vec<Row>> {
    let rows = session.gateway.read(session.backend.as_ref(), &request)?;
    Ok(rows)
}
