/// Pairwise operational transformation
///
/// `transform(client, server)` returns `(client', server')` such that applying
/// `client'` after `server` yields the same content as applying `server'` after
/// `client`, when both were produced against the same revision.
///
/// Text positions and array indices share one set of index rules; only the
/// payload differs. A range that ends up split around concurrently inserted or
/// moved content becomes an `OperationKind::Compound` of two deletes, highest
/// range first.
use tracing::debug;

use crate::{
    first_writer_wins, last_writer_wins, precedes, DocumentType, Operation, OperationKind,
    Result, Winner,
};

/// Transform two concurrent operations against each other
pub fn transform(
    client: &Operation,
    server: &Operation,
    doc_type: DocumentType,
) -> Result<(Operation, Operation)> {
    client.kind.validate_family(doc_type)?;
    server.kind.validate_family(doc_type)?;

    let (client_kind, server_kind) = transform_kinds(&client.kind, client, &server.kind, server);
    Ok((client.with_kind(client_kind), server.with_kind(server_kind)))
}

/// Fold `op` through already-committed operations, in commit order
pub fn transform_through<'a, I>(op: &Operation, committed: I, doc_type: DocumentType) -> Result<Operation>
where
    I: IntoIterator<Item = &'a Operation>,
{
    committed
        .into_iter()
        .try_fold(op.clone(), |current, server| {
            transform(&current, server, doc_type).map(|(client, _)| client)
        })
}

fn transform_kinds(
    a: &OperationKind,
    a_meta: &Operation,
    b: &OperationKind,
    b_meta: &Operation,
) -> (OperationKind, OperationKind) {
    use OperationKind::*;

    match (a, b) {
        (Retain, _) | (_, Retain) => (a.clone(), b.clone()),

        (Compound { parts }, _) => {
            let mut other = b.clone();
            let mut transformed = Vec::with_capacity(parts.len());
            for part in parts {
                let (part, next) = transform_kinds(part, a_meta, &other, b_meta);
                transformed.push(part);
                other = next;
            }
            (compound(transformed), other)
        }

        (_, Compound { parts }) => {
            let mut other = a.clone();
            let mut transformed = Vec::with_capacity(parts.len());
            for part in parts {
                let (next, part) = transform_kinds(&other, a_meta, part, b_meta);
                transformed.push(part);
                other = next;
            }
            (other, compound(transformed))
        }

        (Insert { .. }, Insert { .. }) | (ArrayInsert { .. }, ArrayInsert { .. }) => {
            insert_insert(a, a_meta, b, b_meta)
        }

        (Insert { .. }, Delete { .. }) | (ArrayInsert { .. }, ArrayDelete { .. }) => {
            insert_delete(a, b)
        }

        (Delete { .. }, Insert { .. }) | (ArrayDelete { .. }, ArrayInsert { .. }) => {
            let (b, a) = insert_delete(b, a);
            (a, b)
        }

        (Delete { .. }, Delete { .. }) | (ArrayDelete { .. }, ArrayDelete { .. }) => {
            (subtract_delete(a, b), subtract_delete(b, a))
        }

        (ArrayInsert { .. }, ArrayMove { from, to }) => insert_move(a, *from, *to),

        (ArrayMove { from, to }, ArrayInsert { .. }) => {
            let (b, a) = insert_move(b, *from, *to);
            (a, b)
        }

        (ArrayDelete { .. }, ArrayMove { from, to }) => delete_move(a, *from, *to),

        (ArrayMove { from, to }, ArrayDelete { .. }) => {
            let (b, a) = delete_move(b, *from, *to);
            (a, b)
        }

        (ArrayMove { from: fa, to: ta }, ArrayMove { from: fb, to: tb }) => {
            move_move((*fa, *ta), a_meta, (*fb, *tb), b_meta)
        }

        (Set { path: pa, .. } | Unset { path: pa, .. }, Set { path: pb, .. } | Unset { path: pb, .. }) => {
            json_json(a, pa, a_meta, b, pb, b_meta)
        }

        // Different families never interact
        _ => (a.clone(), b.clone()),
    }
}

/// (index, length) of a text or array insert/delete
fn span(kind: &OperationKind) -> (usize, usize) {
    match kind {
        OperationKind::Insert { position, content } => (*position, content.chars().count()),
        OperationKind::Delete { position, length } => (*position, *length),
        OperationKind::ArrayInsert { index, values } => (*index, values.len()),
        OperationKind::ArrayDelete { index, count } => (*index, *count),
        _ => (0, 0),
    }
}

/// Same insert, different position
fn insert_at(insert: &OperationKind, at: usize) -> OperationKind {
    match insert {
        OperationKind::Insert { content, .. } => OperationKind::Insert {
            position: at,
            content: content.clone(),
        },
        OperationKind::ArrayInsert { values, .. } => OperationKind::ArrayInsert {
            index: at,
            values: values.clone(),
        },
        other => other.clone(),
    }
}

/// Delete of the same family as `like`; empty ranges become `Retain`
fn delete_like(like: &OperationKind, at: usize, len: usize) -> OperationKind {
    if len == 0 {
        return OperationKind::Retain;
    }
    match like {
        OperationKind::Insert { .. } | OperationKind::Delete { .. } => OperationKind::Delete {
            position: at,
            length: len,
        },
        _ => OperationKind::ArrayDelete {
            index: at,
            count: len,
        },
    }
}

fn array_delete(at: usize, len: usize) -> OperationKind {
    delete_like(&OperationKind::ArrayDelete { index: 0, count: 0 }, at, len)
}

fn array_move(from: usize, to: usize) -> OperationKind {
    if from == to {
        OperationKind::Retain
    } else {
        OperationKind::ArrayMove { from, to }
    }
}

/// Flatten away no-op parts
fn compound(parts: Vec<OperationKind>) -> OperationKind {
    let mut parts: Vec<_> = parts
        .into_iter()
        .filter(|part| !part.is_noop())
        .collect();
    match parts.len() {
        0 => OperationKind::Retain,
        1 => parts.remove(0),
        _ => OperationKind::Compound { parts },
    }
}

fn insert_insert(
    a: &OperationKind,
    a_meta: &Operation,
    b: &OperationKind,
    b_meta: &Operation,
) -> (OperationKind, OperationKind) {
    let (pa, na) = span(a);
    let (pb, nb) = span(b);

    if pa < pb || (pa == pb && precedes(a_meta, b_meta)) {
        (a.clone(), insert_at(b, pb + na))
    } else {
        (insert_at(a, pa + nb), b.clone())
    }
}

/// Returns `(insert', delete')`
fn insert_delete(insert: &OperationKind, delete: &OperationKind) -> (OperationKind, OperationKind) {
    let (pi, ni) = span(insert);
    let (pd, ld) = span(delete);

    if pi <= pd {
        (insert.clone(), delete_like(delete, pd + ni, ld))
    } else if pi >= pd + ld {
        (insert_at(insert, pi - ld), delete.clone())
    } else {
        // Insert landed inside the deleted range: it survives at the range
        // start, and the delete skips over it.
        (
            insert_at(insert, pd),
            compound(vec![
                delete_like(delete, pi + ni, pd + ld - pi),
                delete_like(delete, pd, pi - pd),
            ]),
        )
    }
}

/// What is left of delete `a` once delete `b` has been applied
fn subtract_delete(a: &OperationKind, b: &OperationKind) -> OperationKind {
    let (pa, la) = span(a);
    let (pb, lb) = span(b);

    let overlap = (pa + la).min(pb + lb).saturating_sub(pa.max(pb));
    let at = if pb < pa { pa - lb.min(pa - pb) } else { pa };
    delete_like(a, at, la - overlap)
}

/// Returns `(insert', move')`. An insertion at the moved element's
/// destination gap lands before the moved element.
fn insert_move(insert: &OperationKind, from: usize, to: usize) -> (OperationKind, OperationKind) {
    let (at, len) = span(insert);

    let gap = at - usize::from(at > from);
    let insert_after_move = gap + usize::from(gap > to);

    let from_after_insert = from + if from >= at { len } else { 0 };
    let to_after_insert = to + if gap <= to { len } else { 0 };

    (
        insert_at(insert, insert_after_move),
        array_move(from_after_insert, to_after_insert),
    )
}

/// Returns `(delete', move')`. Deleting the moved element beats the move.
fn delete_move(delete: &OperationKind, from: usize, to: usize) -> (OperationKind, OperationKind) {
    let (at, count) = span(delete);

    if count > 0 && at <= from && from < at + count {
        // The delete follows the element to its destination
        let delete_after_move = if to < at {
            compound(vec![array_delete(at + 1, count - 1), array_delete(to, 1)])
        } else if to < at + count {
            array_delete(at, count)
        } else {
            compound(vec![array_delete(to, 1), array_delete(at, count - 1)])
        };
        return (delete_after_move, OperationKind::Retain);
    }

    // Range start once the moved element has been lifted out
    let lifted = at - usize::from(from < at);

    let delete_after_move = if to <= lifted {
        array_delete(lifted + 1, count)
    } else if to >= lifted + count {
        array_delete(lifted, count)
    } else {
        // Element dropped inside the range: delete around it
        compound(vec![
            array_delete(to + 1, lifted + count - to),
            array_delete(lifted, to - lifted),
        ])
    };

    let from_after_delete = if from >= at + count { from - count } else { from };
    let to_after_delete = if to <= lifted {
        to
    } else if to >= lifted + count {
        to - count
    } else {
        lifted
    };

    (
        delete_after_move,
        array_move(from_after_delete, to_after_delete),
    )
}

fn move_move(
    (fa, ta): (usize, usize),
    a_meta: &Operation,
    (fb, tb): (usize, usize),
    b_meta: &Operation,
) -> (OperationKind, OperationKind) {
    if fa == fb {
        debug!(from = fa, "concurrent moves of the same element");
        // The winner re-targets from wherever the loser put the element
        return match first_writer_wins(a_meta, b_meta) {
            Winner::First => (array_move(tb, ta), OperationKind::Retain),
            Winner::Second => (OperationKind::Retain, array_move(ta, tb)),
        };
    }

    // Moves only permute the prefix covering their indices, so simulating that
    // prefix of element ids is exact.
    let len = fa.max(ta).max(fb).max(tb) + 1;
    let base: Vec<usize> = (0..len).collect();
    let after_a = moved(&base, fa, ta);
    let after_b = moved(&base, fb, tb);

    // Gap each element chose among the elements neither operation touched
    let gap_a = index_of(after_a.iter().filter(|&&e| e != fb), fa);
    let gap_b = index_of(after_b.iter().filter(|&&e| e != fa), fb);

    let mut merged: Vec<usize> = base.into_iter().filter(|&e| e != fa && e != fb).collect();
    if gap_a < gap_b || (gap_a == gap_b && precedes(a_meta, b_meta)) {
        merged.insert(gap_b, fb);
        merged.insert(gap_a, fa);
    } else {
        merged.insert(gap_a, fa);
        merged.insert(gap_b, fb);
    }

    (
        array_move(index_of(after_b.iter(), fa), index_of(merged.iter(), fa)),
        array_move(index_of(after_a.iter(), fb), index_of(merged.iter(), fb)),
    )
}

fn moved(elements: &[usize], from: usize, to: usize) -> Vec<usize> {
    let mut elements = elements.to_vec();
    let element = elements.remove(from);
    elements.insert(to, element);
    elements
}

fn index_of<'a>(mut elements: impl Iterator<Item = &'a usize>, element: usize) -> usize {
    elements.position(|&e| e == element).unwrap_or_default()
}

fn json_json(
    a: &OperationKind,
    pa: &[String],
    a_meta: &Operation,
    b: &OperationKind,
    pb: &[String],
    b_meta: &Operation,
) -> (OperationKind, OperationKind) {
    use OperationKind::{Retain, Set};

    if pa == pb {
        debug!(path = ?pa, "concurrent writes to the same path");
        return match (a, b) {
            (Set { .. }, Set { .. }) => match last_writer_wins(a_meta, b_meta) {
                Winner::First => (a.clone(), Retain),
                Winner::Second => (Retain, b.clone()),
            },
            // Restore beats delete
            (Set { .. }, _) => (a.clone(), Retain),
            (_, Set { .. }) => (Retain, b.clone()),
            _ => (Retain, Retain),
        };
    }

    if pb.starts_with(pa) {
        let (b, a) = ancestor_descendant(a, b);
        (a, b)
    } else if pa.starts_with(pb) {
        ancestor_descendant(b, a)
    } else {
        (a.clone(), b.clone())
    }
}

/// Resolve a write to an ancestor path against one beneath it. Returns the
/// transformed `(descendant, ancestor)`.
fn ancestor_descendant(
    ancestor: &OperationKind,
    descendant: &OperationKind,
) -> (OperationKind, OperationKind) {
    use OperationKind::{Retain, Set, Unset};

    match (ancestor, descendant) {
        // Restore beats delete: the descendant set survives the removal and
        // recreates the objects leading to it
        (Unset { .. }, Set { .. }) => (
            descendant.clone(),
            compound(vec![ancestor.clone(), descendant.clone()]),
        ),
        // Otherwise the ancestor replaces the whole subtree
        _ => (Retain, ancestor.clone()),
    }
}
