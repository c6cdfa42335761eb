//! The administration tree as a flat arena keyed by surrogate id.
//!
//! Parent links are plain ids into the arena. Every mutation that touches a
//! parent link walks from the proposed parent to the root first; the walk is
//! bounded by the arena size so a corrupt chain read from the database cannot
//! loop forever.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HierarchyError;
use crate::model::Administracion;

#[derive(Debug, Default)]
pub struct Hierarchy {
    nodes: Vec<Administracion>,
    index: HashMap<Uuid, usize>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the arena from rows in any order. Rows whose parent is missing
    /// or which close a cycle are rejected.
    pub fn from_rows(rows: Vec<Administracion>) -> Result<Self, HierarchyError> {
        let mut hierarchy = Self::new();
        let parents: Vec<(Uuid, Option<Uuid>)> = rows
            .iter()
            .map(|row| (row.id, row.administracion_padre_id))
            .collect();
        let (order, cyclic) = order_parents_first(&parents);
        if let Some(&first) = cyclic.first() {
            let (id, parent) = parents[first];
            return Err(HierarchyError::Cycle {
                id,
                parent: parent.unwrap_or(id),
            });
        }

        let mut slots: Vec<Option<Administracion>> = rows.into_iter().map(Some).collect();
        for idx in order {
            if let Some(row) = slots[idx].take() {
                hierarchy.insert(row)?;
            }
        }
        Ok(hierarchy)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Administracion> {
        self.index.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub fn insert(&mut self, node: Administracion) -> Result<(), HierarchyError> {
        if self.index.contains_key(&node.id) {
            return Err(HierarchyError::Duplicate(node.id));
        }
        if let Some(parent) = node.administracion_padre_id {
            if parent == node.id {
                return Err(HierarchyError::Cycle {
                    id: node.id,
                    parent,
                });
            }
            if !self.index.contains_key(&parent) {
                return Err(HierarchyError::UnknownParent {
                    id: node.id,
                    parent,
                });
            }
        }
        self.index.insert(node.id, self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// True when `parent` is `id` itself or one of its descendants.
    pub fn would_cycle(&self, id: Uuid, parent: Uuid) -> bool {
        let mut cursor = Some(parent);
        let mut visited = HashSet::new();
        while let Some(current) = cursor {
            if current == id || !visited.insert(current) || visited.len() > self.nodes.len() {
                return true;
            }
            cursor = self.get(current).and_then(|node| node.administracion_padre_id);
        }
        false
    }

    pub fn set_parent(&mut self, id: Uuid, parent: Option<Uuid>) -> Result<(), HierarchyError> {
        let idx = *self.index.get(&id).ok_or(HierarchyError::NotFound(id))?;
        if let Some(parent) = parent {
            if !self.index.contains_key(&parent) {
                return Err(HierarchyError::UnknownParent { id, parent });
            }
            if self.would_cycle(id, parent) {
                return Err(HierarchyError::Cycle { id, parent });
            }
        }
        self.nodes[idx].administracion_padre_id = parent;
        Ok(())
    }

    /// Ends the validity window of a node. The row is kept as history.
    pub fn close(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), HierarchyError> {
        let idx = *self.index.get(&id).ok_or(HierarchyError::NotFound(id))?;
        let node = &mut self.nodes[idx];
        if node.valido_hasta.is_some() || !node.activa {
            return Err(HierarchyError::AlreadyClosed(id));
        }
        node.valido_hasta = Some(at);
        node.activa = false;
        Ok(())
    }

    /// Closes `id` and inserts `replacement` under the same parent, moving the
    /// current children of `id` to it. Returns the ids of the moved children.
    pub fn supersede(
        &mut self,
        id: Uuid,
        mut replacement: Administracion,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, HierarchyError> {
        let parent = self
            .get(id)
            .ok_or(HierarchyError::NotFound(id))?
            .administracion_padre_id;
        if self.index.contains_key(&replacement.id) {
            return Err(HierarchyError::Duplicate(replacement.id));
        }
        let moved: Vec<Uuid> = self.current_children(id, at).iter().map(|c| c.id).collect();

        self.close(id, at)?;
        replacement.administracion_padre_id = parent;
        replacement.valido_desde = at;
        replacement.valido_hasta = None;
        replacement.activa = true;
        let replacement_id = replacement.id;
        self.insert(replacement)?;
        for child in &moved {
            self.set_parent(*child, Some(replacement_id))?;
        }
        Ok(moved)
    }

    pub fn current_children(&self, id: Uuid, at: DateTime<Utc>) -> Vec<&Administracion> {
        let mut children: Vec<&Administracion> = self
            .nodes
            .iter()
            .filter(|node| node.administracion_padre_id == Some(id) && node.is_current_at(at))
            .collect();
        children.sort_by(|a, b| {
            a.orden_jerarquico
                .cmp(&b.orden_jerarquico)
                .then_with(|| a.nombre.cmp(&b.nombre))
        });
        children
    }

    /// Current nodes whose parent is absent or no longer current.
    pub fn current_roots(&self, at: DateTime<Utc>) -> Vec<&Administracion> {
        let mut roots: Vec<&Administracion> = self
            .nodes
            .iter()
            .filter(|node| node.is_current_at(at))
            .filter(|node| {
                node.administracion_padre_id
                    .and_then(|parent| self.get(parent))
                    .map_or(true, |parent| !parent.is_current_at(at))
            })
            .collect();
        roots.sort_by(|a, b| a.nombre.cmp(&b.nombre));
        roots
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: Uuid) -> Vec<&Administracion> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id).and_then(|node| node.administracion_padre_id);
        while let Some(current) = cursor {
            let Some(node) = self.get(current) else { break };
            if chain.len() >= self.nodes.len() {
                break;
            }
            chain.push(node);
            cursor = node.administracion_padre_id;
        }
        chain
    }
}

/// Orders `(key, parent)` pairs so every parent present in the slice comes
/// before its children. Parents that are not in the slice are treated as
/// roots. Returns the ordered indices and the indices of nodes that sit on,
/// or hang below, a parent cycle.
pub fn order_parents_first<K>(items: &[(K, Option<K>)]) -> (Vec<usize>, Vec<usize>)
where
    K: std::hash::Hash + Eq,
{
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Visiting,
        Done,
        Cyclic,
    }

    let position: HashMap<&K, usize> = items
        .iter()
        .enumerate()
        .rev()
        .map(|(idx, (key, _))| (key, idx))
        .collect();
    let mut marks = vec![Mark::New; items.len()];
    let mut order = Vec::with_capacity(items.len());
    let mut cyclic = Vec::new();

    for start in 0..items.len() {
        if marks[start] != Mark::New {
            continue;
        }
        // Walk up to the first resolved ancestor, then emit the path top-down.
        let mut path = Vec::new();
        let mut cursor = Some(start);
        let mut broken = false;
        while let Some(idx) = cursor {
            match marks[idx] {
                Mark::Done => break,
                Mark::Visiting | Mark::Cyclic => {
                    broken = true;
                    break;
                }
                Mark::New => {
                    marks[idx] = Mark::Visiting;
                    path.push(idx);
                    cursor = items[idx]
                        .1
                        .as_ref()
                        .and_then(|parent| position.get(parent).copied());
                }
            }
        }
        if broken {
            for idx in path {
                marks[idx] = Mark::Cyclic;
                cyclic.push(idx);
            }
        } else {
            for idx in path.into_iter().rev() {
                marks[idx] = Mark::Done;
                order.push(idx);
            }
        }
    }
    cyclic.sort_unstable();
    (order, cyclic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn node(nombre: &str, parent: Option<Uuid>) -> Administracion {
        Administracion {
            id: Uuid::new_v4(),
            nombre: nombre.to_string(),
            codigo_oficial: None,
            ambito: None,
            administracion_padre_id: parent,
            nivel_jerarquico: Some("AUTONOMICO".to_string()),
            tipo_organo: Some("ORGANO".to_string()),
            orden_jerarquico: None,
            valido_desde: t0(),
            valido_hasta: None,
            activa: true,
            comunidad_autonoma_id: None,
            provincia_id: None,
            municipio_id: None,
        }
    }

    #[test]
    fn test_reparent_rejects_cycle() {
        let root = node("Consejería", None);
        let child = node("Dirección General", Some(root.id));
        let grandchild = node("Servicio", Some(child.id));
        let (r, c, g) = (root.id, child.id, grandchild.id);
        let mut h = Hierarchy::from_rows(vec![grandchild, root, child]).unwrap();

        assert_eq!(
            h.set_parent(r, Some(g)),
            Err(HierarchyError::Cycle { id: r, parent: g })
        );
        assert_eq!(
            h.set_parent(c, Some(c)),
            Err(HierarchyError::Cycle { id: c, parent: c })
        );
        assert!(h.set_parent(g, Some(r)).is_ok());
        assert_eq!(h.get(g).unwrap().administracion_padre_id, Some(r));
    }

    #[test]
    fn test_from_rows_rejects_cycle_and_unknown_parent() {
        let mut a = node("A", None);
        let b = node("B", Some(a.id));
        a.administracion_padre_id = Some(b.id);
        assert!(matches!(
            Hierarchy::from_rows(vec![a, b]),
            Err(HierarchyError::Cycle { .. })
        ));

        let orphan = node("Huérfano", Some(Uuid::new_v4()));
        assert!(matches!(
            Hierarchy::from_rows(vec![orphan]),
            Err(HierarchyError::UnknownParent { .. })
        ));
    }

    #[test]
    fn test_historical_nodes_are_hidden_from_traversal() {
        let root = node("Consejería", None);
        let old = node("Dirección antigua", Some(root.id));
        let new = node("Dirección nueva", Some(root.id));
        let (r, o) = (root.id, old.id);
        let mut h = Hierarchy::from_rows(vec![root, old, new]).unwrap();
        let later = t0() + Duration::days(10);

        h.close(o, later).unwrap();
        let names: Vec<&str> = h
            .current_children(r, later)
            .iter()
            .map(|n| n.nombre.as_str())
            .collect();
        assert_eq!(names, vec!["Dirección nueva"]);
        // Before the closing instant the old node was still current.
        assert_eq!(h.current_children(r, t0()).len(), 2);
        assert_eq!(h.close(o, later), Err(HierarchyError::AlreadyClosed(o)));
    }

    #[test]
    fn test_children_of_historical_parent_become_roots() {
        let root = node("Consejería", None);
        let child = node("Servicio", Some(root.id));
        let r = root.id;
        let mut h = Hierarchy::from_rows(vec![root, child]).unwrap();
        let later = t0() + Duration::days(1);
        h.close(r, later).unwrap();
        let roots = h.current_roots(later);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].nombre, "Servicio");
    }

    #[test]
    fn test_supersede_moves_current_children() {
        let root = node("Presidencia", None);
        let old = node("Consejería de Cultura", Some(root.id));
        let kid = node("Dirección General de Patrimonio", Some(old.id));
        let (r, o, k) = (root.id, old.id, kid.id);
        let mut h = Hierarchy::from_rows(vec![root, old, kid]).unwrap();
        let at = t0() + Duration::days(30);

        let replacement = node("Consejería de Cultura y Deporte", None);
        let new_id = replacement.id;
        let moved = h.supersede(o, replacement, at).unwrap();

        assert_eq!(moved, vec![k]);
        assert_eq!(h.get(o).unwrap().valido_hasta, Some(at));
        assert!(!h.get(o).unwrap().activa);
        assert_eq!(h.get(new_id).unwrap().administracion_padre_id, Some(r));
        assert_eq!(h.get(k).unwrap().administracion_padre_id, Some(new_id));
        let chain: Vec<Uuid> = h.ancestors(k).iter().map(|n| n.id).collect();
        assert_eq!(chain, vec![new_id, r]);
    }

    #[test]
    fn test_order_parents_first() {
        let items = vec![
            ("c", Some("b")),
            ("b", Some("a")),
            ("a", None),
            ("x", Some("missing")),
        ];
        let (order, cyclic) = order_parents_first(&items);
        assert!(cyclic.is_empty());
        let keys: Vec<&str> = order.iter().map(|&i| items[i].0).collect();
        let pos = |k: &str| keys.iter().position(|x| *x == k).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_order_parents_first_reports_cycles() {
        let items = vec![
            ("a", Some("b")),
            ("b", Some("a")),
            ("self", Some("self")),
            ("hanging", Some("a")),
            ("ok", None),
        ];
        let (order, cyclic) = order_parents_first(&items);
        assert_eq!(cyclic, vec![0, 1, 2, 3]);
        assert_eq!(order, vec![4]);
    }
}
