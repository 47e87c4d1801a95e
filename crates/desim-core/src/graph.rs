//! Generic directed/undirected graph used to hold simulation topologies.
//!
//! Vertices carry arbitrary payloads identified by dense [`VertexId`]s that
//! are either allocated automatically or supplied by the caller (modules use
//! their own unique ID as their vertex ID). Payload identity for duplicate
//! detection comes from the [`VertexKey`] trait. Adjacency is stored per
//! vertex as a successor map (with arc payloads) plus a predecessor set, so
//! arc existence and counts never require scanning the whole graph.

use crate::id::VertexId;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from graph lookups that require a definite answer.
///
/// Existence probes (`vertex_id`, `arc`, `exists*`) return `Option`/`bool`
/// instead: absence is an expected outcome there, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("vertex not found: {0:?}")]
    VertexNotFound(VertexId),
    #[error("arc not found: {0:?} -> {1:?}")]
    ArcNotFound(VertexId, VertexId),
}

// ---------------------------------------------------------------------------
// Vertex identity
// ---------------------------------------------------------------------------

/// Extracts the ordering key under which vertex payloads are deduplicated.
///
/// The Rust rendition of a caller-supplied comparator: two payloads with
/// equal keys are the same vertex to [`Graph::add_vertex`] and the payload
/// probes.
pub trait VertexKey {
    type Key: Ord + Clone;
    fn vertex_key(&self) -> Self::Key;
}

macro_rules! identity_vertex_key {
    ($($ty:ty),*) => {
        $(impl VertexKey for $ty {
            type Key = $ty;
            fn vertex_key(&self) -> $ty {
                self.clone()
            }
        })*
    };
}

identity_vertex_key!(i32, i64, u32, u64, String, &'static str);

// ---------------------------------------------------------------------------
// Core data structures
// ---------------------------------------------------------------------------

/// An arc is identified by its (tail, head) vertex pair.
pub type ArcId = (VertexId, VertexId);

struct VertexRecord<V, A> {
    payload: V,
    /// head -> arc payload, for every arc leaving this vertex.
    successors: BTreeMap<VertexId, A>,
    /// Every vertex with an arc into this one.
    predecessors: BTreeSet<VertexId>,
}

impl<V, A> VertexRecord<V, A> {
    fn new(payload: V) -> Self {
        Self {
            payload,
            successors: BTreeMap::new(),
            predecessors: BTreeSet::new(),
        }
    }
}

/// Generic graph container mapping payloads to stable vertex IDs.
///
/// The orientation flag is metadata: adjacency is always stored tail→head,
/// and it surfaces as the `edgedefault` attribute of the GraphML export.
pub struct Graph<V: VertexKey, A> {
    directed: bool,
    name: Option<String>,
    vertices: BTreeMap<VertexId, VertexRecord<V, A>>,
    index: BTreeMap<V::Key, VertexId>,
    arcs_nb: u64,
    next_auto_id: u64,
}

impl<V: VertexKey, A> Default for Graph<V, A> {
    fn default() -> Self {
        Self::new_directed()
    }
}

impl<V: VertexKey, A> Graph<V, A> {
    pub fn new_directed() -> Self {
        Self {
            directed: true,
            name: None,
            vertices: BTreeMap::new(),
            index: BTreeMap::new(),
            arcs_nb: 0,
            next_auto_id: 0,
        }
    }

    pub fn new_undirected() -> Self {
        Self {
            directed: false,
            ..Self::new_directed()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn is_directed(&self) -> bool {
        self.directed
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Add a vertex, deduplicating by payload key. Returns the existing ID
    /// if an equal payload is already present, otherwise allocates a fresh
    /// auto ID and inserts.
    pub fn add_vertex(&mut self, payload: V) -> VertexId {
        if let Some(&id) = self.index.get(&payload.vertex_key()) {
            return id;
        }
        let id = self.alloc_auto_id();
        self.insert_new(id, payload);
        id
    }

    /// Add a vertex under an externally chosen ID.
    ///
    /// If the ID is unused the payload is inserted with exactly that ID.
    /// If the ID is already in use the existing vertex's payload is replaced
    /// (identity remap) and its adjacency is preserved. Auto-allocated IDs
    /// never collide with IDs supplied here.
    pub fn add_vertex_with_id(&mut self, payload: V, id: VertexId) -> VertexId {
        if self.vertices.contains_key(&id) {
            self.set_vertex(id, payload);
        } else {
            self.next_auto_id = self.next_auto_id.max(id.0 + 1);
            self.insert_new(id, payload);
        }
        id
    }

    fn alloc_auto_id(&mut self) -> VertexId {
        // IDs freed by removal are not reused; explicit IDs bump the counter.
        let id = VertexId(self.next_auto_id);
        self.next_auto_id += 1;
        id
    }

    fn insert_new(&mut self, id: VertexId, payload: V) {
        self.index.insert(payload.vertex_key(), id);
        self.vertices.insert(id, VertexRecord::new(payload));
    }

    /// Connect two existing vertices. Returns `None` if either endpoint is
    /// missing. Re-connecting an existing pair replaces the arc payload
    /// without changing the arc count.
    pub fn connect(&mut self, tail: VertexId, head: VertexId, arc: A) -> Option<ArcId> {
        if !self.vertices.contains_key(&tail) || !self.vertices.contains_key(&head) {
            return None;
        }
        let fresh = self
            .vertices
            .get_mut(&tail)
            .map(|rec| rec.successors.insert(head, arc).is_none())
            .unwrap_or(false);
        if let Some(rec) = self.vertices.get_mut(&head) {
            rec.predecessors.insert(tail);
        }
        if fresh {
            self.arcs_nb += 1;
        }
        Some((tail, head))
    }

    /// Connect two vertices given their payloads, optionally inserting
    /// missing endpoints. Returns `None` (the illegal-arc sentinel) when an
    /// endpoint is absent and `add_if_missing` is false.
    pub fn add_arc(&mut self, tail: V, head: V, arc: A, add_if_missing: bool) -> Option<ArcId> {
        let tail_id = match self.index.get(&tail.vertex_key()) {
            Some(&id) => id,
            None if add_if_missing => self.add_vertex(tail),
            None => return None,
        };
        let head_id = match self.index.get(&head.vertex_key()) {
            Some(&id) => id,
            None if add_if_missing => self.add_vertex(head),
            None => return None,
        };
        self.connect(tail_id, head_id, arc)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Payload of a vertex; `VertexNotFound` if the ID is unknown.
    pub fn vertex(&self, id: VertexId) -> Result<&V, GraphError> {
        self.vertices
            .get(&id)
            .map(|rec| &rec.payload)
            .ok_or(GraphError::VertexNotFound(id))
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> Result<&mut V, GraphError> {
        self.vertices
            .get_mut(&id)
            .map(|rec| &mut rec.payload)
            .ok_or(GraphError::VertexNotFound(id))
    }

    /// Existence probe: the ID of an equal payload, if any.
    pub fn vertex_id(&self, payload: &V) -> Option<VertexId> {
        self.index.get(&payload.vertex_key()).copied()
    }

    /// Existence probe for an arc between two vertex IDs.
    pub fn arc(&self, tail: VertexId, head: VertexId) -> Option<ArcId> {
        self.vertices
            .get(&tail)
            .filter(|rec| rec.successors.contains_key(&head))
            .map(|_| (tail, head))
    }

    /// Arc payload; `ArcNotFound` if the arc does not exist.
    pub fn arc_payload(&self, arc: ArcId) -> Result<&A, GraphError> {
        self.vertices
            .get(&arc.0)
            .and_then(|rec| rec.successors.get(&arc.1))
            .ok_or(GraphError::ArcNotFound(arc.0, arc.1))
    }

    /// IDs of every vertex reachable over one outgoing arc. Empty for an
    /// unknown vertex (non-throwing convenience query).
    pub fn successors(&self, id: VertexId) -> BTreeSet<VertexId> {
        self.vertices
            .get(&id)
            .map(|rec| rec.successors.keys().copied().collect())
            .unwrap_or_default()
    }

    /// IDs of every vertex with an arc into this one. Empty for an unknown
    /// vertex.
    pub fn predecessors(&self, id: VertexId) -> BTreeSet<VertexId> {
        self.vertices
            .get(&id)
            .map(|rec| rec.predecessors.clone())
            .unwrap_or_default()
    }

    pub fn vertices_nb(&self) -> usize {
        self.vertices.len()
    }

    pub fn arcs_nb(&self) -> u64 {
        self.arcs_nb
    }

    pub fn successors_nb(&self, id: VertexId) -> usize {
        self.vertices
            .get(&id)
            .map(|rec| rec.successors.len())
            .unwrap_or(0)
    }

    pub fn predecessors_nb(&self, id: VertexId) -> usize {
        self.vertices
            .get(&id)
            .map(|rec| rec.predecessors.len())
            .unwrap_or(0)
    }

    pub fn exists(&self, id: VertexId) -> bool {
        self.vertices.contains_key(&id)
    }

    pub fn exists_arc(&self, tail: VertexId, head: VertexId) -> bool {
        self.arc(tail, head).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// All vertex IDs in ascending order — the total order the simulator
    /// uses for its initialization and termination sweeps.
    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.vertices.keys().copied()
    }

    /// All arcs, ordered by (tail, head).
    pub fn arcs(&self) -> Vec<ArcId> {
        self.vertices
            .iter()
            .flat_map(|(&tail, rec)| rec.successors.keys().map(move |&head| (tail, head)))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Replace a vertex's payload in place, keeping its ID and adjacency.
    /// Returns false (and does nothing) for an unknown ID.
    pub fn set_vertex(&mut self, id: VertexId, payload: V) -> bool {
        let Some(rec) = self.vertices.get_mut(&id) else {
            return false;
        };
        let old_key = rec.payload.vertex_key();
        if self.index.get(&old_key) == Some(&id) {
            self.index.remove(&old_key);
        }
        self.index.insert(payload.vertex_key(), id);
        rec.payload = payload;
        true
    }

    /// Replace an existing arc's payload. Returns false if the arc is absent.
    pub fn set_arc(&mut self, arc: ArcId, payload: A) -> bool {
        match self
            .vertices
            .get_mut(&arc.0)
            .and_then(|rec| rec.successors.get_mut(&arc.1))
        {
            Some(slot) => {
                *slot = payload;
                true
            }
            None => false,
        }
    }

    /// Remove a vertex, unlinking every incident arc first. Returns false if
    /// the vertex is unknown.
    pub fn remove_vertex(&mut self, id: VertexId) -> bool {
        let Some(rec) = self.vertices.remove(&id) else {
            return false;
        };

        let mut removed_arcs = (rec.predecessors.len() + rec.successors.len()) as u64;
        // A self-loop sits in both sets but is a single arc.
        if rec.predecessors.contains(&id) && rec.successors.contains_key(&id) {
            removed_arcs -= 1;
        }

        for pred in &rec.predecessors {
            if let Some(p) = self.vertices.get_mut(pred) {
                p.successors.remove(&id);
            }
        }
        for head in rec.successors.keys() {
            if let Some(h) = self.vertices.get_mut(head) {
                h.predecessors.remove(&id);
            }
        }

        self.arcs_nb -= removed_arcs;
        let key = rec.payload.vertex_key();
        if self.index.get(&key) == Some(&id) {
            self.index.remove(&key);
        }
        true
    }

    /// Remove a single arc. Returns false if it does not exist.
    pub fn remove_arc(&mut self, tail: VertexId, head: VertexId) -> bool {
        let removed = self
            .vertices
            .get_mut(&tail)
            .map(|rec| rec.successors.remove(&head).is_some())
            .unwrap_or(false);
        if !removed {
            return false;
        }
        if let Some(rec) = self.vertices.get_mut(&head) {
            rec.predecessors.remove(&tail);
        }
        self.arcs_nb -= 1;
        true
    }

    /// Drop every vertex and arc, keeping the name and orientation.
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.index.clear();
        self.arcs_nb = 0;
    }

    // -----------------------------------------------------------------------
    // GraphML export
    // -----------------------------------------------------------------------

    /// Write the topology as a GraphML document: nodes first, then edges.
    /// One-way export; there is no importer.
    pub fn save_graphml<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            out,
            r#"<graphml xmlns="http://graphml.graphdrawing.org/xmlns""#
        )?;
        writeln!(
            out,
            r#"         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance""#
        )?;
        writeln!(
            out,
            r#"         xsi:schemaLocation="http://graphml.graphdrawing.org/xmlns http://graphml.graphdrawing.org/xmlns/1.0/graphml.xsd">"#
        )?;
        writeln!(
            out,
            "\t<graph id=\"{}\" edgedefault=\"{}\">",
            self.name.as_deref().unwrap_or("graph"),
            if self.directed { "directed" } else { "undirected" },
        )?;
        for id in self.vertices.keys() {
            writeln!(out, "\t\t<node id=\"{}\"/>", id.0)?;
        }
        for (tail, rec) in &self.vertices {
            for head in rec.successors.keys() {
                writeln!(
                    out,
                    "\t\t<edge source=\"{}\" target=\"{}\"/>",
                    tail.0, head.0
                )?;
            }
        }
        writeln!(out, "\t</graph>")?;
        writeln!(out, "</graphml>")?;
        Ok(())
    }

    /// `save_graphml` into a freshly created file.
    pub fn save_graphml_to_path<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.save_graphml(&mut out)?;
        out.flush()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
