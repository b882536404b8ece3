//! Task graph construction and iterative leaf pruning

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::task::TaskId;

/// A vertex of the task graph
#[derive(Debug, Clone)]
pub struct Vertex<T> {
    /// Vertex identifier
    pub id: TaskId,
    /// Vertices that must be removed before this one is ready
    pub depends_on: Vec<TaskId>,
    /// Payload
    pub data: T,
}

/// Directed graph of tasks, pruned from the leaves as tasks complete.
///
/// Vertices keep insertion order so ready sets are reported in the order
/// tasks were discovered.
#[derive(Debug, Clone)]
pub struct TaskGraph<T> {
    vertices: HashMap<TaskId, Vertex<T>>,
    order: Vec<TaskId>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self {
            vertices: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T> TaskGraph<T> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vertex. Edges may name vertices added later; edges that
    /// never resolve are ignored by scheduling and can be dropped with
    /// [`TaskGraph::drop_dangling_edges`].
    pub fn add_vertex(
        &mut self,
        id: TaskId,
        depends_on: Vec<TaskId>,
        data: T,
    ) -> Result<(), DagError> {
        if self.vertices.contains_key(&id) {
            return Err(DagError::DuplicateVertex(id.to_string()));
        }

        let mut unique = Vec::with_capacity(depends_on.len());
        for dep in depends_on {
            if !unique.contains(&dep) {
                unique.push(dep);
            }
        }

        self.order.push(id.clone());
        self.vertices.insert(
            id.clone(),
            Vertex {
                id,
                depends_on: unique,
                data,
            },
        );
        Ok(())
    }

    /// Remove edges pointing at vertices that are not in the graph.
    /// Returns how many edges were dropped.
    pub fn drop_dangling_edges(&mut self) -> usize {
        let known: HashSet<TaskId> = self.vertices.keys().cloned().collect();
        let mut dropped = 0;
        for vertex in self.vertices.values_mut() {
            let before = vertex.depends_on.len();
            vertex.depends_on.retain(|dep| known.contains(dep));
            dropped += before - vertex.depends_on.len();
        }
        if dropped > 0 {
            debug!(dropped, "dropped dangling edges");
        }
        dropped
    }

    /// Find a dependency cycle.
    ///
    /// Depth-first search with an explicit stack. When an edge re-enters a
    /// vertex still on the stack, the returned path runs from that vertex
    /// through the stack and back to it, e.g. `[a:build, b:build, a:build]`.
    #[instrument(skip_all, fields(vertex_count = self.vertices.len()))]
    pub fn find_cycle(&self) -> Option<Vec<TaskId>> {
        let mut visited: HashSet<&TaskId> = HashSet::new();

        for start in &self.order {
            if visited.contains(start) {
                continue;
            }

            // (vertex, index of the next edge to follow)
            let mut stack: Vec<(&TaskId, usize)> = vec![(start, 0)];
            let mut on_stack: HashSet<&TaskId> = HashSet::from([start]);
            visited.insert(start);

            while let Some((id, next_edge)) = stack.last().copied() {
                let edges = &self.vertices[id].depends_on;

                let Some(child) = edges.get(next_edge) else {
                    on_stack.remove(id);
                    stack.pop();
                    continue;
                };

                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                if !self.vertices.contains_key(child) {
                    continue;
                }

                if on_stack.contains(child) {
                    let mut path: Vec<TaskId> = stack
                        .iter()
                        .map(|(v, _)| *v)
                        .skip_while(|v| *v != child)
                        .cloned()
                        .collect();
                    path.push(child.clone());
                    return Some(path);
                }

                if visited.insert(child) {
                    on_stack.insert(child);
                    stack.push((child, 0));
                }
            }
        }

        None
    }

    /// Vertices with no remaining prerequisite in the graph, in insertion
    /// order
    pub fn ready_vertices(&self) -> Vec<&Vertex<T>> {
        self.order
            .iter()
            .filter_map(|id| self.vertices.get(id))
            .filter(|v| v.depends_on.iter().all(|dep| !self.vertices.contains_key(dep)))
            .collect()
    }

    /// Ids of [`TaskGraph::ready_vertices`]
    pub fn ready_ids(&self) -> Vec<TaskId> {
        self.ready_vertices().into_iter().map(|v| v.id.clone()).collect()
    }

    /// Remove a vertex and strip it from every remaining `depends_on` list
    pub fn remove(&mut self, id: &TaskId) -> Option<T> {
        let vertex = self.vertices.remove(id)?;
        self.order.retain(|other| other != id);
        for other in self.vertices.values_mut() {
            other.depends_on.retain(|dep| dep != id);
        }
        Some(vertex.data)
    }

    /// Every vertex that transitively depends on `id`
    pub fn dependents_of(&self, id: &TaskId) -> Vec<TaskId> {
        let mut found: Vec<TaskId> = Vec::new();
        let mut frontier = vec![id.clone()];

        while let Some(current) = frontier.pop() {
            for candidate in &self.order {
                let depends = self.vertices[candidate].depends_on.contains(&current);
                if depends && !found.contains(candidate) && candidate != id {
                    found.push(candidate.clone());
                    frontier.push(candidate.clone());
                }
            }
        }

        found
    }

    /// Get a vertex
    pub fn get(&self, id: &TaskId) -> Option<&Vertex<T>> {
        self.vertices.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.vertices.contains_key(id)
    }

    /// Vertex ids in insertion order
    pub fn ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Get the total number of vertices
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Waves the scheduler would run, computed by pruning a copy of the
    /// edges. Fails on a cycle.
    pub fn waves(&self) -> Result<Vec<Vec<TaskId>>, DagError> {
        if let Some(path) = self.find_cycle() {
            return Err(DagError::CyclicDependency { path });
        }

        let mut shadow: TaskGraph<()> = TaskGraph::new();
        for id in &self.order {
            let vertex = &self.vertices[id];
            shadow.add_vertex(id.clone(), vertex.depends_on.clone(), ())?;
        }

        let mut waves = Vec::new();
        while !shadow.is_empty() {
            let ready = shadow.ready_ids();
            for id in &ready {
                shadow.remove(id);
            }
            waves.push(ready);
        }
        Ok(waves)
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self, describe: impl Fn(&Vertex<T>) -> String) -> Result<String, DagError> {
        let mut plan = String::new();
        for (i, wave) in self.waves()?.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for id in wave {
                let vertex = &self.vertices[id];
                let deps: Vec<String> = vertex
                    .depends_on
                    .iter()
                    .filter(|d| self.vertices.contains_key(*d))
                    .map(|d| d.to_string())
                    .collect();
                if deps.is_empty() {
                    plan.push_str(&format!("  {} -> {}\n", id, describe(vertex)));
                } else {
                    plan.push_str(&format!(
                        "  {} -> {} (after: {})\n",
                        id,
                        describe(vertex),
                        deps.join(", ")
                    ));
                }
            }
        }
        Ok(plan)
    }
}

/// Errors raised by the task graph
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Cyclic dependency detected
    #[error("Cyclic dependency detected: {}", format_path(.path))]
    CyclicDependency { path: Vec<TaskId> },

    /// A vertex id was inserted twice
    #[error("Task '{0}' added to the graph twice")]
    DuplicateVertex(String),
}

fn format_path(path: &[TaskId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
