//! Dependency ordering over container links.
//!
//! The graph is adjacency lists of indices into the input slice; containers
//! never reference each other directly. Link targets that resolve to nothing
//! in the input are ignored — they may live outside the filter scope.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::core::container::{Container, ContainerId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SortError {
    #[error("circular reference to container '{0}'")]
    CircularReference(String),
}

fn adjacency(containers: &[Container]) -> Vec<Vec<usize>> {
    let by_name: HashMap<&str, usize> = containers
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name(), i))
        .collect();
    containers
        .iter()
        .map(|c| {
            c.links()
                .iter()
                .filter_map(|l| by_name.get(l.as_str()).copied())
                .collect()
        })
        .collect()
}

/// Permutes the input so every container appears after everything it links
/// to. Stable: within a topological layer, input order is preserved by
/// visiting vertices in input order.
pub fn sort_by_dependencies(containers: &[Container]) -> Result<Vec<Container>, SortError> {
    let edges = adjacency(containers);
    let mut visited = vec![false; containers.len()];
    let mut on_stack = vec![false; containers.len()];
    let mut order: Vec<usize> = Vec::with_capacity(containers.len());

    fn visit(
        i: usize,
        containers: &[Container],
        edges: &[Vec<usize>],
        visited: &mut [bool],
        on_stack: &mut [bool],
        order: &mut Vec<usize>,
    ) -> Result<(), SortError> {
        if visited[i] {
            return Ok(());
        }
        on_stack[i] = true;
        for &dep in &edges[i] {
            if on_stack[dep] {
                return Err(SortError::CircularReference(
                    containers[dep].name().to_string(),
                ));
            }
            visit(dep, containers, edges, visited, on_stack, order)?;
        }
        on_stack[i] = false;
        visited[i] = true;
        order.push(i);
        Ok(())
    }

    for i in 0..containers.len() {
        visit(
            i,
            containers,
            &edges,
            &mut visited,
            &mut on_stack,
            &mut order,
        )?;
    }
    Ok(order.into_iter().map(|i| containers[i].clone()).collect())
}

/// Ids of every container sitting on a dependency cycle, found by
/// DFS-coloring. Used to pre-skip cyclic containers so the sort itself does
/// not have to abort the session.
pub fn detect_cycles(containers: &[Container]) -> HashSet<ContainerId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Grey,
        Black,
    }

    let edges = adjacency(containers);
    let mut color = vec![Color::White; containers.len()];
    let mut cyclic: HashSet<usize> = HashSet::new();

    fn visit(
        i: usize,
        edges: &[Vec<usize>],
        color: &mut [Color],
        stack: &mut Vec<usize>,
        cyclic: &mut HashSet<usize>,
    ) {
        color[i] = Color::Grey;
        stack.push(i);
        for &dep in &edges[i] {
            match color[dep] {
                Color::Grey => {
                    // Everything on the stack from `dep` onward closes the
                    // loop.
                    if let Some(pos) = stack.iter().position(|&s| s == dep) {
                        cyclic.extend(stack[pos..].iter().copied());
                    }
                }
                Color::White => visit(dep, edges, color, stack, cyclic),
                Color::Black => {}
            }
        }
        stack.pop();
        color[i] = Color::Black;
    }

    let mut stack = Vec::new();
    for i in 0..containers.len() {
        if color[i] == Color::White {
            visit(i, &edges, &mut color, &mut stack, &mut cyclic);
        }
    }

    cyclic
        .into_iter()
        .map(|i| containers[i].id().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::LABEL_DEPENDS_ON;

    fn c(name: &str, depends_on: &[&str]) -> Container {
        let container = Container::new(name, name, format!("{name}:latest"), "sha256:aaa");
        if depends_on.is_empty() {
            container
        } else {
            container.with_label(LABEL_DEPENDS_ON, &depends_on.join(","))
        }
    }

    fn names(sorted: &[Container]) -> Vec<&str> {
        sorted.iter().map(|c| c.name()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        let input = vec![c("app", &["db"]), c("db", &[]), c("web", &["app"])];
        let sorted = sort_by_dependencies(&input).unwrap();
        let ns = names(&sorted);
        let pos = |n: &str| ns.iter().position(|x| *x == n).unwrap();
        assert!(pos("db") < pos("app"));
        assert!(pos("app") < pos("web"));
    }

    #[test]
    fn independent_containers_keep_input_order() {
        let input = vec![c("c", &[]), c("a", &[]), c("b", &[])];
        let sorted = sort_by_dependencies(&input).unwrap();
        assert_eq!(names(&sorted), vec!["c", "a", "b"]);
    }

    #[test]
    fn sort_is_deterministic() {
        let input = vec![c("z", &["m"]), c("m", &[]), c("a", &["m"])];
        let first = names(&sort_by_dependencies(&input).unwrap())
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        for _ in 0..5 {
            let again = names(&sort_by_dependencies(&input).unwrap())
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn unresolved_links_are_ignored() {
        let input = vec![c("app", &["outside-scope"]), c("db", &[])];
        let sorted = sort_by_dependencies(&input).unwrap();
        assert_eq!(sorted.len(), 2);
    }

    #[test]
    fn cycle_is_an_error_naming_a_cycle_vertex() {
        let input = vec![c("a", &["b"]), c("b", &["a"])];
        let err = sort_by_dependencies(&input).unwrap_err();
        match err {
            SortError::CircularReference(name) => assert!(name == "a" || name == "b"),
        }
    }

    #[test]
    fn detect_cycles_returns_all_cycle_vertices() {
        let input = vec![
            c("a", &["b"]),
            c("b", &["c"]),
            c("c", &["a"]),
            c("standalone", &[]),
            c("leaf", &["standalone"]),
        ];
        let cyclic = detect_cycles(&input);
        assert_eq!(cyclic.len(), 3);
        assert!(cyclic.contains(&ContainerId::from("a")));
        assert!(cyclic.contains(&ContainerId::from("b")));
        assert!(cyclic.contains(&ContainerId::from("c")));
    }

    #[test]
    fn detect_cycles_empty_for_dag() {
        let input = vec![c("app", &["db"]), c("db", &[])];
        assert!(detect_cycles(&input).is_empty());
    }

    #[test]
    fn dependents_of_a_cycle_are_not_cyclic_themselves() {
        let input = vec![c("a", &["b"]), c("b", &["a"]), c("edge", &["a"])];
        let cyclic = detect_cycles(&input);
        assert_eq!(cyclic.len(), 2);
        assert!(!cyclic.contains(&ContainerId::from("edge")));
    }
}
