//! TransformPlan - dependency-ordered groups of transforms
//!
//! Each transform declares the tables it reads and the one table it writes.
//! Groups are computed by layered topological sort (Kahn):
//! - group 0 holds every transform reading only base tables
//! - group k holds transforms whose transform-produced inputs sit in groups < k
//! - definition order is kept inside a group
//!
//! Everything is checked before any operation runs:
//! - every input has a producer (transform, extract or external table)
//! - no table has two producers
//! - no dependency cycle (DFS three-color, reported with its path)

use rustc_hash::FxHashMap;

use crate::ast::TransformDef;
use crate::error::{EltError, Result};

/// Parallel groups of transform indexes, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformPlan {
    groups: Vec<Vec<usize>>,
}

impl TransformPlan {
    /// Plan `transforms` given the tables that already exist when the
    /// transform stage starts (`base`: table → name of whatever provides it)
    pub fn build(transforms: &[TransformDef], base: &FxHashMap<&str, &str>) -> Result<Self> {
        let producers = collect_producers(transforms, base)?;

        // deps[i]: transforms that must finish before transform i
        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(transforms.len());
        for t in transforms {
            let mut needed = Vec::new();
            for input in &t.inputs {
                if input == &t.output {
                    return Err(EltError::CycleDetected {
                        cycle: format!("{} → {}", t.name, t.name),
                    });
                }
                match producers.get(input.as_str()) {
                    Some(&j) => needed.push(j),
                    None if base.contains_key(input.as_str()) => {}
                    None => {
                        return Err(EltError::MissingProducer {
                            operation: t.name.clone(),
                            table: input.clone(),
                        })
                    }
                }
            }
            needed.sort_unstable();
            needed.dedup();
            deps.push(needed);
        }

        detect_cycles(transforms, &deps)?;

        Ok(Self {
            groups: layer(&deps),
        })
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Transform names per group (for display)
    pub fn names<'a>(&self, transforms: &'a [TransformDef]) -> Vec<Vec<&'a str>> {
        self.groups
            .iter()
            .map(|g| g.iter().map(|&i| transforms[i].name.as_str()).collect())
            .collect()
    }
}

/// output table → transform index, rejecting second producers
fn collect_producers<'a>(
    transforms: &'a [TransformDef],
    base: &FxHashMap<&str, &str>,
) -> Result<FxHashMap<&'a str, usize>> {
    let mut producers: FxHashMap<&str, usize> =
        FxHashMap::with_capacity_and_hasher(transforms.len(), Default::default());

    for (i, t) in transforms.iter().enumerate() {
        if let Some(existing) = base.get(t.output.as_str()) {
            return Err(EltError::DuplicateProducer {
                table: t.output.clone(),
                first: (*existing).to_string(),
                second: t.name.clone(),
            });
        }
        if let Some(&j) = producers.get(t.output.as_str()) {
            return Err(EltError::DuplicateProducer {
                table: t.output.clone(),
                first: transforms[j].name.clone(),
                second: t.name.clone(),
            });
        }
        producers.insert(t.output.as_str(), i);
    }

    Ok(producers)
}

/// DFS three-color cycle detection over the dependency edges
fn detect_cycles(transforms: &[TransformDef], deps: &[Vec<usize>]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn dfs(
        node: usize,
        deps: &[Vec<usize>],
        colors: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> std::result::Result<(), Vec<usize>> {
        colors[node] = Color::Gray;
        stack.push(node);

        for &next in &deps[node] {
            match colors[next] {
                Color::Gray => {
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(next);
                    return Err(cycle);
                }
                Color::White => dfs(next, deps, colors, stack)?,
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        Ok(())
    }

    let mut colors = vec![Color::White; deps.len()];
    let mut stack = Vec::new();

    for node in 0..deps.len() {
        if colors[node] == Color::White {
            if let Err(cycle) = dfs(node, deps, &mut colors, &mut stack) {
                // Edges point at dependencies; report in data-flow order
                let path: Vec<&str> = cycle
                    .iter()
                    .rev()
                    .map(|&i| transforms[i].name.as_str())
                    .collect();
                return Err(EltError::CycleDetected {
                    cycle: path.join(" → "),
                });
            }
        }
    }

    Ok(())
}

/// Kahn layering; assumes the graph is acyclic
fn layer(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut indegree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deps.len()];
    for (i, needed) in deps.iter().enumerate() {
        for &j in needed {
            dependents[j].push(i);
        }
    }

    let mut groups = Vec::new();
    let mut current: Vec<usize> = (0..deps.len()).filter(|&i| indegree[i] == 0).collect();

    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dependents[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        groups.push(current);
        current = next;
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t(name: &str, inputs: &[&str], output: &str) -> TransformDef {
        TransformDef {
            name: name.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.to_string(),
            script: String::new(),
        }
    }

    fn base<'a>(tables: &[&'a str]) -> FxHashMap<&'a str, &'a str> {
        tables.iter().map(|&t| (t, "extract")).collect()
    }

    #[test]
    fn independent_transforms_share_one_group() {
        let transforms = [t("a", &["x"], "a_out"), t("b", &["y"], "b_out")];
        let plan = TransformPlan::build(&transforms, &base(&["x", "y"])).unwrap();
        assert_eq!(plan.groups(), &[vec![0, 1]]);
    }

    #[test]
    fn chains_become_successive_groups() {
        // declared out of order on purpose
        let transforms = [
            t("final", &["mid", "x"], "final_out"),
            t("mid", &["first_out"], "mid"),
            t("first", &["x"], "first_out"),
        ];
        let plan = TransformPlan::build(&transforms, &base(&["x"])).unwrap();
        assert_eq!(plan.names(&transforms), vec![vec!["first"], vec!["mid"], vec!["final"]]);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn diamond_keeps_definition_order_inside_group() {
        let transforms = [
            t("root", &["x"], "r"),
            t("right", &["r"], "rr"),
            t("left", &["r"], "rl"),
            t("join", &["rl", "rr"], "j"),
        ];
        let plan = TransformPlan::build(&transforms, &base(&["x"])).unwrap();
        assert_eq!(plan.groups(), &[vec![0], vec![1, 2], vec![3]]);
    }

    #[test]
    fn missing_producer_names_operation_and_table() {
        let transforms = [t("ucit2json", &["ucit"], "ucit2json")];
        let err = TransformPlan::build(&transforms, &base(&[])).unwrap_err();
        assert_eq!(err.code(), "ELT-021");
        assert!(err.to_string().contains("'ucit2json' reads table 'ucit'"));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let transforms = [
            t("a", &["c_out"], "a_out"),
            t("b", &["a_out"], "b_out"),
            t("c", &["b_out"], "c_out"),
        ];
        let err = TransformPlan::build(&transforms, &base(&[])).unwrap_err();
        assert_eq!(err.code(), "ELT-020");
        let msg = err.to_string();
        assert!(msg.contains("a") && msg.contains("b") && msg.contains("c"), "{msg}");
        assert!(msg.contains(" → "));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let transforms = [t("loop", &["loop_t"], "loop_t")];
        let err = TransformPlan::build(&transforms, &base(&[])).unwrap_err();
        assert!(err.to_string().contains("loop → loop"));
    }

    #[test]
    fn duplicate_producers_are_rejected() {
        let transforms = [t("a", &[], "same"), t("b", &[], "same")];
        let err = TransformPlan::build(&transforms, &base(&[])).unwrap_err();
        assert_eq!(err.code(), "ELT-022");

        let transforms = [t("a", &[], "fak")];
        let err = TransformPlan::build(&transforms, &base(&["fak"])).unwrap_err();
        assert!(err.to_string().contains("'extract' and 'a'"));
    }

    #[test]
    fn empty_plan() {
        let plan = TransformPlan::build(&[], &base(&[])).unwrap();
        assert!(plan.is_empty());
    }
}
