// src/core/graph.rs — Dependency graph over plan steps

use std::collections::HashMap;

use super::types::Step;

/// Kahn levels: each wave holds step indices whose dependencies all sit in earlier
/// waves, in plan order. Dependencies naming unknown steps are ignored.
///
/// On a cycle, returns the step ids along one cycle.
pub fn waves(steps: &[Step]) -> Result<Vec<Vec<usize>>, Vec<String>> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.step_id.as_str(), i))
        .collect();

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut placed = vec![false; steps.len()];
    let mut result = Vec::new();
    let mut current: Vec<usize> = (0..steps.len()).filter(|&i| indegree[i] == 0).collect();
    let mut placed_count = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            placed[i] = true;
            placed_count += 1;
            for &d in &dependents[i] {
                indegree[d] -= 1;
                if indegree[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        result.push(std::mem::take(&mut current));
        current = next;
    }

    if placed_count < steps.len() {
        return Err(find_cycle(steps, &index, &placed));
    }
    Ok(result)
}

/// Walk unplaced steps along dependency edges until one repeats.
fn find_cycle(steps: &[Step], index: &HashMap<&str, usize>, placed: &[bool]) -> Vec<String> {
    let Some(start) = (0..steps.len()).find(|&i| !placed[i]) else {
        return Vec::new();
    };
    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut node = start;
    loop {
        if let Some(&at) = position.get(&node) {
            return path[at..]
                .iter()
                .rev()
                .map(|&i| steps[i].step_id.clone())
                .collect();
        }
        position.insert(node, path.len());
        path.push(node);
        // Every unplaced step has at least one unplaced dependency.
        let next = steps[node]
            .depends_on
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .find(|&d| !placed[d]);
        match next {
            Some(n) => node = n,
            None => return path.iter().map(|&i| steps[i].step_id.clone()).collect(),
        }
    }
}
