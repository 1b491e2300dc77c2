use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde_json::Value;

use crate::config::SmithConfig;
use crate::schemas::{Dag, DagNode};
use crate::tools::ToolRegistry;
use crate::utils::helper::{reference_regex, whole_reference};

const NARRATIVE_KEYWORDS: &[&str] = &[
    "write", "report", "summar", "essay", "explain", "describe", "story", "narrative", "compose",
];

/// Whether the utterance asks for a written narrative, which obliges the
/// plan to close on a synthesis tool.
pub fn requests_narrative(utterance: &str) -> bool {
    let lowered = utterance.to_lowercase();
    NARRATIVE_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}

/// The planner's hard gate. Checks every structural and schema invariant,
/// then topologically normalizes the graph: node ids are densely renumbered
/// in dependency order (ties broken by original id), and `depends_on`,
/// `final_output_node`, and `$<id>` input references are rewritten to match.
///
/// Error messages are written to be fed back to the model in a repair
/// prompt, so they name the offending node and rule.
pub fn validate_dag(
    dag: &mut Dag,
    registry: &ToolRegistry,
    config: &SmithConfig,
    utterance: &str,
) -> Result<(), String> {
    if dag.nodes.is_empty() {
        return Err("plan contains no nodes".to_string());
    }

    let mut ids = HashSet::new();
    for node in &dag.nodes {
        if !ids.insert(node.id) {
            return Err(format!("duplicate node id {}", node.id));
        }
    }

    for node in &dag.nodes {
        if node.depends_on.contains(&node.id) {
            return Err(format!("node {} depends on itself", node.id));
        }
        for dep in &node.depends_on {
            if !ids.contains(dep) {
                return Err(format!(
                    "node {} depends on nonexistent node {dep}",
                    node.id
                ));
            }
        }
    }

    if !ids.contains(&dag.final_output_node) {
        return Err(format!(
            "final_output_node {} is not a node in the plan",
            dag.final_output_node
        ));
    }

    let order = topological_order(&dag.nodes)?;

    for node in &mut dag.nodes {
        check_node_against_registry(node, registry, config)?;
    }

    renumber(dag, &order);

    if requests_narrative(utterance) {
        check_synthesis_chain(dag, registry)?;
    }

    Ok(())
}

/// Kahn's algorithm with a min-heap so equal-depth nodes keep their original
/// relative order. Returns the old ids in execution order, or the cycle
/// members on failure.
fn topological_order(nodes: &[DagNode]) -> Result<Vec<usize>, String> {
    let mut indegree: HashMap<usize, usize> = nodes.iter().map(|n| (n.id, 0)).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for node in nodes {
        for dep in &node.depends_on {
            *indegree.entry(node.id).or_default() += 1;
            dependents.entry(*dep).or_default().push(node.id);
        }
    }

    let mut heap: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(id)) = heap.pop() {
        order.push(id);
        for dependent in dependents.get(&id).into_iter().flatten() {
            let degree = indegree
                .get_mut(dependent)
                .ok_or_else(|| format!("node {dependent} missing from indegree table"))?;
            *degree -= 1;
            if *degree == 0 {
                heap.push(Reverse(*dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        let ordered: HashSet<usize> = order.iter().copied().collect();
        let mut cycle: Vec<usize> = nodes
            .iter()
            .map(|n| n.id)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle.sort_unstable();
        return Err(format!(
            "dependency cycle involving nodes {:?}; depends_on must be acyclic",
            cycle
        ));
    }

    Ok(order)
}

fn check_node_against_registry(
    node: &mut DagNode,
    registry: &ToolRegistry,
    config: &SmithConfig,
) -> Result<(), String> {
    let entry = registry
        .lookup(&node.tool)
        .map_err(|_| format!("node {} uses unknown tool \"{}\"", node.id, node.tool))?;
    let descriptor = &entry.descriptor;
    node.function = descriptor.function_id.clone();

    if contains_placeholder(&Value::Object(node.inputs.clone())) {
        return Err(format!(
            "node {} inputs contain a template placeholder ({{{{...}}}}); \
             pass upstream outputs as \"$<id>\" with a depends_on edge instead",
            node.id
        ));
    }

    descriptor.parameters.apply_defaults(&mut node.inputs);
    descriptor
        .parameters
        .validate(&node.inputs, true)
        .map_err(|reason| format!("node {} ({}): {reason}", node.id, node.tool))?;

    let deps: HashSet<usize> = node.depends_on.iter().copied().collect();
    for reference in collect_references(&Value::Object(node.inputs.clone())) {
        if !deps.contains(&reference) {
            return Err(format!(
                "node {} reads \"${reference}\" but does not list {reference} in depends_on",
                node.id
            ));
        }
    }

    let timeout = node
        .timeout
        .or(descriptor.default_timeout)
        .unwrap_or(config.default_timeout);
    if timeout <= 0.0 {
        return Err(format!("node {} has non-positive timeout {timeout}", node.id));
    }
    node.timeout = Some(timeout);
    node.retry = Some(node.retry.unwrap_or(config.max_retries));

    Ok(())
}

fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}

/// Every `$<id>` mentioned anywhere in an input value, whole or embedded.
pub(crate) fn collect_references(value: &Value) -> Vec<usize> {
    let mut refs = Vec::new();
    collect_references_into(value, &mut refs);
    refs
}

fn collect_references_into(value: &Value, refs: &mut Vec<usize>) {
    match value {
        Value::String(s) => {
            if let Some(id) = whole_reference(s) {
                refs.push(id);
            } else {
                for caps in reference_regex().captures_iter(s) {
                    if let Some(id) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                        refs.push(id);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references_into(item, refs);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references_into(item, refs);
            }
        }
        _ => {}
    }
}

/// Applies the topological renumbering in place and re-sorts the node list.
fn renumber(dag: &mut Dag, order: &[usize]) {
    let mapping: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(new, old)| (*old, new))
        .collect();

    for node in &mut dag.nodes {
        node.id = mapping[&node.id];
        let mut deps: Vec<usize> = node.depends_on.iter().map(|d| mapping[d]).collect();
        deps.sort_unstable();
        deps.dedup();
        node.depends_on = deps;
        for value in node.inputs.values_mut() {
            rewrite_references(value, &mapping);
        }
    }
    dag.final_output_node = mapping[&dag.final_output_node];
    dag.nodes.sort_by_key(|n| n.id);
}

fn rewrite_references(value: &mut Value, mapping: &HashMap<usize, usize>) {
    match value {
        Value::String(s) => {
            let rewritten = reference_regex().replace_all(s, |caps: &regex::Captures| {
                let old: usize = caps[1].parse().unwrap_or(usize::MAX);
                match mapping.get(&old) {
                    Some(new) => format!("${new}"),
                    None => caps[0].to_string(),
                }
            });
            *s = rewritten.into_owned();
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, mapping);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_references(item, mapping);
            }
        }
        _ => {}
    }
}

/// Narrative plans close on a synthesis tool, and multiple synthesis nodes
/// must form one linear chain so the narrative composes in order.
fn check_synthesis_chain(dag: &Dag, registry: &ToolRegistry) -> Result<(), String> {
    let final_node = dag
        .get(dag.final_output_node)
        .ok_or_else(|| format!("final_output_node {} missing", dag.final_output_node))?;
    let final_is_synthesis = registry
        .lookup(&final_node.tool)
        .map(|e| e.descriptor.is_synthesis())
        .unwrap_or(false);
    if !final_is_synthesis {
        return Err(format!(
            "the request asks for a written narrative, so final_output_node ({}) must be a \
             synthesis tool, not \"{}\"",
            final_node.id, final_node.tool
        ));
    }

    let synthesis_ids: Vec<usize> = dag
        .nodes
        .iter()
        .filter(|n| {
            registry
                .lookup(&n.tool)
                .map(|e| e.descriptor.is_synthesis())
                .unwrap_or(false)
        })
        .map(|n| n.id)
        .collect();

    for pair in synthesis_ids.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let depends = dag
            .get(next)
            .map(|n| n.depends_on.contains(&prev))
            .unwrap_or(false);
        if !depends {
            return Err(format!(
                "synthesis node {next} must depend on the previous synthesis node {prev} so \
                 the narrative composes linearly"
            ));
        }
    }

    Ok(())
}
