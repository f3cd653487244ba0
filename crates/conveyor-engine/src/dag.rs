//! Compiling a workflow into an Airflow DAG file.
//!
//! Each task becomes a `BashOperator` that runs the job executor on the
//! task's own spec; edges become `>>` dependencies. Output is stable for
//! a given spec: tasks are emitted in topological order with ties broken
//! by task id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use conveyor_types::spec::{CompileAirflowSpec, JobKind};

use crate::errors::JobError;

/// Replace every character outside Airflow's id alphabet with `_`.
#[must_use]
pub fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[must_use]
pub fn dag_id(spec: &CompileAirflowSpec) -> String {
    sanitize_id(&format!("{}-{}", spec.workflow_id, spec.workflow_name))
}

/// Check the task graph and return task ids in execution order.
///
/// # Errors
///
/// Returns [`JobError::InvalidDag`] for nested compile tasks, edges to
/// unknown tasks, task ids that collide once sanitized, or cycles.
pub fn execution_order(spec: &CompileAirflowSpec) -> Result<Vec<String>, JobError> {
    let mut sanitized = BTreeMap::new();
    for (task_id, task) in &spec.specs {
        if task.kind() == JobKind::CompileAirflow {
            return Err(JobError::InvalidDag(format!(
                "task '{task_id}' is itself a compile job"
            )));
        }
        if let Some(other) = sanitized.insert(sanitize_id(task_id), task_id) {
            return Err(JobError::InvalidDag(format!(
                "task ids '{other}' and '{task_id}' collide as '{}'",
                sanitize_id(task_id)
            )));
        }
    }

    let mut in_degree: BTreeMap<&str, usize> =
        spec.specs.keys().map(|id| (id.as_str(), 0)).collect();
    let mut downstream: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for edge in &spec.edges {
        for end in [&edge.from, &edge.to] {
            if !spec.specs.contains_key(end) {
                return Err(JobError::InvalidDag(format!(
                    "edge {} -> {} references unknown task '{end}'",
                    edge.from, edge.to
                )));
            }
        }
        if downstream
            .entry(edge.from.as_str())
            .or_default()
            .insert(edge.to.as_str())
        {
            *in_degree.entry(edge.to.as_str()).or_default() += 1;
        }
    }

    // Kahn's algorithm; the ready set is ordered so output is stable.
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(spec.specs.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for &next in downstream.get(id).into_iter().flatten() {
            if let Some(d) = in_degree.get_mut(next) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if order.len() != spec.specs.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(id, _)| *id)
            .collect();
        return Err(JobError::InvalidDag(format!(
            "cycle among tasks: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

fn shell_word(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+@%,".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Python string literal for `s`.
fn py_str(s: &str) -> Result<String, JobError> {
    serde_json::to_string(s).map_err(|e| JobError::Internal(format!("cannot quote string: {e}")))
}

/// Render the DAG file for `spec`.
///
/// `executor_command` is the program (and leading arguments) each task
/// runs; `run --spec <base64>` is appended.
///
/// # Errors
///
/// Returns [`JobError::InvalidDag`] if the graph is invalid (see
/// [`execution_order`]) or [`JobError::SpecParse`] if a task spec cannot
/// be serialized.
pub fn render_airflow_dag(
    spec: &CompileAirflowSpec,
    executor_command: &[String],
) -> Result<String, JobError> {
    let order = execution_order(spec)?;
    let executor = executor_command
        .iter()
        .map(|w| shell_word(w))
        .collect::<Vec<_>>()
        .join(" ");

    let mut out = String::new();
    let _ = writeln!(out, "# Generated by conveyor for workflow {}. Do not edit.", spec.workflow_id);
    out.push_str("from datetime import datetime\n\n");
    out.push_str("from airflow import DAG\n");
    out.push_str("from airflow.operators.bash import BashOperator\n\n");
    out.push_str("with DAG(\n");
    let _ = writeln!(out, "    dag_id={},", py_str(&dag_id(spec))?);
    let _ = writeln!(out, "    description={},", py_str(&spec.workflow_name)?);
    out.push_str("    start_date=datetime(2022, 1, 1),\n");
    out.push_str("    schedule=None,\n");
    out.push_str("    catchup=False,\n");
    out.push_str(") as dag:\n");

    let mut vars = BTreeMap::new();
    for (idx, task_id) in order.iter().enumerate() {
        let Some(task) = spec.specs.get(task_id) else {
            continue;
        };
        let var = format!("t{idx}");
        let command = format!("{executor} run --spec {}", task.to_base64()?);
        let _ = writeln!(
            out,
            "    {var} = BashOperator(task_id={}, bash_command={})",
            py_str(&sanitize_id(task_id))?,
            py_str(&command)?
        );
        vars.insert(task_id.as_str(), var);
    }
    if order.is_empty() {
        out.push_str("    pass\n");
    }

    let mut edges: Vec<(&str, &str)> = spec
        .edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let rank = |id: &str| order.iter().position(|t| t == id);
    edges.sort_by_key(|(from, to)| (rank(from), rank(to)));
    if !edges.is_empty() {
        out.push('\n');
    }
    for (from, to) in edges {
        if let (Some(a), Some(b)) = (vars.get(from), vars.get(to)) {
            let _ = writeln!(out, "    {a} >> {b}");
        }
    }

    tracing::debug!(dag_id = %dag_id(spec), tasks = order.len(), "Rendered Airflow DAG");
    Ok(out)
}
