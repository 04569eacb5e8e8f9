//! Loop execution
//!
//! Runs a loop state's nested body sub-graph either over a resolved
//! collection (`forEach`, sequential or parallel-batched) or while a guard
//! holds (`while`, always sequential). Hitting the loop's own iteration or
//! wall-clock bounds is a soft stop: the partial results are kept and a
//! `loopError` string is recorded for the caller to route.

use crate::builtin::ActionDispatcher;
use crate::condition::{evaluate, first_matching_transition};
use crate::definition::{LoopSpec, StateDefinition, StateKind};
use crate::expression::{resolve, resolve_inputs};
use futures::future;
use playops_core::{merge_output, Error, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Hard cap on states executed per body run; bounds cyclic body graphs.
const MAX_BODY_STEPS: u32 = 50;

/// What a finished (or bound-stopped) loop produced.
#[derive(Debug)]
pub(crate) struct LoopOutcome {
    pub results: Vec<Value>,
    pub iteration_count: u32,
    /// Set when the loop stopped on maxIterations or timeoutMs
    pub loop_error: Option<String>,
}

impl LoopOutcome {
    /// The `{results, iterationCount}` object merged into context.
    pub fn to_output(&self) -> Value {
        json!({
            "results": self.results,
            "iterationCount": self.iteration_count,
        })
    }
}

/// Run a loop state. Sequential iterations fold their body context back
/// into `context`; parallel batches only contribute to `results`.
/// Body action errors propagate as `Err`; loop bounds do not.
pub(crate) async fn run_loop(
    dispatcher: &ActionDispatcher,
    state_name: &str,
    spec: &LoopSpec,
    context: &mut Map<String, Value>,
) -> Result<LoopOutcome> {
    let deadline = Instant::now() + Duration::from_millis(spec.timeout_ms);
    let mut results: Vec<Value> = Vec::new();
    let mut iteration_count: u32 = 0;
    let mut loop_error: Option<String> = None;

    if let Some(for_each) = &spec.for_each {
        let collection = resolve(for_each, context);
        let items = collection.as_array().ok_or_else(|| {
            Error::action(format!(
                "forEach in state '{}' did not resolve to an array",
                state_name
            ))
        })?;

        let item_var = spec.item_variable.as_deref().unwrap_or("item");
        let index_var = spec.index_variable.as_deref().unwrap_or("index");
        let batch_size = spec.parallel_batch_size.unwrap_or(0);

        if batch_size > 0 {
            let mut index = 0usize;
            for chunk in items.chunks(batch_size) {
                if iteration_count >= spec.max_iterations {
                    loop_error = Some(max_iterations_error(state_name, spec.max_iterations));
                    break;
                }
                if Instant::now() >= deadline {
                    loop_error = Some(timeout_error(state_name, spec.timeout_ms));
                    break;
                }

                // never run past the iteration cap mid-batch
                let remaining = (spec.max_iterations - iteration_count) as usize;
                let batch = &chunk[..chunk.len().min(remaining)];

                debug!(
                    state = %state_name,
                    batch_len = batch.len(),
                    start_index = index,
                    "Running parallel loop batch"
                );

                let futures: Vec<_> = batch
                    .iter()
                    .enumerate()
                    .map(|(offset, item)| {
                        let mut body_ctx = context.clone();
                        body_ctx.insert(item_var.to_string(), item.clone());
                        body_ctx.insert(index_var.to_string(), json!(index + offset));
                        run_body(dispatcher, &spec.body_states, &spec.body_initial, body_ctx)
                    })
                    .collect();

                for outcome in future::join_all(futures).await {
                    let body_ctx = outcome?;
                    results.push(Value::Object(body_ctx));
                    iteration_count += 1;
                }
                index += batch.len();
            }
        } else {
            for (index, item) in items.iter().enumerate() {
                if iteration_count >= spec.max_iterations {
                    loop_error = Some(max_iterations_error(state_name, spec.max_iterations));
                    break;
                }
                if Instant::now() >= deadline {
                    loop_error = Some(timeout_error(state_name, spec.timeout_ms));
                    break;
                }

                let mut body_ctx = context.clone();
                body_ctx.insert(item_var.to_string(), item.clone());
                body_ctx.insert(index_var.to_string(), json!(index));

                let body_ctx =
                    run_body(dispatcher, &spec.body_states, &spec.body_initial, body_ctx).await?;
                results.push(Value::Object(body_ctx.clone()));
                *context = body_ctx;
                iteration_count += 1;
            }
        }
    } else if let Some(guard) = &spec.while_guard {
        loop {
            if iteration_count >= spec.max_iterations {
                loop_error = Some(max_iterations_error(state_name, spec.max_iterations));
                break;
            }
            if Instant::now() >= deadline {
                loop_error = Some(timeout_error(state_name, spec.timeout_ms));
                break;
            }
            if !evaluate(guard, context) {
                break;
            }

            let body_ctx =
                run_body(dispatcher, &spec.body_states, &spec.body_initial, context.clone())
                    .await?;
            results.push(Value::Object(body_ctx.clone()));
            *context = body_ctx;
            iteration_count += 1;
        }
    } else {
        return Err(Error::definition(format!(
            "loop state '{}' has neither forEach nor while",
            state_name
        )));
    }

    if let Some(error) = &loop_error {
        warn!(state = %state_name, iteration_count, "{}", error);
    }

    Ok(LoopOutcome {
        results,
        iteration_count,
        loop_error,
    })
}

/// Restricted sub-interpreter for a loop body: invoke and always states
/// only (plus final as a terminator). Returns the body's final context.
pub(crate) async fn run_body(
    dispatcher: &ActionDispatcher,
    body_states: &HashMap<String, StateDefinition>,
    body_initial: &str,
    mut context: Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut current = body_initial.to_string();
    let mut steps: u32 = 0;

    loop {
        steps += 1;
        if steps > MAX_BODY_STEPS {
            return Err(Error::definition(format!(
                "loop body exceeded maximum iterations ({})",
                MAX_BODY_STEPS
            )));
        }

        let state = body_states.get(&current).ok_or_else(|| {
            Error::definition(format!("unknown loop body state '{}'", current))
        })?;

        match state.kind()? {
            StateKind::Final => return Ok(context),
            StateKind::Invoke => {
                let Some(invoke) = state.invoke.as_ref() else {
                    return Err(Error::internal(format!(
                        "loop body state '{}' missing invoke spec",
                        current
                    )));
                };
                let input = resolve_inputs(&invoke.input, &context);

                match dispatcher.invoke(&invoke.action, input).await {
                    Ok(output) => {
                        merge_output(&mut context, &current, &output);
                        if let Some(done) = &invoke.on_done {
                            current = done.target().to_string();
                        } else if let Some(next) = first_match(state, &context) {
                            current = next;
                        } else {
                            return Ok(context);
                        }
                    }
                    Err(e) => match &invoke.on_error {
                        Some(on_error) if e.is_action_failure() => {
                            context.insert(format!("{}_error", current), json!(e.to_string()));
                            current = on_error.target().to_string();
                        }
                        _ => return Err(e),
                    },
                }
            }
            StateKind::Always => match first_match(state, &context) {
                Some(next) => current = next,
                None => return Ok(context),
            },
            StateKind::Loop | StateKind::On => {
                return Err(Error::definition(format!(
                    "loop body state '{}' uses a nested loop/on, which is not supported",
                    current
                )));
            }
        }
    }
}

fn first_match(state: &StateDefinition, context: &Map<String, Value>) -> Option<String> {
    let transitions = state.always.as_ref()?;
    first_matching_transition(transitions, context).map(String::from)
}

fn max_iterations_error(state_name: &str, max: u32) -> String {
    format!("loop '{}' reached maximum iterations ({})", state_name, max)
}

fn timeout_error(state_name: &str, timeout_ms: u64) -> String {
    format!("loop '{}' timed out after {}ms", state_name, timeout_ms)
}
