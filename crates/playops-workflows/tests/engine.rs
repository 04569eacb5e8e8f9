//! End-to-end engine tests against an in-memory store.

use playops_store::{
    ExecutionStatus, NewWorkflow, NodeStatus, SqliteStore, WorkflowStore,
};
use playops_workflows::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

async fn engine() -> (WorkflowEngine, Arc<SqliteStore>) {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("playops_workflows=debug")
        .try_init();

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let bus = EventBus::new();
    let dispatcher = Arc::new(ActionDispatcher::new(
        Arc::new(ActionRegistry::with_builtin_catalog()),
        Arc::new(NetworkStrategy::new("http://127.0.0.1:1")),
        bus.clone(),
        None,
    ));
    let engine = WorkflowEngine::new(
        Arc::clone(&store) as Arc<dyn WorkflowStore>,
        bus,
        dispatcher,
    );
    (engine, store)
}

async fn register(store: &SqliteStore, name: &str, definition: Value) -> i64 {
    store
        .insert_workflow(NewWorkflow {
            name: name.to_string(),
            enabled: true,
            definition,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn set_variable_run_completes_with_bound_context() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "bind-x",
        json!({
            "id": "bind-x",
            "initialState": "start",
            "states": {
                "start": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "x", "value": 5},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, nodes) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_state.as_deref(), Some("done"));
    assert_eq!(execution.context["x"], json!(5));
    // output is written both namespaced and flat
    assert_eq!(execution.context["start_output"]["x"], json!(5));

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node_id, "start");
    assert_eq!(nodes[0].status, NodeStatus::Completed);
    assert!(nodes[0].duration_ms.is_some());
}

#[tokio::test]
async fn failing_action_without_on_error_fails_the_run() {
    let (engine, store) = engine().await;
    // core.executeSql with no SQL executor configured always fails
    let workflow_id = register(
        &store,
        "sql-fails",
        json!({
            "id": "sql-fails",
            "initialState": "query",
            "states": {
                "query": {
                    "invoke": {
                        "action": "core.executeSql",
                        "input": {"statement": "SELECT 1"},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, nodes) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("executeSql"));
    assert_eq!(nodes[0].status, NodeStatus::Failed);
    assert!(nodes[0].error.is_some());
}

#[tokio::test]
async fn failing_action_with_on_error_recovers() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "sql-recovers",
        json!({
            "id": "sql-recovers",
            "initialState": "query",
            "states": {
                "query": {
                    "invoke": {
                        "action": "core.executeSql",
                        "input": {"statement": "SELECT 1"},
                        "onDone": "done",
                        "onError": "fallback"
                    }
                },
                "fallback": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "recovered", "value": true},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["recovered"], json!(true));
    // the failure message lands in context under the state's error key
    assert!(execution.context["query_error"].as_str().is_some());
}

fn condition_routing_definition() -> Value {
    json!({
        "id": "route",
        "initialState": "route",
        "states": {
            "route": {
                "always": [
                    {
                        "target": "active",
                        "guard": {"key": "status", "operator": "==", "value": "active"}
                    },
                    {"target": "inactive"}
                ]
            },
            "active": {"type": "final"},
            "inactive": {"type": "final"}
        }
    })
}

#[tokio::test]
async fn guarded_always_routes_on_match() {
    let (engine, store) = engine().await;
    let workflow_id = register(&store, "route", condition_routing_definition()).await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"status": "active"}), None)
        .await
        .unwrap();
    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_state.as_deref(), Some("active"));
}

#[tokio::test]
async fn guarded_always_falls_back_without_match() {
    let (engine, store) = engine().await;
    let workflow_id = register(&store, "route", condition_routing_definition()).await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"status": "banned"}), None)
        .await
        .unwrap();
    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.current_state.as_deref(), Some("inactive"));
}

#[tokio::test]
async fn for_each_over_empty_collection_takes_done_path() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "empty-each",
        json!({
            "id": "empty-each",
            "initialState": "each",
            "states": {
                "each": {
                    "loop": {
                        "forEach": "$.items",
                        "bodyInitial": "step",
                        "bodyStates": {"step": {"type": "final"}},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"items": []}), None)
        .await
        .unwrap();

    let (execution, nodes) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["iterationCount"], json!(0));
    assert_eq!(execution.context["results"], json!([]));
    assert_eq!(execution.context["each_output"]["iterationCount"], json!(0));
    assert_eq!(nodes[0].node_type, "loop");
    assert_eq!(nodes[0].status, NodeStatus::Completed);
}

#[tokio::test]
async fn parallel_for_each_processes_every_item() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "batched",
        json!({
            "id": "batched",
            "initialState": "each",
            "states": {
                "each": {
                    "loop": {
                        "forEach": "$.items",
                        "parallelBatchSize": 2,
                        "bodyInitial": "step",
                        "bodyStates": {
                            "step": {
                                "invoke": {
                                    "action": "core.transform",
                                    "input": {"handled": "$.item"}
                                }
                            }
                        },
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"items": [1, 2, 3, 4, 5]}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["iterationCount"], json!(5));
    assert_eq!(
        execution.context["results"].as_array().unwrap().len(),
        5
    );
}

#[tokio::test]
async fn while_loop_hitting_max_iterations_continues_via_done() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "capped-while",
        json!({
            "id": "capped-while",
            "initialState": "poll",
            "states": {
                "poll": {
                    "loop": {
                        "while": {"key": "keepGoing", "operator": "==", "value": true},
                        "maxIterations": 3,
                        "bodyInitial": "tick",
                        "bodyStates": {
                            "tick": {
                                "invoke": {
                                    "action": "core.setVariable",
                                    "input": {"name": "lastTick", "value": "tick"}
                                }
                            }
                        },
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"keepGoing": true}), None)
        .await
        .unwrap();

    let (execution, nodes) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["iterationCount"], json!(3));
    // the bound stop is recorded on the loop node, not fatal
    assert!(nodes[0].error.as_deref().unwrap().contains("maximum iterations"));
    assert_eq!(nodes[0].status, NodeStatus::Completed);
}

#[tokio::test]
async fn loop_bound_with_on_error_routes_through_it() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "bound-routed",
        json!({
            "id": "bound-routed",
            "initialState": "poll",
            "states": {
                "poll": {
                    "loop": {
                        "while": {"key": "keepGoing", "operator": "==", "value": true},
                        "maxIterations": 2,
                        "bodyInitial": "tick",
                        "bodyStates": {"tick": {"type": "final"}},
                        "onDone": "done",
                        "onError": "report"
                    }
                },
                "report": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "reported", "value": "$.poll_error"},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"keepGoing": true}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.context["reported"]
        .as_str()
        .unwrap()
        .contains("maximum iterations"));
}

#[tokio::test]
async fn unknown_action_fails_with_definition_error() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "bad-action",
        json!({
            "id": "bad-action",
            "initialState": "start",
            "states": {
                "start": {
                    "invoke": {"action": "nope.missing", "onDone": "done"}
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("Unknown action"));
}

#[tokio::test]
async fn disabled_workflow_is_rejected() {
    let (engine, store) = engine().await;
    let record = store
        .insert_workflow(NewWorkflow {
            name: "disabled".into(),
            enabled: false,
            definition: json!({
                "id": "disabled",
                "initialState": "done",
                "states": {"done": {"type": "final"}}
            }),
        })
        .await
        .unwrap();

    let err = engine
        .execute_workflow(record.id, json!({}), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("disabled"));
}

#[tokio::test]
async fn on_state_follows_trigger_event_transitions() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "eventful",
        json!({
            "id": "eventful",
            "initialState": "wait",
            "states": {
                "wait": {
                    "on": {
                        "player.joined": [
                            {
                                "target": "greet",
                                "guard": {"key": "playerId", "operator": "exists"}
                            },
                            {"target": "done"}
                        ]
                    }
                },
                "greet": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "greeted", "value": true},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(
            workflow_id,
            json!({"playerId": 9}),
            Some("player.joined".to_string()),
        )
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.context["greeted"], json!(true));
}

#[tokio::test]
async fn unknown_action_is_fatal_even_with_on_error() {
    let (engine, store) = engine().await;
    // a definition error must not be swallowed by the recovery route
    let workflow_id = register(
        &store,
        "bad-action-recovery",
        json!({
            "id": "bad-action-recovery",
            "initialState": "start",
            "states": {
                "start": {
                    "invoke": {
                        "action": "nope.missing",
                        "onDone": "done",
                        "onError": "fallback"
                    }
                },
                "fallback": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "recovered", "value": true},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.error.as_deref().unwrap().contains("Unknown action"));
    assert!(!execution.context.as_object().unwrap().contains_key("recovered"));
}

#[tokio::test]
async fn body_step_cap_is_fatal_even_with_on_error() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "cyclic-body",
        json!({
            "id": "cyclic-body",
            "initialState": "poll",
            "states": {
                "poll": {
                    "loop": {
                        "while": {"key": "keepGoing", "operator": "==", "value": true},
                        "bodyInitial": "a",
                        "bodyStates": {
                            "a": {"always": [{"target": "b"}]},
                            "b": {"always": [{"target": "a"}]}
                        },
                        "onDone": "done",
                        "onError": "report"
                    }
                },
                "report": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "recovered", "value": true},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({"keepGoing": true}), None)
        .await
        .unwrap();

    let (execution, nodes) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("loop body exceeded maximum iterations"));
    assert!(!execution.context.as_object().unwrap().contains_key("recovered"));
    assert_eq!(nodes[0].status, NodeStatus::Failed);
}

#[tokio::test]
async fn on_state_without_trigger_uses_first_declared_event() {
    let (engine, store) = engine().await;
    // "z.first" is declared before "a.second"; declaration order wins, not
    // alphabetical order
    let workflow_id = register(
        &store,
        "declared-order",
        json!({
            "id": "declared-order",
            "initialState": "wait",
            "states": {
                "wait": {
                    "on": {
                        "z.first": [{"target": "fromZ"}],
                        "a.second": [{"target": "fromA"}]
                    }
                },
                "fromZ": {"type": "final"},
                "fromA": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.current_state.as_deref(), Some("fromZ"));
}

#[tokio::test]
async fn payload_schema_rejects_bad_trigger_payload() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "schema-guarded",
        json!({
            "id": "schema-guarded",
            "initialState": "done",
            "states": {"done": {"type": "final"}},
            "payloadSchema": [
                {"name": "playerId", "type": "number", "required": true}
            ]
        }),
    )
    .await;

    let err = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("playerId"));

    // nothing was started
    let executions = store
        .list_executions(None, 10)
        .await
        .unwrap();
    assert!(executions.is_empty());

    engine
        .execute_workflow(workflow_id, json!({"playerId": 7}), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_marks_execution_and_unfinished_nodes() {
    let (engine, store) = engine().await;
    let execution = store
        .insert_execution(playops_store::NewExecution {
            workflow_id: 1,
            status: ExecutionStatus::Running,
            trigger_event: None,
            trigger_payload: json!({}),
            context: json!({}),
            current_state: Some("start".into()),
        })
        .await
        .unwrap();
    store
        .insert_node_execution(playops_store::NewNodeExecution {
            execution_id: execution.id,
            node_id: "start".into(),
            node_type: "invoke".into(),
            status: NodeStatus::Running,
            input: json!({}),
        })
        .await
        .unwrap();

    let cancelled = engine.cancel_workflow(execution.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let (_, nodes) = engine.get_execution_status(execution.id).await.unwrap();
    assert_eq!(nodes[0].status, NodeStatus::Skipped);
}

#[tokio::test]
async fn lifecycle_events_are_emitted_in_order() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "observed",
        json!({
            "id": "observed",
            "initialState": "start",
            "states": {
                "start": {
                    "invoke": {
                        "action": "core.setVariable",
                        "input": {"name": "x", "value": 1},
                        "onDone": "done"
                    }
                },
                "done": {"type": "final"}
            }
        }),
    )
    .await;

    let mut rx = engine.events().subscribe();
    engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name);
    }
    assert_eq!(
        names,
        vec![
            "workflow.execution.started",
            "workflow.node.started",
            "workflow.node.completed",
            "workflow.execution.completed",
        ]
    );
}

#[tokio::test]
async fn infinite_transition_cycle_is_detected() {
    let (engine, store) = engine().await;
    // two always states bouncing with an unchanged context repeat their
    // (state, context) signature on the second visit
    let workflow_id = register(
        &store,
        "cycle",
        json!({
            "id": "cycle",
            "initialState": "a",
            "states": {
                "a": {"always": [{"target": "b"}]},
                "b": {"always": [{"target": "a"}]}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("infinite loop detected"));
}

#[tokio::test]
async fn stuck_state_without_transitions_fails() {
    let (engine, store) = engine().await;
    let workflow_id = register(
        &store,
        "stuck",
        json!({
            "id": "stuck",
            "initialState": "route",
            "states": {
                "route": {
                    "always": [
                        {
                            "target": "never",
                            "guard": {"key": "missing", "operator": "exists"}
                        }
                    ]
                },
                "never": {"type": "final"}
            }
        }),
    )
    .await;

    let execution_id = engine
        .execute_workflow(workflow_id, json!({}), None)
        .await
        .unwrap();

    let (execution, _) = engine.get_execution_status(execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error
        .as_deref()
        .unwrap()
        .contains("No matching transition"));
}
