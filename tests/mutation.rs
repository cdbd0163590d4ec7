//! Mutation hooks driving optimistic updates against the query cache.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::setup;
use parking_lot::Mutex;
use query_sync::{
    query_key, MutationConfig, MutationFnContext, MutationObserver, MutationOptions,
    MutationStatus, QueryClient, QueryError, RetryPolicy,
};

type Todos = Vec<String>;

fn cached_todos(client: &QueryClient) -> Option<Todos> {
    client
        .get_query_data::<Todos>(&query_key!["todos"])
        .unwrap()
        .map(|todos| (*todos).clone())
}

/// Adds a todo optimistically and rolls back on failure.
fn add_todo(client: &QueryClient, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> MutationOptions<Todos, String, Todos> {
    MutationOptions::new()
        .mutation_key(query_key!["todos", "add"])
        .on_mutate({
            let client = client.clone();
            let log = log.clone();
            move |todo: Arc<String>| {
                let client = client.clone();
                let log = log.clone();
                async move {
                    log.lock().push(format!("mutate {}", todo));
                    let previous = client
                        .get_query_data::<Todos>(&query_key!["todos"])?
                        .map(|todos| (*todos).clone())
                        .unwrap_or_default();
                    client.set_query_data(query_key!["todos"], |todos: Option<&Todos>| {
                        let mut todos = todos.cloned().unwrap_or_default();
                        todos.push((*todo).clone());
                        Some(todos)
                    })?;
                    Ok::<_, QueryError>(previous)
                }
            }
        })
        .mutation_fn({
            let log = log.clone();
            move |todo: Arc<String>, ctx: MutationFnContext| {
                let log = log.clone();
                async move {
                    let visible = ctx
                        .client()
                        .and_then(|client| cached_todos(client))
                        .map_or(0, |todos| todos.len());
                    log.lock().push(format!("write {} ({} visible)", todo, visible));
                    if fail {
                        Err(QueryError::from(anyhow::anyhow!("duplicate todo")))
                    } else {
                        Ok(vec!["a".to_string(), (*todo).clone()])
                    }
                }
            }
        })
        .on_success({
            let client = client.clone();
            let log = log.clone();
            move |saved: Arc<Todos>, _todo: Arc<String>, _previous: Option<Arc<Todos>>| {
                let client = client.clone();
                let log = log.clone();
                async move {
                    log.lock().push("success".to_string());
                    client.set_query_data(query_key!["todos"], |_: Option<&Todos>| {
                        Some((*saved).clone())
                    })?;
                    Ok::<_, QueryError>(())
                }
            }
        })
        .on_error({
            let client = client.clone();
            let log = log.clone();
            move |error: QueryError, _todo: Arc<String>, previous: Option<Arc<Todos>>| {
                let client = client.clone();
                let log = log.clone();
                async move {
                    log.lock().push(format!("error {}", error));
                    if let Some(previous) = previous {
                        client.set_query_data(query_key!["todos"], |_: Option<&Todos>| {
                            Some((*previous).clone())
                        })?;
                    }
                    Ok::<_, QueryError>(())
                }
            }
        })
        .on_settled({
            let log = log.clone();
            move |saved: Option<Arc<Todos>>,
                  error: Option<QueryError>,
                  _todo: Arc<String>,
                  _previous: Option<Arc<Todos>>| {
                let log = log.clone();
                async move {
                    log.lock().push(format!(
                        "settled data={} error={}",
                        saved.is_some(),
                        error.is_some()
                    ));
                    Ok::<_, QueryError>(())
                }
            }
        })
}

fn seed(client: &QueryClient) {
    client
        .set_query_data(query_key!["todos"], |_: Option<&Todos>| Some(vec!["a".to_string()]))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_rolls_back_optimistic_update() {
    setup();
    let client = QueryClient::new();
    seed(&client);
    let log = Arc::new(Mutex::new(Vec::new()));
    let observer = MutationObserver::new(&client, add_todo(&client, &log, true));

    let err = observer.mutate("b".to_string()).await.unwrap_err();
    assert_eq!(err.to_string(), "user error: duplicate todo");

    assert_eq!(
        *log.lock(),
        vec![
            "mutate b".to_string(),
            "write b (2 visible)".to_string(),
            "error user error: duplicate todo".to_string(),
            "settled data=false error=true".to_string(),
        ]
    );
    assert_eq!(cached_todos(&client), Some(vec!["a".to_string()]));

    let state = observer.current_result();
    assert_eq!(state.status, MutationStatus::Error);
    assert!(state.data.is_none());
    assert!(state.error.is_some());
    assert_eq!(state.failure_count, 1);
    assert_eq!(state.variables.as_deref().map(String::as_str), Some("b"));
    assert_eq!(state.context.as_deref(), Some(&vec!["a".to_string()]));
}

#[tokio::test(start_paused = true)]
async fn test_successful_write_replaces_optimistic_data() {
    setup();
    let client = QueryClient::new();
    seed(&client);
    let log = Arc::new(Mutex::new(Vec::new()));
    let observer = MutationObserver::new(&client, add_todo(&client, &log, false));

    let saved = observer.mutate("b".to_string()).await.unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(
        *log.lock(),
        vec![
            "mutate b".to_string(),
            "write b (2 visible)".to_string(),
            "success".to_string(),
            "settled data=true error=false".to_string(),
        ]
    );
    assert_eq!(
        cached_todos(&client),
        Some(vec!["a".to_string(), "b".to_string()])
    );
    let state = observer.current_result();
    assert!(state.is_success());
    assert_eq!(state.failure_count, 0);
    assert!(state.submitted_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failing_on_mutate_skips_the_write() {
    setup();
    let client = QueryClient::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let options = MutationOptions::<u32, u32, ()>::new()
        .on_mutate(|_n: Arc<u32>| async { Err(QueryError::from(anyhow::anyhow!("offline cache full"))) })
        .mutation_fn({
            let log = log.clone();
            move |n: Arc<u32>, _ctx: MutationFnContext| {
                log.lock().push("write".to_string());
                async move { Ok(*n) }
            }
        })
        .on_error({
            let log = log.clone();
            move |_error: QueryError, _n: Arc<u32>, context: Option<Arc<()>>| {
                log.lock().push(format!("error context={}", context.is_some()));
                async { Ok(()) }
            }
        });

    let err = client.execute_mutation(options, 1).await.unwrap_err();
    assert!(err.to_string().contains("offline cache full"));
    assert_eq!(*log.lock(), vec!["error context=false".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_key_defaults_apply_retries() {
    setup();
    let client = QueryClient::new();
    client.set_mutation_defaults(
        "todos",
        MutationConfig {
            retry: Some(RetryPolicy::Fixed {
                max_retries: 2,
                delay: Duration::from_secs(1),
            }),
            ..MutationConfig::default()
        },
    );
    let observer = MutationObserver::new(
        &client,
        MutationOptions::<u32, u32>::new()
            .mutation_key(query_key!["todos", "remove"])
            .mutation_fn(|_n: Arc<u32>, _ctx: MutationFnContext| async {
                Err(QueryError::from(anyhow::anyhow!("gone")))
            }),
    );

    assert!(observer.mutate(7).await.is_err());
    let state = observer.current_result();
    assert!(state.is_error());
    assert_eq!(state.failure_count, 3);
}
