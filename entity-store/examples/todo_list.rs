//! Todo List Example
//!
//! Drives an entity store from a simulated async fetch and watches it from a
//! second thread through a blocking change iterator.
//!
//! Run with: `cargo run -p entity-state-store --example todo_list`

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use entity_store::{
    init_logging, set_error, set_loading, use_cache, Cached, EntityQuery, EntityStore,
    EntityStoreConfig, LoggingMode, SelectOptions,
};
use entity_store::entity_map::{Direction, FilterBy, OrderBy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Todo {
    id: u32,
    title: String,
    done: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("backend unavailable")]
struct Offline;

async fn fetch_todos() -> Result<Vec<Value>, Offline> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let todos = vec![
        Todo { id: 1, title: "write docs".into(), done: false },
        Todo { id: 2, title: "cut release".into(), done: false },
        Todo { id: 3, title: "triage issues".into(), done: true },
    ];
    Ok(todos
        .into_iter()
        .filter_map(|t| serde_json::to_value(t).ok())
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingMode::Development)?;

    let store: EntityStore<Value> =
        EntityStore::new(EntityStoreConfig::cached("todos", Duration::from_secs(30)))?;
    let query = EntityQuery::new(&store);

    // Watcher thread: prints the open count until the store is destroyed
    let open = query
        .select_all(SelectOptions::new().filter(FilterBy::eq("done", false)))
        .map(|todos| todos.len())
        .distinct_until_changed()
        .changes();
    let watcher = thread::spawn(move || {
        for count in open {
            println!("open todos: {count}");
        }
        println!("store closed");
    });

    for attempt in 1..=2 {
        let fetched = use_cache(&store, || {
            set_loading(&store, set_error(&store, fetch_todos()))
        })
        .await;
        match fetched {
            Cached::Hit(state) => println!("attempt {attempt}: cache hit, {} todos", state.entities.len()),
            Cached::Fresh(Ok(todos)) => {
                println!("attempt {attempt}: fetched {} todos", todos.len());
                store.set(todos);
            }
            Cached::Fresh(Err(e)) => println!("attempt {attempt}: {e}"),
        }
    }

    store.update(1, json!({ "done": true }));
    store.set_active(2);

    let by_title = SelectOptions::new().order(OrderBy::field("title"), Direction::Asc);
    for todo in query.get_all(&by_title) {
        println!("{}", todo);
    }
    println!("active: {:?}", query.get_active_id());

    store.destroy();
    watcher.join().map_err(|_| "watcher thread panicked")?;
    Ok(())
}
