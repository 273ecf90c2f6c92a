use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use hypernova::prelude::*;
use hypernova_memory::MemoryCollection;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn body(value: Value) -> Body {
    Body::try_from(value).expect("valid body")
}

fn users_catalog() -> Catalog {
    let users = MemoryCollection::new("users");
    users
        .seed(json!([
            {"_id": 1, "name": "dora", "first_name": "Dora", "last_name": "Vu"},
        ]))
        .expect("seed users");

    let mut catalog = Catalog::new();
    catalog.add_collection(Arc::new(users)).expect("users");
    catalog
}

#[test]
fn reducer_chain_resolves_through_both_levels() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = users_catalog();
    catalog
        .add_reducers(
            "users",
            [
                ReducerSpec::computed(
                    "inversed_name",
                    Body::new().field("name"),
                    |row, _, _| {
                        let name = row.get("name").and_then(Value::as_str).unwrap_or_default();
                        Ok(json!(name.chars().rev().collect::<String>()))
                    },
                ),
                ReducerSpec::computed(
                    "full_name",
                    Body::new().field("inversed_name"),
                    |row, _, _| {
                        let inversed = row
                            .get("inversed_name")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        Ok(json!(inversed.to_uppercase()))
                    },
                ),
            ],
        )
        .expect("reducers");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"full_name": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("full_name"), Some(&json!("AROD")));
        // Pulled in only as dependencies: absent from output.
        assert!(!row.contains_key("inversed_name"));
        assert!(!row.contains_key("name"));

        // Explicitly requesting the intermediate keeps it.
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"full_name": 1, "inversed_name": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        let row = &rows[0];
        assert_eq!(row.get("full_name"), Some(&json!("AROD")));
        assert_eq!(row.get("inversed_name"), Some(&json!("arod")));
    });
}

#[test]
fn reducers_evaluate_in_dependency_order() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut catalog = users_catalog();
    let (log_a, log_b, log_c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
    catalog
        .add_reducers(
            "users",
            [
                ReducerSpec::computed("a", Body::new().field("b"), move |_, _, _| {
                    log_a.lock().expect("log").push("a");
                    Ok(Value::Null)
                }),
                ReducerSpec::computed("b", Body::new().field("c"), move |_, _, _| {
                    log_b.lock().expect("log").push("b");
                    Ok(Value::Null)
                }),
                ReducerSpec::computed("c", Body::new().field("name"), move |_, _, _| {
                    log_c.lock().expect("log").push("c");
                    Ok(Value::Null)
                }),
            ],
        )
        .expect("reducers");

    rt.block_on(async {
        unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"a": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(*log.lock().expect("log"), vec!["c", "b", "a"]);
    });
}

#[test]
fn reducer_receives_arguments_and_context() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = users_catalog();
    catalog
        .add_reducers(
            "users",
            [ReducerSpec::computed(
                "greeting",
                Body::new().field("first_name"),
                |row, args, context| {
                    let first = row
                        .get("first_name")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let punctuation = args
                        .get("punctuation")
                        .and_then(Value::as_str)
                        .unwrap_or(".");
                    let tenant = context
                        .data
                        .get("tenant")
                        .and_then(Value::as_str)
                        .unwrap_or("nobody");
                    Ok(json!(format!("{first}{punctuation} ({tenant})")))
                },
            )],
        )
        .expect("reducer");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"greeting": {"$": {"punctuation": "!"}}})),
                    &ResolveContext::new(json!({"tenant": "acme"})),
                )
                .await,
        );
        assert_eq!(rows[0].get("greeting"), Some(&json!("Dora! (acme)")));
    });
}

#[test]
fn reducer_error_aborts_the_whole_request() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = users_catalog();
    catalog
        .add_reducers(
            "users",
            [ReducerSpec::computed(
                "explosive",
                Body::new().field("name"),
                |_, _, _| Err(Error::reducer("explosive", "boom")),
            )],
        )
        .expect("reducer");

    rt.block_on(async {
        let outcome = catalog
            .resolve(
                &cx,
                "users",
                &body(json!({"explosive": 1})),
                &ResolveContext::default(),
            )
            .await;
        match outcome {
            Outcome::Err(Error::Reducer(e)) => assert_eq!(e.reducer, "explosive"),
            Outcome::Err(e) => panic!("wrong error kind: {e}"),
            _ => panic!("expected reducer error"),
        }
    });
}

#[test]
fn pipeline_reducer_is_materialized_by_the_store() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = users_catalog();
    catalog
        .add_reducers(
            "users",
            [ReducerSpec::pipeline(
                "flagged",
                Body::new(),
                vec![json!({"$addFields": {"flagged": true}})],
            )],
        )
        .expect("reducer");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"name": 1, "flagged": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        let row = &rows[0];
        assert_eq!(row.get("flagged"), Some(&json!(true)));
        assert_eq!(row.get("name"), Some(&json!("dora")));
    });
}

#[test]
fn reducer_can_depend_on_a_link() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let posts = MemoryCollection::new("posts");
    posts
        .seed(json!([
            {"_id": 1, "title": "First", "author_id": 10},
        ]))
        .expect("seed posts");
    let users = MemoryCollection::new("users");
    users
        .seed(json!([{"_id": 10, "name": "Ada"}]))
        .expect("seed users");

    let mut catalog = Catalog::new();
    catalog.add_collection(Arc::new(posts)).expect("posts");
    catalog.add_collection(Arc::new(users)).expect("users");
    catalog
        .add_links("posts", [LinkSpec::one("author", "users")])
        .expect("link");
    catalog
        .add_reducers(
            "posts",
            [ReducerSpec::computed(
                "byline",
                Body::try_from(json!({"author": {"name": 1}})).expect("dependency"),
                |row, _, _| {
                    let name = row
                        .get("author")
                        .and_then(|a| a.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or("anonymous");
                    Ok(json!(format!("by {name}")))
                },
            )],
        )
        .expect("reducer");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "byline": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        let row = &rows[0];
        assert_eq!(row.get("byline"), Some(&json!("by Ada")));
        // The author link was only a dependency: stripped from output.
        assert!(!row.contains_key("author"));
        assert!(!row.contains_key("author_id"));
    });
}

#[test]
fn self_shadowing_reducer_refines_the_stored_field() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = users_catalog();
    catalog
        .add_reducers(
            "users",
            [ReducerSpec::computed(
                "name",
                Body::new().field("name"),
                |row, _, _| {
                    let raw = row.get("name").and_then(Value::as_str).unwrap_or_default();
                    Ok(json!(raw.to_uppercase()))
                },
            )],
        )
        .expect("reducer");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "users",
                    &body(json!({"name": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(rows[0].get("name"), Some(&json!("DORA")));
    });
}
