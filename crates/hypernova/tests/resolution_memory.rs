use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use hypernova::prelude::*;
use hypernova_memory::MemoryCollection;
use serde_json::{Value, json};
use std::sync::Arc;

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

/// posts -> users (direct one), posts -> tags (direct many via id array),
/// posts <- comments (virtual many over comments.post).
fn blog_catalog() -> Catalog {
    let posts = MemoryCollection::new("posts");
    posts
        .seed(json!([
            {"_id": 1, "title": "First", "author_id": 10, "tag_ids": [100, 101, 102]},
            {"_id": 2, "title": "Second", "author_id": 11, "tag_ids": [101, 102, 103]},
            {"_id": 3, "title": "Orphan", "author_id": null, "tag_ids": []},
        ]))
        .expect("seed posts");

    let users = MemoryCollection::new("users");
    users
        .seed(json!([
            {"_id": 10, "name": "Ada", "email": "ada@example.com"},
            {"_id": 11, "name": "Grace", "email": "grace@example.com"},
        ]))
        .expect("seed users");

    let tags = MemoryCollection::new("tags");
    tags.seed(json!([
        {"_id": 100, "label": "intro", "number": 100},
        {"_id": 101, "label": "rust", "number": 200},
        {"_id": 102, "label": "joins", "number": 300},
        {"_id": 103, "label": "deep", "number": 400},
    ]))
    .expect("seed tags");

    let comments = MemoryCollection::new("comments");
    comments
        .seed(json!([
            {"_id": 1000, "post_id": 1, "text": "nice", "approved": true},
            {"_id": 1001, "post_id": 1, "text": "meh", "approved": false},
            {"_id": 1002, "post_id": 2, "text": "great", "approved": true},
        ]))
        .expect("seed comments");

    let mut catalog = Catalog::new();
    catalog.add_collection(Arc::new(posts)).expect("posts");
    catalog.add_collection(Arc::new(users)).expect("users");
    catalog.add_collection(Arc::new(tags)).expect("tags");
    catalog.add_collection(Arc::new(comments)).expect("comments");
    catalog
        .add_links(
            "posts",
            [
                LinkSpec::one("author", "users"),
                LinkSpec::many("tags", "tags"),
            ],
        )
        .expect("post links");
    catalog
        .add_links("comments", [LinkSpec::one("post", "posts")])
        .expect("comment links");
    catalog
        .add_links("posts", [LinkSpec::inverse("comments", "comments", "post")])
        .expect("virtual link");
    catalog
}

#[test]
fn direct_one_link_resolves_to_object_or_null() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "author": {"name": 1}})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(rows.len(), 3);

        for row in &rows {
            // One-cardinality: always an object or null, never an array,
            // and the key is always present.
            let author = row.get("author").expect("author key present");
            assert!(author.is_object() || author.is_null());
        }

        let first = &rows[0];
        assert_eq!(first.get("author"), Some(&json!({"name": "Ada"})));

        // Null local key degrades to null, not an error or absent key.
        let orphan = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("Orphan")))
            .expect("orphan post");
        assert_eq!(orphan.get("author"), Some(&Value::Null));
    });
}

#[test]
fn many_links_always_resolve_to_arrays() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "tags": {"label": 1}, "comments": {"text": 1}})),
                    &ResolveContext::default(),
                )
                .await,
        );

        for row in &rows {
            assert!(row.get("tags").expect("tags key").is_array());
            assert!(row.get("comments").expect("comments key").is_array());
        }

        // Empty id array resolves to an empty array, never null.
        let orphan = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("Orphan")))
            .expect("orphan post");
        assert_eq!(orphan.get("tags"), Some(&json!([])));
        assert_eq!(orphan.get("comments"), Some(&json!([])));
    });
}

#[test]
fn many_to_many_with_nested_filter_returns_matching_children() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({
                        "title": 1,
                        "tags": {
                            "$": {"filters": {"number": {"$gte": 300}}},
                            "label": 1,
                            "number": 1
                        }
                    })),
                    &ResolveContext::default(),
                )
                .await,
        );

        let first = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("First")))
            .expect("first post");
        // Three linked tags, only one passes the filter.
        assert_eq!(
            first.get("tags"),
            Some(&json!([{"label": "joins", "number": 300}]))
        );

        let second = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("Second")))
            .expect("second post");
        assert_eq!(
            second.get("tags"),
            Some(&json!([{"label": "joins", "number": 300}, {"label": "deep", "number": 400}]))
        );
    });
}

#[test]
fn join_keys_never_leak_unless_requested() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "author": {"name": 1}})),
                    &ResolveContext::default(),
                )
                .await,
        );
        for row in &rows {
            assert!(
                !row.contains_key("author_id"),
                "join key leaked into output: {row:?}"
            );
            assert!(!row.contains_key("_id"));
            if let Some(Value::Object(author)) = row.get("author") {
                assert!(!author.contains_key("_id"));
            }
        }

        // Explicitly requesting the join key keeps it.
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "author_id": 1, "author": {"name": 1}})),
                    &ResolveContext::default(),
                )
                .await,
        );
        let first = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("First")))
            .expect("first post");
        assert_eq!(first.get("author_id"), Some(&json!(10)));
    });
}

#[test]
fn nested_links_resolve_through_levels() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "comments",
                    &body(json!({
                        "text": 1,
                        "post": {"title": 1, "author": {"name": 1}}
                    })),
                    &ResolveContext::default(),
                )
                .await,
        );

        let nice = rows
            .iter()
            .find(|r| r.get("text") == Some(&json!("nice")))
            .expect("comment");
        assert_eq!(
            nice.get("post"),
            Some(&json!({"title": "First", "author": {"name": "Ada"}}))
        );
    });
}

#[test]
fn root_filters_and_options_apply() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({
                        "$": {
                            "filters": {"author_id": {"$exists": true}},
                            "options": {"sort": {"title": 1}, "limit": 2}
                        },
                        "title": 1
                    })),
                    &ResolveContext::default(),
                )
                .await,
        );
        let titles: Vec<_> = rows.iter().map(|r| r.get("title").cloned()).collect();
        assert_eq!(titles, vec![Some(json!("First")), Some(json!("Orphan"))]);
    });
}

#[test]
fn resolve_one_clamps_limit_and_returns_first() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let row = unwrap_outcome(
            catalog
                .resolve_one(
                    &cx,
                    "posts",
                    &body(json!({"$": {"filters": {"title": "Second"}}, "title": 1})),
                    &ResolveContext::default(),
                )
                .await,
        )
        .expect("one row");
        assert_eq!(row.get("title"), Some(&json!("Second")));

        let missing = unwrap_outcome(
            catalog
                .resolve_one(
                    &cx,
                    "posts",
                    &body(json!({"$": {"filters": {"title": "Nope"}}, "title": 1})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert!(missing.is_none());
    });
}

#[test]
fn link_filters_restrict_virtual_children() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    let mut catalog = blog_catalog();
    // A second, filtered view over the same direct link.
    catalog
        .add_links(
            "posts",
            [LinkSpec::inverse("approved_comments", "comments", "post")
                .filters(json!({"approved": true}))],
        )
        .expect("filtered link");

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"title": 1, "approved_comments": {"text": 1}})),
                    &ResolveContext::default(),
                )
                .await,
        );
        let first = rows
            .iter()
            .find(|r| r.get("title") == Some(&json!("First")))
            .expect("first post");
        assert_eq!(
            first.get("approved_comments"),
            Some(&json!([{"text": "nice"}]))
        );
    });
}

#[test]
fn alias_refetches_a_link_under_two_keys() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({
                        "$": {"filters": {"_id": 1}},
                        "comments": {"text": 1},
                        "good_comments": {
                            "$alias": "comments",
                            "$": {"filters": {"approved": true}},
                            "text": 1
                        }
                    })),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(
            row.get("comments"),
            Some(&json!([{"text": "nice"}, {"text": "meh"}]))
        );
        assert_eq!(row.get("good_comments"), Some(&json!([{"text": "nice"}])));
    });
}

#[test]
fn all_fields_mode_returns_whole_documents() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        let rows = unwrap_outcome(
            catalog
                .resolve(
                    &cx,
                    "posts",
                    &body(json!({"$all": true, "$": {"filters": {"_id": 1}}})),
                    &ResolveContext::default(),
                )
                .await,
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert!(row.contains_key("title"));
        assert!(row.contains_key("author_id"));
        assert!(row.contains_key("tag_ids"));
    });
}

#[test]
fn store_failure_surfaces_immediately() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let catalog = blog_catalog();

    rt.block_on(async {
        // $where is not supported by the memory backend's matcher; an
        // unsupported pipeline stage is the simplest forced store error.
        let outcome = catalog
            .resolve(
                &cx,
                "posts",
                &body(json!({"$": {"pipeline": [{"$group": {}}]}, "title": 1})),
                &ResolveContext::default(),
            )
            .await;
        assert!(matches!(outcome, Outcome::Err(Error::Store(_))));
    });
}
