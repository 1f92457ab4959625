//! Planner selection and scan execution: left-prefix rule, range inclusivity,
//! IN, projections, and unions.

mod common;

use common::*;
use quarry::{Bound, PlanNode, SortDirection};

async fn seeded() -> (Container, quarry::ItemStore<User>) {
    let container = container().await;
    let store = container.store::<User>().unwrap();
    let auth = auth();
    let rows = [
        (1, 10, "jp", "Tokyo"),
        (2, 20, "jp", "Osaka"),
        (3, 30, "de", "Berlin"),
        (4, 40, "de", "Hamburg"),
    ];
    for (id, price, country, city) in rows {
        store.insert(&auth, &User::new(id, price, country, city)).await.unwrap();
    }
    (container, store)
}

#[tokio::test]
async fn non_leading_field_plans_a_table_scan_with_same_results() {
    let (_container, store) = seeded().await;

    // city without country cannot use the [country, city] index.
    let query = Query::filter(vec![FieldPredicate::eq("city", "Tokyo")]);
    let plan = store.plan(&query);
    assert!(matches!(plan.node, PlanNode::TableScan { .. }), "got {:?}", plan.node);

    let hits = store.fetch(&auth(), &query).await.unwrap();
    assert_eq!(ids(&hits), vec![ItemId::int(1)]);
}

#[tokio::test]
async fn leading_prefix_plans_an_index() {
    let (_container, store) = seeded().await;

    let query = Query::filter(vec![FieldPredicate::eq("country", "de")]);
    let plan = store.plan(&query);
    match &plan.node {
        PlanNode::IndexScan { index, .. } => assert_eq!(index, "user_geo"),
        other => panic!("expected index scan, got {:?}", other),
    }

    let mut hits = ids(&store.fetch(&auth(), &query).await.unwrap());
    hits.sort();
    assert_eq!(hits, vec![ItemId::int(3), ItemId::int(4)]);
}

#[tokio::test]
async fn range_bounds_honor_inclusivity() {
    let (_container, store) = seeded().await;
    let auth = auth();

    // Ages double as prices here: {10, 20, 30, 40}.
    let half_open = Query::filter(vec![FieldPredicate::range(
        "age",
        Some(Bound::inclusive(10i64)),
        Some(Bound::exclusive(30i64)),
    )]);
    let mut hits: Vec<i64> = store.fetch(&auth, &half_open).await.unwrap().iter().map(|u| u.age).collect();
    hits.sort();
    assert_eq!(hits, vec![10, 20]);

    let other_half = Query::filter(vec![FieldPredicate::range(
        "age",
        Some(Bound::exclusive(10i64)),
        Some(Bound::inclusive(30i64)),
    )]);
    let mut hits: Vec<i64> = store.fetch(&auth, &other_half).await.unwrap().iter().map(|u| u.age).collect();
    hits.sort();
    assert_eq!(hits, vec![20, 30]);
}

#[tokio::test]
async fn in_predicate_unions_and_dedups() {
    let (_container, store) = seeded().await;
    let query = Query::filter(vec![FieldPredicate::is_in("age", vec![10i64.into(), 30i64.into(), 10i64.into()])]);
    let mut hits = ids(&store.fetch(&auth(), &query).await.unwrap());
    hits.sort();
    assert_eq!(hits, vec![ItemId::int(1), ItemId::int(3)]);
}

#[tokio::test]
async fn equality_prefix_with_range_on_next_field() {
    let (_container, store) = seeded().await;
    let query = Query::filter(vec![
        FieldPredicate::eq("country", "de"),
        FieldPredicate::range("city", Some(Bound::inclusive("Berlin")), Some(Bound::exclusive("C"))),
    ]);
    let hits = store.fetch(&auth(), &query).await.unwrap();
    assert_eq!(ids(&hits), vec![ItemId::int(3)]);
}

#[tokio::test]
async fn index_only_projection_reads_no_records() {
    let (_container, store) = seeded().await;

    let query = Query::filter(vec![FieldPredicate::eq("country", "jp")]).project(vec!["country", "city"]);
    let plan = store.plan(&query);
    assert!(matches!(plan.node, PlanNode::IndexOnlyScan { .. }), "got {:?}", plan.node);

    let mut rows = store.fetch_projected(&auth(), &query).await.unwrap();
    rows.sort_by_key(|r| format!("{:?}", r.get("city")));
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("country"), Some(&FieldValue::from("jp")));
    assert!(rows.iter().all(|r| r.len() == 2));
}

#[tokio::test]
async fn projected_rows_sort_before_limit() {
    let (_container, store) = seeded().await;

    // Sort key inside the index key: stays on the index-only path.
    let query = Query::filter(vec![FieldPredicate::eq("country", "de")])
        .project(vec!["country", "city"])
        .order_by("city", SortDirection::Desc)
        .limit(1);
    let rows = store.fetch_projected(&auth(), &query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("city"), Some(&FieldValue::from("Hamburg")));

    // Sort key outside the index key (and the projection): falls back to a
    // record fetch so ordering still applies before the limit.
    let query = Query::filter(vec![FieldPredicate::eq("country", "jp")])
        .project(vec!["city"])
        .order_by("age", SortDirection::Asc)
        .limit(1);
    let rows = store.fetch_projected(&auth(), &query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("city"), Some(&FieldValue::from("Tokyo")));
}

#[tokio::test]
async fn or_queries_union_both_sides() {
    let (_container, store) = seeded().await;
    let query = Query::filter(vec![FieldPredicate::eq("country", "jp")])
        .or(Query::filter(vec![FieldPredicate::eq("age", 30i64)]));
    assert!(matches!(store.plan(&query).node, PlanNode::Union { .. }));

    let mut hits = ids(&store.fetch(&auth(), &query).await.unwrap());
    hits.sort();
    assert_eq!(hits, vec![ItemId::int(1), ItemId::int(2), ItemId::int(3)]);
}

#[tokio::test]
async fn order_by_and_limit_apply_after_filtering() {
    let (_container, store) = seeded().await;
    let query = Query::new().order_by("age", SortDirection::Desc).limit(2);
    let hits: Vec<i64> = store.fetch(&auth(), &query).await.unwrap().iter().map(|u| u.age).collect();
    assert_eq!(hits, vec![40, 30]);
}

#[tokio::test]
async fn custom_predicates_post_filter_fetched_candidates() {
    let (_container, store) = seeded().await;
    // A residual predicate the index cannot answer rides along with the scan.
    let query = Query::filter(vec![FieldPredicate::eq("country", "jp"), FieldPredicate::ge("age", 15i64)]);
    let hits = store.fetch(&auth(), &query).await.unwrap();
    assert_eq!(ids(&hits), vec![ItemId::int(2)]);
}
