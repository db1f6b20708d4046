#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Query builder integration tests against the fixture database.
//!
//! Covers statement execution, placeholder handling across backends'
//! positional forms, COUNT derivation and its fallback.

use quarry_engine::db::Storage;
use quarry_engine::query::{
    Conjunction, CountCache, JoinType, JsonValue, Operator, Params, QueryBuilder, SortDirection,
    UNIQUE_ID, count_query, execute_count,
};
use quarry_test_utils::{COURSE_COUNT, assert, fixture_storage, fixture_storage_with_prefix};
use serde_json::json;

async fn run(storage: &dyn Storage, qb: &QueryBuilder) -> Vec<quarry_engine::db::Row> {
    let (sql, params) = qb.build_sql(storage.dialect()).unwrap();
    storage.fetch_all(&sql, &params).await.unwrap()
}

// -------------------------------------------------------------------------
// Execution
// -------------------------------------------------------------------------

#[tokio::test]
async fn single_course_by_id() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.fullname", "c_fullname").from("course", "c");
    qb.where_("c.id", vec![5.into()], Operator::Equal, Conjunction::And);

    let rows = run(storage.as_ref(), &qb).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0]["c_fullname"], json!("Intro"));
}

#[tokio::test]
async fn in_list_ordered_descending() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.id", "c_id").from("course", "c");
    qb.where_("c.id", vec![1.into(), 2.into(), 3.into()], Operator::In, Conjunction::And);
    qb.orderby("c.id", "DESC").unwrap();

    let rows = run(storage.as_ref(), &qb).await;
    assert::column_eq(&rows, "c_id", &[json!(3), json!(2), json!(1)]);
}

#[tokio::test]
async fn joined_page_of_two() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.id", "c_id")
        .select("cc.name", "cc_name")
        .from("course", "c")
        .join("course_categories", "cc", "cc.id = c.category", JoinType::Inner)
        .orderby_direction("c.id", SortDirection::Asc)
        .limitfrom(5)
        .limitnum(2);

    let rows = run(storage.as_ref(), &qb).await;
    assert::column_eq(&rows, "c_id", &[json!(6), json!(7)]);
    assert::column_eq(&rows, "cc_name", &[json!("Arts"), json!("Physics")]);
}

#[tokio::test]
async fn offset_without_limit_runs() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.id", "c_id")
        .from("course", "c")
        .orderby_direction("c.id", SortDirection::Asc)
        .limitfrom(8);

    let rows = run(storage.as_ref(), &qb).await;
    assert::column_eq(&rows, "c_id", &[json!(9), json!(10)]);
}

#[tokio::test]
async fn repeated_builds_bind_fresh_placeholders() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.id", "c_id").from("course", "c");
    qb.where_("c.category", vec![2.into()], Operator::Equal, Conjunction::And);
    qb.where_("c.fullname", vec!["o".into()], Operator::LikeWildcard, Conjunction::And);
    qb.orderby_direction("c.id", SortDirection::Asc);

    let (first_sql, first_params) = qb.build_sql(storage.dialect()).unwrap();
    let (second_sql, second_params) = qb.build_sql(storage.dialect()).unwrap();
    assert_ne!(first_sql, second_sql);
    assert!(first_params.keys().all(|k| !second_params.contains_key(k)));

    let rows = storage.fetch_all(&second_sql, &second_params).await.unwrap();
    assert::column_eq(&rows, "c_id", &[json!(5), json!(6), json!(10)]);
}

#[tokio::test]
async fn same_named_param_bound_twice() {
    let storage = fixture_storage().await.unwrap();
    let mut params = Params::new();
    params.insert("cat".into(), json!(1));

    let mut qb = QueryBuilder::new();
    qb.select("c.id", "c_id")
        .from("course", "c")
        .where_raw("c.category = :cat OR c.id = :cat", params)
        .orderby_direction("c.id", SortDirection::Asc);

    let rows = run(storage.as_ref(), &qb).await;
    assert::column_eq(&rows, "c_id", &[json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn table_prefix_applies_to_tables_and_subqueries() {
    let storage = fixture_storage_with_prefix("mdl_").await.unwrap();
    let mut qb = QueryBuilder::with_prefix("mdl_");
    qb.select("u.username", "u_username").from("user", "u");
    qb.where_in_query(
        "u.id",
        "SELECT gm.userid FROM {groups_members} gm",
        Params::new(),
    );
    qb.orderby_direction("u.username", SortDirection::Asc);

    let (sql, _) = qb.build_sql(storage.dialect()).unwrap();
    assert::contains(&sql, "FROM mdl_user u");
    assert::contains(&sql, "FROM mdl_groups_members gm");

    let rows = run(storage.as_ref(), &qb).await;
    assert::column_eq(&rows, "u_username", &[json!("alice"), json!("bob"), json!("carol")]);
}

#[tokio::test]
async fn storage_errors_carry_statement() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("m.id", "id").from("missing", "m");

    let (sql, params) = qb.build_sql(storage.dialect()).unwrap();
    let err = storage.fetch_all(&sql, &params).await.unwrap_err();
    match err {
        quarry_engine::EngineError::Execution { sql: failed, .. } => {
            assert::contains(&failed, "FROM missing m");
        }
        other => panic!("expected execution error, got {other:?}"),
    }
}

// -------------------------------------------------------------------------
// COUNT derivation
// -------------------------------------------------------------------------

fn users_with_memberships() -> QueryBuilder {
    let mut qb = QueryBuilder::new();
    qb.select("u.id", UNIQUE_ID)
        .select("u.username", "u_username")
        .select("gm.groupid", "gm_groupid")
        .from("user", "u")
        .join("groups_members", "gm", "gm.userid = u.id", JoinType::Left)
        .orderby_direction("u.id", SortDirection::Asc)
        .limitnum(2);
    qb.where_("u.deleted", vec![0.into()], Operator::Equal, Conjunction::And);
    qb
}

#[tokio::test]
async fn count_is_distinct_under_one_to_many_join() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = users_with_memberships();
    qb.limitnum(0);

    let rows = run(storage.as_ref(), &qb).await;
    assert_eq!(rows.len(), 6, "alice appears once per group");

    let cache = CountCache::new();
    let distinct = execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap();
    assert_eq!(distinct, 5);
    let all = execute_count(storage.as_ref(), &qb, false, &cache).await.unwrap();
    assert_eq!(all, 6);
}

#[tokio::test]
async fn count_ignores_paging() {
    let storage = fixture_storage().await.unwrap();
    let qb = users_with_memberships();
    assert_eq!(run(storage.as_ref(), &qb).await.len(), 2);

    let (sql, _) = count_query(&qb, true).build_sql(storage.dialect()).unwrap();
    assert::not_contains(&sql, "LIMIT");
    assert::not_contains(&sql, "ORDER BY");

    let cache = CountCache::new();
    assert_eq!(execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap(), 5);
}

#[tokio::test]
async fn count_is_memoized_per_cache() {
    let storage = fixture_storage().await.unwrap();
    let qb = users_with_memberships();
    let cache = CountCache::new();

    execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap();
    execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap();
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn count_with_cte_counts_directly() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.set_cte(
        "busy",
        "SELECT e.courseid FROM {enrol} e JOIN {user_enrolments} ue ON ue.enrolid = e.id \
         GROUP BY e.courseid HAVING COUNT(ue.id) >= 2",
        Params::new(),
    )
    .select("c.id", UNIQUE_ID)
    .select("c.fullname", "c_fullname")
    .from("course", "c")
    .join("busy", "b", "b.courseid = c.id", JoinType::Inner);

    let (sql, _) = count_query(&qb, true).build_sql(storage.dialect()).unwrap();
    assert!(sql.starts_with("WITH busy AS ("));

    let cache = CountCache::new();
    assert_eq!(execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap(), 2);
}

#[tokio::test]
async fn count_respects_having() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("c.id", UNIQUE_ID)
        .select("COUNT(ue.id)", "enrolments")
        .from("course", "c")
        .join("enrol", "e", "e.courseid = c.id", JoinType::Left)
        .join("user_enrolments", "ue", "ue.enrolid = e.id", JoinType::Left)
        .groupby("c.id")
        .having_raw("COUNT(ue.id) >= 2", Params::new());

    let rows = run(storage.as_ref(), &qb).await;
    assert_eq!(rows.len(), 2);

    let cache = CountCache::new();
    assert_eq!(execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap(), 2);
    assert_eq!(execute_count(storage.as_ref(), &qb, false, &cache).await.unwrap(), 2);
}

#[tokio::test]
async fn failing_count_falls_back_to_plain_count() {
    let storage = fixture_storage().await.unwrap();
    let mut inner = QueryBuilder::new();
    inner.select("c.fullname", "name").from("course", "c");

    // The derived table has no `id`, so the distinct count cannot be built.
    let mut qb = QueryBuilder::new();
    qb.select("s.name", "name").from_subquery(inner, "s");

    let cache = CountCache::new();
    let total = execute_count(storage.as_ref(), &qb, true, &cache).await.unwrap();
    assert_eq!(total, COURSE_COUNT as u64);
}

#[tokio::test]
async fn count_reports_original_error_when_fallback_fails() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("m.id", UNIQUE_ID).from("missing", "m");

    let cache = CountCache::new();
    let err = execute_count(storage.as_ref(), &qb, true, &cache)
        .await
        .unwrap_err();
    assert!(matches!(err, quarry_engine::EngineError::Execution { .. }));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn null_and_text_cells_decode() {
    let storage = fixture_storage().await.unwrap();
    let mut qb = QueryBuilder::new();
    qb.select("u.username", "u_username")
        .select("gm.groupid", "gm_groupid")
        .from("user", "u")
        .join("groups_members", "gm", "gm.userid = u.id", JoinType::Left);
    qb.where_("u.id", vec![1.into()], Operator::Equal, Conjunction::And);

    let rows = run(storage.as_ref(), &qb).await;
    assert_eq!(rows[0]["u_username"], json!("admin"));
    assert_eq!(rows[0]["gm_groupid"], JsonValue::Null);
}
