//! Quarry test utilities.
//!
//! An in-memory SQLite database seeded with a small learning-platform
//! dataset, plus assertion helpers for row collections.
//!
//! Seed summary:
//! - categories: Science (1), Arts (2), Physics (3, child of Science),
//!   Archive (4, hidden)
//! - courses 1..=10, each in one category; course 5 is "Intro"
//! - users: admin (1), alice (2), bob (3), carol (4), dave (5, suspended),
//!   erin (6, deleted)
//! - groups: Red (1) and Blue (2) in course 1, Green (3) in course 2;
//!   alice is in Red and Blue, bob in Red, carol in Green
//! - enrolments: course 1 has alice, bob, carol; course 2 has alice, dave;
//!   course 3 has bob; course 5 has alice

use std::sync::Arc;

use anyhow::{Context, Result};
use quarry_engine::db::{SqliteStorage, Storage};

pub const ADMIN: i64 = 1;
pub const ALICE: i64 = 2;
pub const BOB: i64 = 3;
pub const CAROL: i64 = 4;
pub const DAVE: i64 = 5;
pub const ERIN: i64 = 6;

pub const RED: i64 = 1;
pub const BLUE: i64 = 2;
pub const GREEN: i64 = 3;

/// Number of seeded courses.
pub const COURSE_COUNT: i64 = 10;

/// Start date of course 1; each later course starts one day after.
pub const FIRST_START: i64 = 1_700_000_000;

const COURSES: &[(i64, i64, &str, &str)] = &[
    (1, 1, "Algebra", "ALG"),
    (2, 1, "Biology", "BIO"),
    (3, 1, "Chemistry", "CHEM"),
    (4, 2, "Drawing", "DRAW"),
    (5, 2, "Intro", "INTRO"),
    (6, 2, "Journalism", "JOUR"),
    (7, 3, "Mechanics", "MECH"),
    (8, 3, "Optics", "OPT"),
    (9, 4, "Old Latin", "LAT"),
    (10, 2, "Poetry", "POE"),
];

fn schema(p: &str) -> String {
    format!(
        "CREATE TABLE {p}course_categories (
            id INTEGER PRIMARY KEY, name TEXT NOT NULL, parent INTEGER NOT NULL DEFAULT 0,
            visible INTEGER NOT NULL DEFAULT 1);
        CREATE TABLE {p}course (
            id INTEGER PRIMARY KEY, category INTEGER NOT NULL, fullname TEXT NOT NULL,
            shortname TEXT NOT NULL, startdate INTEGER NOT NULL DEFAULT 0,
            visible INTEGER NOT NULL DEFAULT 1);
        CREATE TABLE {p}user (
            id INTEGER PRIMARY KEY, username TEXT NOT NULL, firstname TEXT NOT NULL,
            lastname TEXT NOT NULL, email TEXT NOT NULL, suspended INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0, lastaccess INTEGER NOT NULL DEFAULT 0);
        CREATE TABLE {p}groups (
            id INTEGER PRIMARY KEY, courseid INTEGER NOT NULL, name TEXT NOT NULL);
        CREATE TABLE {p}groups_members (
            id INTEGER PRIMARY KEY, groupid INTEGER NOT NULL, userid INTEGER NOT NULL);
        CREATE TABLE {p}enrol (
            id INTEGER PRIMARY KEY, courseid INTEGER NOT NULL, enrol TEXT NOT NULL);
        CREATE TABLE {p}user_enrolments (
            id INTEGER PRIMARY KEY, enrolid INTEGER NOT NULL, userid INTEGER NOT NULL,
            timecreated INTEGER NOT NULL DEFAULT 0);
        CREATE TABLE {p}grade_items (
            id INTEGER PRIMARY KEY, courseid INTEGER NOT NULL, itemname TEXT NOT NULL,
            grademax REAL NOT NULL);
        CREATE TABLE {p}grade_grades (
            id INTEGER PRIMARY KEY, itemid INTEGER NOT NULL, userid INTEGER NOT NULL,
            finalgrade REAL);"
    )
}

fn seed(p: &str) -> String {
    let mut sql = format!(
        "INSERT INTO {p}course_categories (id, name, parent, visible) VALUES
            (1, 'Science', 0, 1), (2, 'Arts', 0, 1), (3, 'Physics', 1, 1), (4, 'Archive', 0, 0);
        INSERT INTO {p}user (id, username, firstname, lastname, email, suspended, deleted, lastaccess) VALUES
            (1, 'admin', 'Ada', 'Admin', 'admin@example.com', 0, 0, 0),
            (2, 'alice', 'Alice', 'Archer', 'alice@example.com', 0, 0, {FIRST_START}),
            (3, 'bob', 'Bob', 'Baker', 'bob@example.com', 0, 0, {FIRST_START}),
            (4, 'carol', 'Carol', 'Cooper', 'carol@example.com', 0, 0, 0),
            (5, 'dave', 'Dave', 'Dyer', 'dave@example.com', 1, 0, 0),
            (6, 'erin', 'Erin', 'Evans', 'erin@example.com', 0, 1, 0);
        INSERT INTO {p}groups (id, courseid, name) VALUES
            (1, 1, 'Red'), (2, 1, 'Blue'), (3, 2, 'Green');
        INSERT INTO {p}groups_members (id, groupid, userid) VALUES
            (1, 1, 2), (2, 2, 2), (3, 1, 3), (4, 3, 4);
        INSERT INTO {p}user_enrolments (id, enrolid, userid, timecreated) VALUES
            (1, 1, 2, 0), (2, 1, 3, 0), (3, 1, 4, 0), (4, 2, 2, 0), (5, 2, 5, 0),
            (6, 3, 3, 0), (7, 5, 2, 0);
        INSERT INTO {p}grade_items (id, courseid, itemname, grademax) VALUES
            (1, 1, 'Quiz', 10), (2, 1, 'Essay', 20);
        INSERT INTO {p}grade_grades (id, itemid, userid, finalgrade) VALUES
            (1, 1, 2, 5), (2, 2, 2, 15), (3, 1, 3, 8);
        "
    );
    for (id, category, fullname, shortname) in COURSES {
        let start = FIRST_START + (id - 1) * 86_400;
        sql.push_str(&format!(
            "INSERT INTO {p}course (id, category, fullname, shortname, startdate, visible) \
             VALUES ({id}, {category}, '{fullname}', '{shortname}', {start}, 1);\n\
             INSERT INTO {p}enrol (id, courseid, enrol) VALUES ({id}, {id}, 'manual');\n"
        ));
    }
    sql
}

/// Seeded in-memory database with unprefixed tables.
pub async fn fixture_storage() -> Result<Arc<dyn Storage>> {
    fixture_storage_with_prefix("").await
}

/// Seeded in-memory database whose tables carry `prefix`.
pub async fn fixture_storage_with_prefix(prefix: &str) -> Result<Arc<dyn Storage>> {
    // One connection: each in-memory connection is a separate database.
    let storage = SqliteStorage::connect("sqlite::memory:", 1).await?;
    sqlx::raw_sql(&schema(prefix))
        .execute(storage.pool())
        .await
        .context("failed to create fixture schema")?;
    sqlx::raw_sql(&seed(prefix))
        .execute(storage.pool())
        .await
        .context("failed to seed fixture data")?;
    Ok(Arc::new(storage))
}

/// Assertion helpers for report rows.
#[allow(clippy::unwrap_used)]
pub mod assert {
    use quarry_engine::db::Row;
    use serde_json::Value;

    /// Values of `column`, in row order.
    pub fn column<'a>(rows: &'a [Row], column: &str) -> Vec<&'a Value> {
        rows.iter()
            .map(|row| {
                row.get(column).unwrap_or_else(|| {
                    panic!("Expected row to have column '{column}', got: {row:?}")
                })
            })
            .collect()
    }

    /// Assert that `column` holds exactly `expected`, in order.
    pub fn column_eq(rows: &[Row], name: &str, expected: &[Value]) {
        let actual: Vec<Value> = column(rows, name).into_iter().cloned().collect();
        assert_eq!(
            actual,
            expected,
            "Column '{name}' mismatch:\nactual: {}\nexpected: {}",
            serde_json::to_string(&actual).unwrap(),
            serde_json::to_string(expected).unwrap()
        );
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }

    /// Assert that a string does not contain a substring.
    pub fn not_contains(haystack: &str, needle: &str) {
        assert!(
            !haystack.contains(needle),
            "Expected string to NOT contain '{needle}'\nActual: {haystack}"
        );
    }
}
