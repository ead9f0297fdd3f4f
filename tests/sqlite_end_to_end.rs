#![cfg(feature = "sqlite")]

use reminder_custom_fields::{
    Condition, ConditionSet, Engine, EntityRef, FormSubmission, Logic, MappingType, Operator,
    RecipientQuery, Schedule, adapters::sqlite::SqliteAdapter, query::ParamType,
};

async fn setup() -> (Engine, SqliteAdapter) {
    let adapter = SqliteAdapter::new_memory().await.unwrap();
    adapter.init_schema().await.unwrap();

    for sql in [
        r#"INSERT INTO civicrm_custom_group (id, title, extends, table_name) VALUES
            (1, 'Bio', 'Individual', 'civicrm_value_bio_1'),
            (2, 'Member info', 'Membership', 'civicrm_value_member_2'),
            (3, 'Call notes', 'Activity', 'civicrm_value_call_3')"#,
        r#"INSERT INTO civicrm_custom_field (id, custom_group_id, label, column_name, data_type, html_type) VALUES
            (7, 1, 'First name', 'first_name', 'String', 'Text'),
            (4, 2, 'Level', 'level_4', 'String', 'Select'),
            (5, 2, 'Years', 'years_5', 'Int', 'Text'),
            (8, 3, 'Outcome', 'outcome_8', 'String', 'Select')"#,
        r#"INSERT INTO civicrm_action_schedule (id, title, mapping_id) VALUES
            (1, 'Renewal', 'membership')"#,
        "CREATE TABLE civicrm_membership (id INTEGER PRIMARY KEY, contact_id INTEGER NOT NULL, status_id INTEGER NOT NULL)",
        "CREATE TABLE civicrm_activity (id INTEGER PRIMARY KEY, source_contact_id INTEGER NOT NULL)",
        "CREATE TABLE civicrm_value_bio_1 (entity_id INTEGER PRIMARY KEY, first_name TEXT)",
        "CREATE TABLE civicrm_value_member_2 (entity_id INTEGER PRIMARY KEY, level_4 TEXT, years_5 INTEGER)",
        "CREATE TABLE civicrm_value_call_3 (entity_id INTEGER PRIMARY KEY, outcome_8 TEXT)",
        r#"INSERT INTO civicrm_membership (id, contact_id, status_id) VALUES
            (10, 100, 1), (11, 101, 1), (12, 102, 1), (13, 103, 3)"#,
        r#"INSERT INTO civicrm_value_bio_1 (entity_id, first_name) VALUES
            (100, 'Jane'), (101, 'Bob'), (102, 'Ann'), (103, 'Jane')"#,
        r#"INSERT INTO civicrm_value_member_2 (entity_id, level_4, years_5) VALUES
            (10, 'Gold', 5), (11, 'Silver', 2), (13, 'Gold', 9)"#,
        "INSERT INTO civicrm_activity (id, source_contact_id) VALUES (500, 101)",
        "INSERT INTO civicrm_value_call_3 (entity_id, outcome_8) VALUES (500, 'Interested')",
    ] {
        sqlx::query(sql).execute(adapter.pool()).await.unwrap();
    }

    let engine = Engine::new(Box::new(SqliteAdapter::from_pool(adapter.pool().clone())));
    (engine, adapter)
}

/// Current memberships only; the status parameter sits below the
/// generated parameter range.
fn base(_: &Schedule) -> RecipientQuery {
    RecipientQuery::new("e.id", "civicrm_membership e")
        .where_clause("e.status_id = %1")
        .param(1, "1", ParamType::Integer)
}

async fn recipients(
    engine: &Engine,
    adapter: &SqliteAdapter,
    conditions: ConditionSet,
) -> Vec<i64> {
    engine.save_conditions(1, &conditions).await.unwrap();
    let prepared = engine.prepare_all(None, base).await.unwrap();
    assert_eq!(prepared.len(), 1);

    let mut ids = adapter.fetch_recipient_ids(&prepared[0].1).await.unwrap();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_no_conditions_keeps_base() {
    let (engine, adapter) = setup().await;
    assert_eq!(
        recipients(&engine, &adapter, ConditionSet::new()).await,
        vec![10, 11, 12]
    );
}

#[tokio::test]
async fn test_membership_level() {
    let (engine, adapter) = setup().await;
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Membership, 4, Operator::Equal).value("Gold"));
    assert_eq!(recipients(&engine, &adapter, conditions).await, vec![10]);
}

#[tokio::test]
async fn test_left_join_null_semantics() {
    let (engine, adapter) = setup().await;

    let missing =
        ConditionSet::new().with(Condition::new(EntityRef::Membership, 4, Operator::IsNull));
    assert_eq!(recipients(&engine, &adapter, missing).await, vec![12]);

    // a missing custom row does not satisfy !=
    let not_gold = ConditionSet::new()
        .with(Condition::new(EntityRef::Membership, 4, Operator::NotEqual).value("Gold"));
    assert_eq!(recipients(&engine, &adapter, not_gold).await, vec![11]);
}

#[tokio::test]
async fn test_contact_or_membership() {
    let (engine, adapter) = setup().await;
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Contact, 7, Operator::Like).value("ane"))
        .with(
            Condition::new(EntityRef::Membership, 4, Operator::In)
                .value(vec!["Silver"])
                .logic(Logic::Or),
        );
    assert_eq!(recipients(&engine, &adapter, conditions).await, vec![10, 11]);
}

#[tokio::test]
async fn test_numeric_comparison_on_text_param() {
    let (engine, adapter) = setup().await;
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Membership, 5, Operator::GreaterThanOrEqual).value("3"));
    assert_eq!(recipients(&engine, &adapter, conditions).await, vec![10]);
}

#[tokio::test]
async fn test_activity_through_source_contact() {
    let (engine, adapter) = setup().await;
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Activity, 8, Operator::Equal).value("Interested"));
    assert_eq!(recipients(&engine, &adapter, conditions).await, vec![11]);
}

#[tokio::test]
async fn test_skipped_conditions_do_not_filter() {
    let (engine, adapter) = setup().await;
    let conditions = ConditionSet::new()
        // deleted field
        .with(Condition::new(EntityRef::Membership, 404, Operator::Equal).value("Gold"))
        // event data is not reachable from a membership
        .with(Condition::new(EntityRef::Event, 4, Operator::Equal).value("Gold"))
        // empty set
        .with(
            Condition::new(EntityRef::Membership, 4, Operator::NotIn).value(Vec::<String>::new()),
        );
    assert_eq!(
        recipients(&engine, &adapter, conditions).await,
        vec![10, 11, 12]
    );
}

#[tokio::test]
async fn test_form_roundtrip_through_storage() {
    let (engine, adapter) = setup().await;
    let form = FormSubmission::from_pairs([
        ("custom_field_entity", "Individual"),
        ("custom_field_id", "7"),
        ("custom_field_operator", "IN"),
        ("custom_field_values", "Ann, Bob"),
        ("custom_field_entity_1", "Membership"),
        ("custom_field_id_1", "4"),
        ("custom_field_operator_1", "IS NOT NULL"),
        ("custom_field_logic_1", "AND"),
    ]);
    engine.save_form(1, &form).await.unwrap();

    let prepared = engine
        .prepare_all(Some(MappingType::Membership), base)
        .await
        .unwrap();
    let ids = adapter.fetch_recipient_ids(&prepared[0].1).await.unwrap();
    assert_eq!(ids, vec![11]);
}
