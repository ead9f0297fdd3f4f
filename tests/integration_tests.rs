use reminder_custom_fields::{
    Condition, ConditionSet, ConditionValue, Engine, EntityRef, Error, FilterConfig,
    FormSubmission, Logic, MappingType, Operator, RecipientQuery, Schedule, ScheduleStore,
    adapters::memory::MemoryAdapter, codec, query::ParamType,
};

fn setup() -> (Engine, MemoryAdapter) {
    let adapter = MemoryAdapter::new();

    let bio = adapter.add_group("Bio", "Individual", "civicrm_value_bio_1");
    adapter.add_field(7, bio, "First name", "first_name", "String", "Text");

    let member = adapter.add_group("Member info", "Membership", "civicrm_value_member_2");
    adapter.add_field(4, member, "Level", "level_4", "String", "Select");
    adapter.add_field(5, member, "Years", "years_5", "Int", "Text");

    let event = adapter.add_group("Event info", "Event", "civicrm_value_event_3");
    adapter.add_field(3, event, "Track", "track_3", "String", "Select");

    let part = adapter.add_group("Participant info", "Participant", "civicrm_value_part_4");
    adapter.add_field(9, part, "Role", "role_9", "String", "Select");

    adapter.add_schedule(Schedule::new(1, "Renewal", MappingType::Membership));
    adapter.add_schedule(Schedule::new(2, "Event soon", MappingType::Event));

    let engine = Engine::new(Box::new(adapter.clone()));
    (engine, adapter)
}

fn base(schedule: &Schedule) -> RecipientQuery {
    RecipientQuery::new(
        "e.id, e.contact_id",
        format!("{} e", schedule.mapping.base_table()),
    )
}

#[tokio::test]
async fn test_form_to_filtered_membership_query() {
    let (engine, _) = setup();

    let form = FormSubmission::from_pairs([
        ("custom_field_entity", "Contact"),
        ("custom_field_id", "7"),
        ("custom_field_operator", "="),
        ("custom_field_value", "Jane"),
    ]);
    let saved = engine.save_form(1, &form).await.unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(engine.conditions(1).await.unwrap(), saved);

    let prepared = engine
        .prepare_all(Some(MappingType::Membership), base)
        .await
        .unwrap();
    assert_eq!(prepared.len(), 1);

    let (schedule, query) = &prepared[0];
    assert_eq!(schedule.id, 1);
    assert_eq!(
        query.to_sql(),
        "SELECT e.id, e.contact_id FROM civicrm_membership e \
         LEFT JOIN civicrm_value_bio_1 cf_1000 ON cf_1000.entity_id = e.contact_id \
         WHERE ((cf_1000.first_name = %1000))"
    );
    assert_eq!(query.params()[&1000].value, "Jane");
}

#[tokio::test]
async fn test_event_or_group() {
    let (engine, _) = setup();

    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Event, 3, Operator::In).value(vec!["A", "B"]))
        .with(
            Condition::new(EntityRef::Participant, 9, Operator::NotEqual)
                .value("x")
                .logic(Logic::Or),
        )
        // not reachable from an event mapping
        .with(Condition::new(EntityRef::Contribution, 7, Operator::Equal).value("y"));
    engine.save_conditions(2, &conditions).await.unwrap();

    let prepared = engine
        .prepare_all(Some(MappingType::Event), base)
        .await
        .unwrap();
    let (_, query) = &prepared[0];

    assert_eq!(query.joins().len(), 2);
    assert_eq!(
        query.wheres(),
        ["((cf_1000.track_3 IN (%1000, %1001)) OR (cf_1001.role_9 != %1002))"]
    );
    let values: Vec<&str> = query.params().values().map(|p| p.value.as_str()).collect();
    assert_eq!(values, ["A", "B", "x"]);
}

#[tokio::test]
async fn test_unfiltered_and_corrupt_schedules_pass_through() {
    let (engine, adapter) = setup();
    let mut corrupt = Schedule::new(3, "Corrupt", MappingType::Membership);
    corrupt.filter_data = Some("a:2:{i:0;".to_string());
    adapter.add_schedule(corrupt);

    let prepared = engine.prepare_all(None, base).await.unwrap();
    assert_eq!(prepared.len(), 3);
    for (schedule, query) in &prepared {
        assert_eq!(query, &base(schedule));
    }
}

#[tokio::test]
async fn test_field_cache_shared_across_schedules() {
    let (engine, adapter) = setup();
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Contact, 7, Operator::IsNotNull))
        .with(Condition::new(EntityRef::Contact, 404, Operator::IsNull));
    engine.save_conditions(1, &conditions).await.unwrap();
    engine.save_conditions(2, &conditions).await.unwrap();

    let prepared = engine.prepare_all(None, base).await.unwrap();
    assert_eq!(prepared.len(), 2);
    // one lookup for the known field and one for the missing one
    assert_eq!(adapter.field_lookups(), 2);
    for (_, query) in &prepared {
        assert_eq!(query.wheres(), ["(cf_1000.first_name IS NOT NULL)"]);
        assert!(query.params().is_empty());
    }
}

#[tokio::test]
async fn test_metadata_outage_fails_open() {
    let (engine, adapter) = setup();
    let conditions = ConditionSet::new()
        .with(Condition::new(EntityRef::Membership, 4, Operator::Equal).value("Gold"));
    engine.save_conditions(1, &conditions).await.unwrap();

    adapter.fail_lookups(true);
    let prepared = engine
        .prepare_all(Some(MappingType::Membership), base)
        .await
        .unwrap();
    assert_eq!(prepared[0].1, base(&prepared[0].0));
}

#[tokio::test]
async fn test_typed_params() {
    let adapter = MemoryAdapter::new();
    let member = adapter.add_group("Member info", "Membership", "civicrm_value_member_2");
    adapter.add_field(5, member, "Years", "years_5", "Int", "Text");
    adapter.add_schedule(Schedule::new(1, "Renewal", MappingType::Membership));

    let config = FilterConfig {
        typed_params: true,
        param_base: 1,
        alias_base: 1,
        alias_prefix: "flt".to_string(),
    };
    let engine = Engine::with_config(Box::new(adapter), config).unwrap();
    engine
        .save_conditions(
            1,
            &ConditionSet::new().with(
                Condition::new(EntityRef::Membership, 5, Operator::GreaterThan).value("3"),
            ),
        )
        .await
        .unwrap();

    let prepared = engine.prepare_all(None, base).await.unwrap();
    let query = &prepared[0].1;
    assert_eq!(query.wheres(), ["(flt1.years_5 > %1)"]);
    assert_eq!(query.params()[&1].ty, ParamType::Integer);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = FilterConfig {
        alias_prefix: "cf; DROP".to_string(),
        ..FilterConfig::default()
    };
    assert!(matches!(
        Engine::with_config(Box::new(MemoryAdapter::new()), config),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_save_unknown_schedule() {
    let (engine, _) = setup();
    assert!(matches!(
        engine.save_conditions(99, &ConditionSet::new()).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(engine.conditions(99).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_migrate_legacy() {
    let (engine, adapter) = setup();

    let mut legacy_json = Schedule::new(10, "Legacy JSON", MappingType::Event);
    legacy_json.filter_data =
        Some(r#"[{"entity":"Event","field_id":"3","operator":"IN","value":"A, B"}]"#.to_string());
    adapter.add_schedule(legacy_json);

    let mut legacy_php = Schedule::new(11, "Legacy PHP", MappingType::Membership);
    legacy_php.filter_data = Some(
        concat!(
            r#"a:1:{i:0;a:4:{s:6:"entity";s:10:"Membership";s:8:"field_id";i:4;"#,
            r#"s:8:"operator";s:1:"=";s:5:"value";s:4:"Gold";}}"#
        )
        .to_string(),
    );
    adapter.add_schedule(legacy_php);

    let mut unreadable = Schedule::new(12, "Broken", MappingType::Event);
    unreadable.filter_data = Some("garbage".to_string());
    adapter.add_schedule(unreadable);

    let mut inactive = Schedule::new(13, "Paused", MappingType::Event);
    inactive.is_active = false;
    inactive.filter_data =
        Some(r#"[{"entity":"Event","field_id":3,"operator":"=","value":"A"}]"#.to_string());
    adapter.add_schedule(inactive);

    let canonical = ConditionSet::new()
        .with(Condition::new(EntityRef::Contact, 7, Operator::Like).value("Ja"));
    engine.save_conditions(1, &canonical).await.unwrap();

    assert_eq!(engine.migrate_legacy().await.unwrap(), 3);
    assert_eq!(engine.migrate_legacy().await.unwrap(), 0);

    let paused = engine.conditions(13).await.unwrap();
    assert_eq!(
        paused,
        ConditionSet::new().with(Condition::new(EntityRef::Event, 3, Operator::Equal).value("A"))
    );
    let (_, format) = codec::decode_strict(
        &adapter.fetch_schedule(13).await.unwrap().unwrap().filter_data.unwrap(),
    )
    .unwrap();
    assert_eq!(format, codec::Format::Json);

    let schedules = engine.active_schedules(None).await.unwrap();
    let stored = |id: i64| {
        schedules
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.filter_data.clone())
            .unwrap()
    };

    let (set, format) = codec::decode_strict(&stored(10)).unwrap();
    assert_eq!(format, codec::Format::Json);
    assert_eq!(
        set.conditions()[0].value,
        Some(ConditionValue::List(vec!["A".into(), "B".into()]))
    );

    let (set, format) = codec::decode_strict(&stored(11)).unwrap();
    assert_eq!(format, codec::Format::Json);
    assert_eq!(
        set,
        ConditionSet::new()
            .with(Condition::new(EntityRef::Membership, 4, Operator::Equal).value("Gold"))
    );

    assert_eq!(stored(12), "garbage");
}

#[tokio::test]
async fn test_available_fields() {
    let (engine, adapter) = setup();
    let org = adapter.add_group("Org", "Organization", "civicrm_value_org_5");
    adapter.add_field(20, org, "Employees", "employees_20", "Int", "Text");

    let fields = engine.available_fields(&EntityRef::Contact).await.unwrap();
    let labels: Vec<(&str, &str)> = fields
        .iter()
        .map(|f| (f.label.as_str(), f.group_title.as_str()))
        .collect();
    assert_eq!(labels, [("Employees", "Org"), ("First name", "Bio")]);

    let json = serde_json::to_string(&engine.available_fields(&EntityRef::Event).await.unwrap())
        .unwrap();
    assert_eq!(
        json,
        r#"[{"id":3,"label":"Track","data_type":"String","html_type":"Select","group_title":"Event info"}]"#
    );
}
