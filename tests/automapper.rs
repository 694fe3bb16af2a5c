mod common;

use std::{collections::HashSet, thread};

use common::{headers, load_schema, table};
use plan_mapper::{
    automapper::{self, AutoMapper, AutoMapperOptions, AutoMapperResults},
    lines::MappingLine,
    mapping_path::MappingPath,
    rules::{AutoMapperScope, RuleTable},
    schema::{AllowAll, Schema},
};

fn automap(schema: &Schema, base: &str, names: &[&str]) -> AutoMapperResults {
    automapper::map(
        schema,
        RuleTable::builtin(),
        table(schema, base),
        &headers(names),
        AutoMapperOptions::default(),
        None,
    )
    .expect("auto-map")
}

fn rendered(paths: &[MappingPath]) -> Vec<String> {
    paths.iter().map(ToString::to_string).collect()
}

fn first(results: &AutoMapperResults, header: &str) -> Option<String> {
    results.get(header).first().map(ToString::to_string)
}

#[test]
fn maps_fixture_headers() {
    let schema = load_schema();
    let raw = std::fs::read_to_string(common::fixture_path("headers.csv")).expect("headers fixture");
    let header_row: Vec<&str> = raw.lines().next().expect("header row").split(',').collect();
    let results = automap(&schema, "CollectionObject", &header_row);

    let expected = [
        ("Catalog Number", Some("catalogNumber")),
        ("Cataloged By", Some("cataloger.lastName")),
        (
            "Collector Last Name",
            Some("collectingEvent.collectors.#1.agent.lastName"),
        ),
        (
            "Collector 2 Last Name",
            Some("collectingEvent.collectors.#2.agent.lastName"),
        ),
        ("Start Date", Some("collectingEvent.startDate")),
        ("Latitude 1", Some("collectingEvent.locality.latitude1")),
        ("Longitude 1", Some("collectingEvent.locality.longitude1")),
        ("Species", Some("determinations.#1.taxon.$Species.name")),
        ("Species Author", Some("determinations.#1.taxon.$Species.author")),
        ("Count", Some("preparations.#1.countAmt")),
        ("ID", None),
    ];
    for (header, path) in expected {
        assert_eq!(first(&results, header).as_deref(), path, "header '{header}'");
    }
    assert_eq!(results.mapped_count(), 10);
    for (_, paths) in results.iter() {
        assert!(paths.len() <= 1, "auto-mapper scope proposes one path per header");
    }
}

#[test]
fn cataloged_by_uses_shortcut() {
    let schema = load_schema();
    let results = automap(&schema, "CollectionObject", &["Cataloged By"]);
    assert_eq!(rendered(results.get("Cataloged By")), vec!["cataloger.lastName"]);
}

#[test]
fn digits_select_the_numbered_field() {
    let schema = load_schema();
    let results = automap(&schema, "CollectionObject", &["Latitude 1", "Latitude 2"]);
    assert_eq!(
        first(&results, "Latitude 1").as_deref(),
        Some("collectingEvent.locality.latitude1")
    );
    assert_eq!(
        first(&results, "Latitude 2").as_deref(),
        Some("collectingEvent.locality.latitude2")
    );
}

#[test]
fn shallow_matches_win_and_collisions_move_deeper() {
    let schema = load_schema();
    let results = automap(&schema, "CollectionObject", &["Remarks", "Remarks (2)"]);
    assert_eq!(first(&results, "Remarks").as_deref(), Some("remarks"));
    assert_eq!(first(&results, "Remarks (2)").as_deref(), Some("cataloger.remarks"));
}

#[test]
fn denied_field_only_applies_to_its_scope() {
    let schema = load_schema();
    let base = table(&schema, "Agent");
    let names = headers(&["Agent Type"]);

    let auto = automapper::map(
        &schema,
        RuleTable::builtin(),
        base,
        &names,
        AutoMapperOptions::for_scope(AutoMapperScope::AutoMapper),
        None,
    )
    .expect("auto-map");
    assert!(auto.get("Agent Type").is_empty());

    let suggestion = automapper::map(
        &schema,
        RuleTable::builtin(),
        base,
        &names,
        AutoMapperOptions::for_scope(AutoMapperScope::Suggestion),
        None,
    )
    .expect("suggest");
    assert_eq!(rendered(suggestion.get("Agent Type"))[0], "agentType");
}

#[test]
fn depth_limit_bounds_the_search() {
    let schema = load_schema();
    let options = AutoMapperOptions {
        depth_limit: 1,
        ..AutoMapperOptions::default()
    };
    let results = automapper::map(
        &schema,
        RuleTable::builtin(),
        table(&schema, "CollectionObject"),
        &headers(&["Catalog Number", "Start Date"]),
        options,
        None,
    )
    .expect("auto-map");
    assert_eq!(first(&results, "Catalog Number").as_deref(), Some("catalogNumber"));
    assert_eq!(first(&results, "Start Date"), None);
    assert_eq!(results.searched_tables(), ["CollectionObject"]);
}

#[test]
fn starting_path_restricts_proposals() {
    let schema = load_schema();
    let results = automapper::map(
        &schema,
        RuleTable::builtin(),
        table(&schema, "CollectionObject"),
        &headers(&["Start Date", "Catalog Number"]),
        AutoMapperOptions::default(),
        Some(&MappingPath::parse("collectingEvent")),
    )
    .expect("auto-map");
    assert_eq!(first(&results, "Start Date").as_deref(), Some("collectingEvent.startDate"));
    assert_eq!(first(&results, "Catalog Number"), None);
    assert_eq!(results.searched_tables()[0], "CollectingEvent");
}

#[test]
fn search_visits_tables_breadth_first_once() {
    let schema = load_schema();
    let results = automap(&schema, "CollectionObject", &["Nothing Matches This"]);
    let searched = results.searched_tables();
    assert_eq!(searched[0], "CollectionObject");

    let position = |name: &str| {
        searched
            .iter()
            .position(|table| table == name)
            .unwrap_or_else(|| panic!("{name} searched"))
    };
    assert!(position("CollectingEvent") < position("Locality"));
    assert!(position("Agent") < position("Address"));
    assert!(position("Determination") < position("Taxon"));

    let unique: HashSet<&String> = searched.iter().collect();
    assert_eq!(unique.len(), searched.len());
    assert!(!searched.iter().any(|table| table == "Collection"));
}

#[test]
fn cyclic_schema_terminates() {
    let schema = Schema::from_yaml_str(
        r#"
tables:
  - name: Left
    fields:
      - name: title
      - name: right
        relationship: { type: many-to-one, related: Right }
  - name: Right
    fields:
      - name: label
      - name: left
        relationship: { type: many-to-one, related: Left }
"#,
    )
    .expect("schema");
    let results = automapper::map(
        &schema,
        RuleTable::builtin(),
        table(&schema, "Left"),
        &headers(&["Unmatched"]),
        AutoMapperOptions::default(),
        None,
    )
    .expect("auto-map");
    assert!(results.get("Unmatched").is_empty());
    assert_eq!(results.searched_tables(), ["Left", "Right"]);
}

#[test]
fn custom_rules_replace_builtin_ones() {
    let schema = load_schema();
    let rules = RuleTable::from_yaml_str(
        r#"
shortcuts:
  CollectionObject:
    - mapping_path: [accession, accessionNumber]
      headers:
        contains: [accn]
"#,
    )
    .expect("rules");
    let results = AutoMapper::new(
        &schema,
        &rules,
        table(&schema, "CollectionObject"),
        &headers(&["Accn No.", "Cataloged By"]),
        AutoMapperOptions::default(),
    )
    .with_access(&AllowAll)
    .run();
    assert_eq!(first(&results, "Accn No.").as_deref(), Some("accession.accessionNumber"));
    assert_eq!(first(&results, "Cataloged By"), None);
}

#[test]
fn header_settles_on_its_first_field_unless_scope_collects_more() {
    let schema = load_schema();
    let rules = RuleTable::from_yaml_str(
        r#"
synonyms:
  Agent:
    firstName:
      - headers: { string: [person] }
    lastName:
      - headers: { string: [person] }
"#,
    )
    .expect("rules");
    let run = |scope| {
        automapper::map(
            &schema,
            &rules,
            table(&schema, "Agent"),
            &headers(&["Person"]),
            AutoMapperOptions::for_scope(scope),
            None,
        )
        .expect("auto-map")
    };

    let auto = run(AutoMapperScope::AutoMapper);
    assert_eq!(rendered(auto.get("Person")), vec!["firstName"]);

    let suggestion = run(AutoMapperScope::Suggestion);
    assert_eq!(rendered(suggestion.get("Person")), vec!["firstName", "lastName"]);
}

#[test]
fn suggest_avoids_paths_taken_by_other_lines() {
    let schema = load_schema();
    let lines = vec![
        MappingLine::new(
            "Collector Last Name",
            MappingPath::parse("collectingEvent.collectors.#1.agent.lastName"),
        ),
        MappingLine::new("Last Name", MappingPath::parse("collectingEvent.collectors.0")),
    ];
    let suggestions = automapper::suggest(
        &schema,
        RuleTable::builtin(),
        &AllowAll,
        table(&schema, "CollectionObject"),
        &lines,
        1,
        2,
    )
    .expect("suggest");
    assert_eq!(
        rendered(&suggestions),
        vec!["collectingEvent.collectors.#2.agent.lastName"]
    );
}

#[test]
fn suggestions_are_ordered_shallow_first() {
    let schema = load_schema();
    let lines = vec![MappingLine::unmapped("Remarks")];
    let suggestions = automapper::suggest(
        &schema,
        RuleTable::builtin(),
        &AllowAll,
        table(&schema, "CollectionObject"),
        &lines,
        0,
        0,
    )
    .expect("suggest");
    assert_eq!(
        rendered(&suggestions),
        vec!["remarks", "cataloger.remarks", "collectingEvent.remarks"]
    );
    let depths: Vec<usize> = suggestions.iter().map(|path| path.genericize().len()).collect();
    assert!(depths.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn suggest_for_missing_line_is_empty() {
    let schema = load_schema();
    let suggestions = automapper::suggest(
        &schema,
        RuleTable::builtin(),
        &AllowAll,
        table(&schema, "CollectionObject"),
        &[],
        3,
        0,
    )
    .expect("suggest");
    assert!(suggestions.is_empty());
}

#[test]
fn concurrent_runs_are_independent() {
    let schema = load_schema();
    let first_headers = ["Catalog Number", "Start Date"];
    let second_headers = ["Species", "Count"];
    let sequential = (
        automap(&schema, "CollectionObject", &first_headers),
        automap(&schema, "CollectionObject", &second_headers),
    );

    let concurrent = thread::scope(|scope| {
        let left = scope.spawn(|| automap(&schema, "CollectionObject", &first_headers));
        let right = scope.spawn(|| automap(&schema, "CollectionObject", &second_headers));
        (
            left.join().expect("first run"),
            right.join().expect("second run"),
        )
    });
    assert_eq!(concurrent, sequential);
}

#[test]
fn results_convert_to_lines() {
    let schema = load_schema();
    let results = automap(&schema, "CollectionObject", &["Catalog Number", "ID"]);
    let lines = results.to_lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].is_mapped());
    assert_eq!(lines[1], MappingLine::unmapped("ID"));
}
