mod common;

use std::collections::BTreeSet;

use common::{load_schema, table};
use plan_mapper::{
    lines::{ColumnOptions, MappingLine, MatchBehavior},
    mapping_path::{MappingPath, rebase_to_many},
    schema::Schema,
    upload_plan::{PlanError, UploadPlan, Uploadable, build_plan, parse_plan},
};
use proptest::prelude::*;
use serde_json::{Value, json};

fn line(header: &str, path: &str) -> MappingLine {
    MappingLine::new(header, MappingPath::parse(path))
}

fn fixture_lines() -> Vec<MappingLine> {
    vec![
        line("Catalog Number", "catalogNumber"),
        line("Cataloged By", "cataloger.lastName"),
        line("Collector Last Name", "collectingEvent.collectors.#1.agent.lastName"),
        line("Collector 2 Last Name", "collectingEvent.collectors.#2.agent.lastName"),
        line("Start Date", "collectingEvent.startDate"),
        line("Latitude 1", "collectingEvent.locality.latitude1"),
        line("Species", "determinations.#1.taxon.$Species.name"),
        line("Species Author", "determinations.#1.taxon.$Species.author"),
        line("Count", "preparations.#1.countAmt").with_options(ColumnOptions {
            match_behavior: MatchBehavior::IgnoreWhenBlank,
            null_allowed: false,
            default: None,
        }),
        MappingLine::unmapped("ID"),
    ]
}

fn build(schema: &Schema, lines: &[MappingLine]) -> Result<UploadPlan, PlanError> {
    build_plan(schema, table(schema, "CollectionObject"), lines, &BTreeSet::new())
}

fn sorted(mut lines: Vec<MappingLine>) -> Vec<MappingLine> {
    lines.sort_by(|left, right| left.header_name.cmp(&right.header_name));
    lines
}

fn decoded(schema: &Schema, plan: &UploadPlan) -> Vec<MappingLine> {
    let parsed = parse_plan(schema, plan).expect("parse plan");
    parsed.lines.into_iter().map(MappingLine::from).collect()
}

fn empty_table(wbcols: Value) -> Value {
    json!({ "uploadTable": { "wbcols": wbcols, "toOne": {}, "toMany": {} } })
}

#[test]
fn builds_nested_plan_structure() {
    let schema = load_schema();
    let plan = build(&schema, &fixture_lines()).expect("build plan");
    let value = serde_json::to_value(&plan).expect("plan json");

    let agent = |header: &str| {
        json!({
            "wbcols": {},
            "toOne": { "agent": empty_table(json!({ "lastname": header })) }
        })
    };
    let expected = json!({
        "baseTableName": "collectionobject",
        "uploadable": {
            "uploadTable": {
                "wbcols": { "catalognumber": "Catalog Number" },
                "toOne": {
                    "cataloger": empty_table(json!({ "lastname": "Cataloged By" })),
                    "collectingevent": {
                        "uploadTable": {
                            "wbcols": { "startdate": "Start Date" },
                            "toOne": {
                                "locality": empty_table(json!({ "latitude1": "Latitude 1" }))
                            },
                            "toMany": {
                                "collectors": [agent("Collector Last Name"), agent("Collector 2 Last Name")]
                            }
                        }
                    }
                },
                "toMany": {
                    "determinations": [{
                        "wbcols": {},
                        "toOne": {
                            "taxon": {
                                "treeRecord": {
                                    "ranks": {
                                        "Species": {
                                            "treeNodeCols": {
                                                "author": "Species Author",
                                                "name": "Species"
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }],
                    "preparations": [{
                        "wbcols": {
                            "countamt": {
                                "column": "Count",
                                "matchBehavior": "ignoreWhenBlank",
                                "nullAllowed": false,
                                "default": null
                            }
                        },
                        "toOne": {}
                    }]
                }
            }
        }
    });
    assert_eq!(value, expected);
}

#[test]
fn plan_round_trips_to_the_same_lines() {
    let schema = load_schema();
    let lines = fixture_lines();
    let plan = build(&schema, &lines).expect("build plan");

    let text = plan.to_json_string().expect("serialize");
    let reread = UploadPlan::from_json_str(&text).expect("deserialize");
    assert_eq!(reread, plan);

    let mapped: Vec<MappingLine> = lines.into_iter().filter(MappingLine::is_mapped).collect();
    assert_eq!(sorted(decoded(&schema, &reread)), sorted(mapped));
}

#[test]
fn decoding_restores_schema_casing() {
    let schema = load_schema();
    let plan = build(&schema, &fixture_lines()).expect("build plan");
    let lines = decoded(&schema, &plan);
    let species = lines
        .iter()
        .find(|line| line.header_name == "Species Author")
        .expect("species author decoded");
    assert_eq!(
        species.mapping_path.to_string(),
        "determinations.#1.taxon.$Species.author"
    );
}

#[test]
fn to_many_indices_are_rebased_before_encoding() {
    let schema = load_schema();
    let lines = vec![
        line("Prep A", "preparations.#3.countAmt"),
        line("Prep B", "preparations.#7.countAmt"),
    ];
    let plan = build(&schema, &lines).expect("build plan");
    let rebased: Vec<String> = sorted(decoded(&schema, &plan))
        .iter()
        .map(|line| line.mapping_path.to_string())
        .collect();
    assert_eq!(
        rebased,
        vec!["preparations.#1.countAmt", "preparations.#2.countAmt"]
    );
}

#[test]
fn must_match_tables_are_marked_below_the_root() {
    let schema = load_schema();
    let must_match: BTreeSet<String> = ["agent", "CollectionObject"]
        .into_iter()
        .map(String::from)
        .collect();
    let plan = build_plan(
        &schema,
        table(&schema, "CollectionObject"),
        &fixture_lines(),
        &must_match,
    )
    .expect("build plan");

    let Uploadable::UploadTable(root) = &plan.uploadable else {
        panic!("root stays an upload table");
    };
    assert!(root.to_one["cataloger"].is_must_match());
    assert!(!root.to_one["collectingevent"].is_must_match());

    let parsed = parse_plan(&schema, &plan).expect("parse plan");
    let expected: BTreeSet<String> = ["Agent".to_string()].into_iter().collect();
    assert_eq!(parsed.must_match_tables, expected);
}

#[test]
fn relationship_columns_are_redirected_to_identifier_fields() {
    let schema = load_schema();
    let plan = UploadPlan::from_json_str(
        r#"{
            "baseTableName": "accession",
            "uploadable": { "uploadTable": {
                "wbcols": { "accessionnumber": "Accession", "collectionobjects": "Catalog" }
            } }
        }"#,
    )
    .expect("plan");
    let lines = sorted(decoded(&schema, &plan));
    assert_eq!(lines[0].header_name, "Accession");
    assert_eq!(lines[1].header_name, "Catalog");
    assert_eq!(
        lines[1].mapping_path.to_string(),
        "collectionObjects.#1.catalogNumber"
    );
}

#[test]
fn relationship_column_without_identifier_is_rejected() {
    let schema = load_schema();
    let plan = UploadPlan::from_json_str(
        r#"{"baseTableName":"collectingevent","uploadable":{"uploadTable":{"wbcols":{"collectors":"Collectors"}}}}"#,
    )
    .expect("plan");
    let err = parse_plan(&schema, &plan).expect_err("collector has no identifier");
    assert!(matches!(
        err,
        PlanError::NoIdentifierField { ref related, .. } if related == "Collector"
    ));
}

#[test]
fn unknown_base_table_is_rejected() {
    let schema = load_schema();
    let plan = UploadPlan::from_json_str(
        r#"{"baseTableName":"specimen","uploadable":{"uploadTable":{}}}"#,
    )
    .expect("plan");
    let err = parse_plan(&schema, &plan).expect_err("unknown table");
    assert!(matches!(err, PlanError::UnknownBaseTable(ref name) if name == "specimen"));
}

#[test]
fn unknown_uploadable_kind_is_a_json_error() {
    let err = UploadPlan::from_json_str(r#"{"baseTableName":"agent","uploadable":{"somethingElse":{}}}"#)
        .expect_err("unknown variant");
    assert!(matches!(err, PlanError::Json(_)));
}

#[test]
fn invalid_paths_are_reported_by_kind() {
    let schema = load_schema();
    let cases = [
        ("determinations.#1.taxon.$-any.name", "any-rank"),
        ("determinations.remarks", "missing-index"),
        ("determinations.#1.taxon.$Species.name.author", "past-tree-field"),
        ("determinations.#1.taxon.$Species.parent.$Genus.name", "past-tree-field"),
        ("cataloger", "incomplete"),
        ("bogus", "invalid"),
    ];
    for (path, kind) in cases {
        let err = build(&schema, &[line("Column", path)]).expect_err(path);
        let actual = match err {
            PlanError::AnyRank { .. } => "any-rank",
            PlanError::MissingToManyIndex { .. } => "missing-index",
            PlanError::PastTreeField { .. } => "past-tree-field",
            PlanError::IncompletePath { .. } => "incomplete",
            PlanError::InvalidPath { .. } => "invalid",
            other => panic!("unexpected error for {path}: {other}"),
        };
        assert_eq!(actual, kind, "path {path}");
    }
}

fn parse_json(schema: &Schema, json: &str) -> Result<Vec<MappingLine>, PlanError> {
    let plan = UploadPlan::from_json_str(json)?;
    let parsed = parse_plan(schema, &plan)?;
    Ok(parsed.lines.into_iter().map(MappingLine::from).collect())
}

#[test]
fn to_many_relationship_under_to_one_is_rejected() {
    let schema = load_schema();
    let err = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "toOne":{"determinations":{"uploadTable":{"wbcols":{"remarks":"R"}}}}
        }}}"#,
    )
    .expect_err("determinations is to-many");
    assert!(matches!(
        err,
        PlanError::MisplacedRelationship { ref table, ref field, section }
            if table == "CollectionObject" && field == "determinations" && section == "toOne"
    ));
}

#[test]
fn to_one_relationship_under_to_many_is_rejected() {
    let schema = load_schema();
    let err = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "toMany":{"cataloger":[{"wbcols":{"lastname":"L"}}]}
        }}}"#,
    )
    .expect_err("cataloger is to-one");
    assert!(matches!(
        err,
        PlanError::MisplacedRelationship { ref field, section, .. }
            if field == "cataloger" && section == "toMany"
    ));
}

#[test]
fn record_kind_must_match_the_table() {
    let schema = load_schema();
    let err = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "toMany":{"determinations":[{"toOne":{"taxon":{"uploadTable":{"wbcols":{"name":"Sp"}}}}}]}
        }}}"#,
    )
    .expect_err("taxon is a tree");
    assert!(matches!(err, PlanError::WrongRecordKind { ref table, .. } if table == "Taxon"));

    let err = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "toOne":{"cataloger":{"treeRecord":{"ranks":{}}}}
        }}}"#,
    )
    .expect_err("agent is not a tree");
    assert!(matches!(err, PlanError::WrongRecordKind { ref table, .. } if table == "Agent"));
}

#[test]
fn to_many_inside_a_to_many_record_is_rejected() {
    let schema = load_schema();
    let err = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "toMany":{"determinations":[{
                "wbcols":{"remarks":"R"},
                "toMany":{"determinationCitations":[{"wbcols":{"remarks":"Cite"}}]}
            }]}
        }}}"#,
    )
    .expect_err("nested to-many");
    assert!(matches!(err, PlanError::Json(_)));
    assert!(err.to_string().contains("toMany"));
}

#[test]
fn static_values_are_tolerated() {
    let schema = load_schema();
    let lines = parse_json(
        &schema,
        r#"{"baseTableName":"collectionobject","uploadable":{"uploadTable":{
            "wbcols":{"catalognumber":"Cat"},
            "static":{"remarks":"fixed"}
        }}}"#,
    )
    .expect("plan with static values");
    assert_eq!(lines, vec![line("Cat", "catalogNumber")]);
}

#[test]
fn nested_to_many_cannot_be_encoded() {
    let schema = load_schema();
    let err = build(
        &schema,
        &[line("Citation", "determinations.#1.determinationCitations.#1.remarks")],
    )
    .expect_err("nested to-many");
    assert!(matches!(err, PlanError::NestedToMany { .. }));
}

#[test]
fn duplicate_paths_are_rejected() {
    let schema = load_schema();
    let err = build(
        &schema,
        &[
            line("Start", "collectingEvent.startDate"),
            line("Began", "collectingevent.startdate"),
        ],
    )
    .expect_err("duplicate");
    match err {
        PlanError::DuplicatePath { first, second, path } => {
            assert_eq!(first, "Start");
            assert_eq!(second, "Began");
            assert_eq!(path, "collectingEvent.startDate");
        }
        other => panic!("unexpected error: {other}"),
    }
}

const CANDIDATES: &[&str] = &[
    "catalogNumber",
    "remarks",
    "cataloger.lastName",
    "cataloger.firstName",
    "collectingEvent.startDate",
    "collectingEvent.locality.latitude1",
    "collectingEvent.locality.geography.$Country.name",
    "collectingEvent.collectors.#1.agent.lastName",
    "collectingEvent.collectors.#3.agent.lastName",
    "collectingEvent.collectors.#3.isPrimary",
    "collectingEvent.collectors.#6.agent.firstName",
    "determinations.#2.determinedDate",
    "determinations.#2.taxon.$Genus.name",
    "determinations.#4.taxon.$Species.name",
    "determinations.#4.determiner.lastName",
    "preparations.#1.countAmt",
    "preparations.#5.prepType.name",
];

proptest! {
    #[test]
    fn build_then_parse_returns_rebased_lines(
        selected in proptest::sample::subsequence(CANDIDATES.to_vec(), 1..=CANDIDATES.len())
    ) {
        let schema = load_schema();
        let lines: Vec<MappingLine> = selected
            .iter()
            .enumerate()
            .map(|(index, path)| line(&format!("Column {index:02}"), path))
            .collect();
        let plan = build(&schema, &lines).expect("build plan");

        let paths: Vec<MappingPath> = lines.iter().map(|line| line.mapping_path.clone()).collect();
        let expected: Vec<MappingLine> = lines
            .iter()
            .zip(rebase_to_many(&paths))
            .map(|(line, path)| MappingLine::new(line.header_name.clone(), path))
            .collect();
        prop_assert_eq!(sorted(decoded(&schema, &plan)), sorted(expected));
    }
}
