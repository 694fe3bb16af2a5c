mod common;

use std::fs;

use assert_cmd::Command;
use common::{TestWorkspace, fixture_path};
use plan_mapper::{lines::MappingLine, mapping_path::MappingPath, upload_plan::UploadPlan};
use predicates::{prelude::*, str::contains};

fn plan_mapper() -> Command {
    let mut command = Command::cargo_bin("plan-mapper").expect("binary exists");
    command.env("RUST_LOG", "warn");
    command
}

fn schema_arg() -> String {
    fixture_path("schema.yaml").to_string_lossy().into_owned()
}

fn headers_arg() -> String {
    fixture_path("headers.csv").to_string_lossy().into_owned()
}

fn automapped_lines() -> Vec<MappingLine> {
    let output = plan_mapper()
        .args([
            "automap",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-i",
            headers_arg().as_str(),
        ])
        .output()
        .expect("run automap");
    assert!(output.status.success(), "automap failed: {output:?}");
    serde_json::from_slice(&output.stdout).expect("lines json")
}

#[test]
fn automap_emits_mapping_lines() {
    let lines = automapped_lines();
    assert_eq!(lines.len(), 11);
    let cataloged = lines
        .iter()
        .find(|line| line.header_name == "Cataloged By")
        .expect("cataloged by line");
    assert_eq!(cataloged.mapping_path, MappingPath::parse("cataloger.lastName"));
    let id = lines.iter().find(|line| line.header_name == "ID").expect("id line");
    assert!(!id.is_mapped());
}

#[test]
fn automap_prints_table_with_semicolon_input() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("headers.txt", "Catalog Number;Start Date\n1;2024-01-01\n");
    plan_mapper()
        .args([
            "automap",
            "-s",
            schema_arg().as_str(),
            "-b",
            "collectionobject",
            "-i",
            input.to_str().unwrap(),
            "--delimiter",
            ";",
            "--table",
        ])
        .assert()
        .success()
        .stdout(contains("mapping path"))
        .stdout(contains("catalogNumber"))
        .stdout(contains("collectingEvent.startDate"));
}

#[test]
fn automap_honours_starting_path() {
    plan_mapper()
        .args([
            "automap",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-i",
            headers_arg().as_str(),
            "--starting-path",
            "collectingEvent",
            "--table",
        ])
        .assert()
        .success()
        .stdout(contains("collectingEvent.startDate"))
        .stdout(contains("cataloger.lastName").not());
}

#[test]
fn plan_and_lines_round_trip_through_files() {
    let workspace = TestWorkspace::new();
    let lines = automapped_lines();
    let lines_path = workspace.write(
        "lines.json",
        &serde_json::to_string_pretty(&lines).expect("serialize lines"),
    );
    let plan_path = workspace.path().join("plan.json");

    plan_mapper()
        .args([
            "plan",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-l",
            lines_path.to_str().unwrap(),
            "--must-match",
            "Agent,PrepType",
            "-o",
            plan_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&plan_path).expect("read plan");
    let plan = UploadPlan::from_json_str(&contents).expect("parse plan");
    assert_eq!(plan.base_table_name, "collectionobject");
    assert!(contents.contains("mustMatchTable"));
    assert!(contents.contains("treeNodeCols"));

    let output = plan_mapper()
        .args([
            "lines",
            "-s",
            schema_arg().as_str(),
            "-u",
            plan_path.to_str().unwrap(),
            "-i",
            headers_arg().as_str(),
        ])
        .output()
        .expect("run lines");
    assert!(output.status.success(), "lines failed: {output:?}");
    let decoded: Vec<MappingLine> = serde_json::from_slice(&output.stdout).expect("decoded lines");
    assert_eq!(decoded, lines);
}

#[test]
fn must_match_tables_survive_lines_then_plan() {
    let workspace = TestWorkspace::new();
    let lines = automapped_lines();
    let lines_path = workspace.write(
        "lines.json",
        &serde_json::to_string(&lines).expect("serialize lines"),
    );
    let plan_path = workspace.path().join("plan.json");
    let must_match_path = workspace.path().join("must_match.json");
    let replanned_path = workspace.path().join("replanned.json");

    plan_mapper()
        .args([
            "plan",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-l",
            lines_path.to_str().unwrap(),
            "--must-match",
            "Agent",
            "-o",
            plan_path.to_str().unwrap(),
        ])
        .assert()
        .success();

    plan_mapper()
        .args([
            "lines",
            "-s",
            schema_arg().as_str(),
            "-u",
            plan_path.to_str().unwrap(),
            "--must-match-output",
            must_match_path.to_str().unwrap(),
            "--table",
        ])
        .assert()
        .success()
        .stdout(contains("Must-match tables: Agent"));
    let tables: Vec<String> =
        serde_json::from_str(&fs::read_to_string(&must_match_path).expect("read must-match"))
            .expect("must-match json");
    assert_eq!(tables, vec!["Agent".to_string()]);

    plan_mapper()
        .args([
            "plan",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-l",
            lines_path.to_str().unwrap(),
            "--must-match-file",
            must_match_path.to_str().unwrap(),
            "-o",
            replanned_path.to_str().unwrap(),
        ])
        .assert()
        .success();
    let original = UploadPlan::from_json_str(&fs::read_to_string(&plan_path).expect("plan"))
        .expect("original plan");
    let replanned = UploadPlan::from_json_str(&fs::read_to_string(&replanned_path).expect("plan"))
        .expect("replanned plan");
    assert_eq!(replanned, original);
}

#[test]
fn plan_rejects_any_rank_paths() {
    let workspace = TestWorkspace::new();
    let lines = vec![MappingLine::new(
        "Taxon",
        MappingPath::parse("determinations.#1.taxon.$-any.name"),
    )];
    let lines_path = workspace.write(
        "lines.json",
        &serde_json::to_string(&lines).expect("serialize lines"),
    );
    plan_mapper()
        .args([
            "plan",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-l",
            lines_path.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("any-rank wildcard"));
}

#[test]
fn navigate_lists_tree_ranks() {
    plan_mapper()
        .args([
            "navigate",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-p",
            "determinations.#1.taxon",
            "--allow-any-rank",
        ])
        .assert()
        .success()
        .stdout(contains("tree-ranks"))
        .stdout(contains("$Species"))
        .stdout(contains("$-any"));
}

#[test]
fn suggest_returns_json_paths() {
    let workspace = TestWorkspace::new();
    let lines = vec![
        MappingLine::new(
            "Collector Last Name",
            MappingPath::parse("collectingEvent.collectors.#1.agent.lastName"),
        ),
        MappingLine::new("Last Name", MappingPath::parse("collectingEvent.collectors.0")),
    ];
    let lines_path = workspace.write(
        "lines.json",
        &serde_json::to_string(&lines).expect("serialize lines"),
    );
    let output = plan_mapper()
        .args([
            "suggest",
            "-s",
            schema_arg().as_str(),
            "-b",
            "CollectionObject",
            "-l",
            lines_path.to_str().unwrap(),
            "--line",
            "1",
            "--json",
        ])
        .output()
        .expect("run suggest");
    assert!(output.status.success(), "suggest failed: {output:?}");
    let suggestions: Vec<MappingPath> = serde_json::from_slice(&output.stdout).expect("paths");
    assert_eq!(
        suggestions,
        vec![MappingPath::parse("collectingEvent.collectors.#2.agent.lastName")]
    );
}

#[test]
fn unknown_base_table_fails() {
    plan_mapper()
        .args([
            "automap",
            "-s",
            schema_arg().as_str(),
            "-b",
            "Specimen",
            "-i",
            headers_arg().as_str(),
        ])
        .assert()
        .failure()
        .stderr(contains("Unknown table 'Specimen'"));
}
