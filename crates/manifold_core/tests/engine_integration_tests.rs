//! Integration tests for the expansion engine.
//!
//! Outputs are written to absolute paths inside temporary directories, passed
//! to templates through the values context, so tests do not depend on the
//! process working directory.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use manifold_core::{Engine, EngineError, RunContext, RunOptions};
use manifold_templates::{TemplateLoader, TemplateUnit, ValuesContext};
use serde_json::{json, Value};
use tempfile::tempdir;

fn write_unit(dir: &Path, template: &str, manifest: Option<&str>) -> TemplateUnit {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("template.yaml"), template).unwrap();
    if let Some(manifest) = manifest {
        fs::write(dir.join("manifest.yaml"), manifest).unwrap();
    }
    TemplateLoader::new(dir).load_all().unwrap().remove(0)
}

fn values_with_out(out: &Path) -> ValuesContext {
    ValuesContext::from_value(json!({ "out": out.to_string_lossy() }))
}

async fn run(options: RunOptions, unit: &TemplateUnit, values: &ValuesContext) -> (Arc<RunContext>, Result<(), EngineError>) {
    let ctx = Arc::new(RunContext::new(options));
    let engine = Engine::new(Arc::clone(&ctx));
    let result = match engine.unit_expansion(unit, values, false) {
        Ok(expansion) => engine.expand(expansion).await,
        Err(e) => Err(e),
    };
    (ctx, result)
}

#[tokio::test]
async fn test_writes_serialized_payloads() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$out: {{ values.out }}/{{ name }}.json\nname: {{ name }}\nport: {{ port }}\n---\n$out: {{ values.out }}/{{ name }}.yaml\nport: {{ port }}\n",
        Some("name: api\nport: 80\n---\nname: web\nport: 8080\n"),
    );

    let (ctx, result) = run(RunOptions::default(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.written, 4);
    assert_eq!(
        fs::read_to_string(out.join("api.json")).unwrap(),
        r#"{"name":"api","port":80}"#
    );
    assert_eq!(fs::read_to_string(out.join("web.yaml")).unwrap(), "port: 8080\n");
}

#[tokio::test]
async fn test_dry_run_leaves_filesystem_unchanged() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$mkdir: {{ values.out }}/made\n$out: {{ values.out }}/{{ name }}.json\nname: {{ name }}\n",
        Some("name: a\n---\nname: b\n"),
    );

    let (ctx, result) = run(RunOptions::new().dry_run(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert!(!out.exists());
    assert_eq!(summary.written, 2);
    assert_eq!(summary.planned.len(), 2);
    assert!(summary.planned[0].target.ends_with("a.json"));
    assert_eq!(summary.planned[0].content.as_deref(), Some(r#"{"name":"a"}"#));
}

#[tokio::test]
async fn test_validation_failure_is_isolated() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$out: {{ values.out }}/{{ name }}.json\nport: {{ port }}\n",
        Some("name: one\nport: 1\n---\nname: two\nport: high\n---\nname: three\nport: 3\n"),
    );
    fs::write(
        unit_dir.join("schema.yaml"),
        "type: object\nproperties:\n  name: {type: string}\n  port: {type: integer}\nrequired: [name, port]\n",
    )
    .unwrap();
    let unit = TemplateUnit {
        schema: Some(unit_dir.join("schema.yaml")),
        ..unit
    };

    let (ctx, result) = run(RunOptions::default(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 1);
    assert!(!summary.succeeded());
    assert!(out.join("one.json").exists());
    assert!(!out.join("two.json").exists());
    assert!(out.join("three.json").exists());
}

#[tokio::test]
async fn test_nested_expansion_sees_imported_values() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$values:\n  - .: { region: eu-west-1 }\n$template: nested.yaml\n$manifest:\n  - name: child\n  - children.yaml\ntier: gold\n",
        None,
    );
    fs::write(
        unit_dir.join("nested.yaml"),
        "$out: {{ values.out }}/{{ name }}.json\nregion: {{ values.region }}\ntier: {{ tier }}\nsize: {{ size | default(value=0) }}\n",
    )
    .unwrap();
    fs::write(unit_dir.join("children.yaml"), "name: child\nsize: 3\n---\nname: sibling\n").unwrap();

    let values = values_with_out(&out);
    let (ctx, result) = run(RunOptions::new().relative(), &unit, &values).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(
        fs::read_to_string(out.join("child.json")).unwrap(),
        r#"{"region":"eu-west-1","tier":"gold","size":3}"#
    );
    assert_eq!(
        fs::read_to_string(out.join("sibling.json")).unwrap(),
        r#"{"region":"eu-west-1","tier":"gold","size":0}"#
    );
    assert_eq!(values.get("region"), None);
}

#[tokio::test]
async fn test_archive_is_shared_and_finalized_once() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("bundle.zip");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$archive: {{ values.archive }}\n$out: configs/{{ name }}.yaml\nname: {{ name }}\n",
        Some("name: first\n---\nname: second\n"),
    );
    let values = ValuesContext::from_value(json!({ "archive": archive.to_string_lossy() }));

    let (ctx, result) = run(RunOptions::default(), &unit, &values).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.archives.len(), 1);
    assert_eq!(
        summary.archives[0].entries,
        vec!["configs/first.yaml", "configs/second.yaml"]
    );
    assert!(ctx.finish().unwrap().archives.is_empty());

    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    assert_eq!(zip.len(), 2);
    let mut content = String::new();
    zip.by_name("configs/second.yaml")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "name: second\n");
}

#[tokio::test]
async fn test_input_document_is_merged() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$in: base.yaml\n$out: {{ values.out }}/merged.yaml\nservice:\n  port: {{ port }}\n$replace:\n  REGION: eu\n",
        Some("name: api\nport: 443\n"),
    );
    fs::write(
        unit_dir.join("base.yaml"),
        "service:\n  name: base\n  port: 80\nregion: REGION\n",
    )
    .unwrap();

    let (ctx, result) = run(RunOptions::new().relative(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    ctx.finish().unwrap();

    let merged: Value =
        serde_yaml::from_str(&fs::read_to_string(out.join("merged.yaml")).unwrap()).unwrap();
    assert_eq!(
        merged,
        json!({"service": {"name": "base", "port": 443}, "region": "eu"})
    );
}

#[tokio::test]
async fn test_xml_input_is_merged() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$in: pom.xml\n$out: {{ values.out }}/pom.xml\nproject:\n  version: 2\n",
        None,
    );
    fs::write(
        unit_dir.join("pom.xml"),
        "<project id=\"p\"><name>demo</name><version>1</version></project>",
    )
    .unwrap();

    let (ctx, result) = run(RunOptions::new().relative(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    ctx.finish().unwrap();

    assert_eq!(
        fs::read_to_string(out.join("pom.xml")).unwrap(),
        "<project id=\"p\">\n  <name>demo</name>\n  <version>2</version>\n</project>\n"
    );
}

#[tokio::test]
async fn test_copy_text_and_merge() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        concat!(
            "$copy: assets/*.txt\n$out: {{ values.out }}/assets\n---\n",
            "$text: \"hello {{ name }}\"\n$out: {{ values.out }}/greeting.txt\n---\n",
            "$merge:\n  files: sql/*.sql\n  separator: \";\"\n$out: {{ values.out }}/all.sql\n",
        ),
        None,
    );
    fs::create_dir_all(unit_dir.join("assets")).unwrap();
    fs::write(unit_dir.join("assets/a.txt"), "A").unwrap();
    fs::write(unit_dir.join("assets/b.txt"), "B").unwrap();
    fs::create_dir_all(unit_dir.join("sql")).unwrap();
    fs::write(unit_dir.join("sql/1.sql"), "select 1").unwrap();
    fs::write(unit_dir.join("sql/2.sql"), "select 2").unwrap();

    let ctx = Arc::new(RunContext::new(RunOptions::new().relative()));
    let engine = Engine::new(Arc::clone(&ctx));
    let expansion = engine
        .unit_expansion(&unit, &values_with_out(&out), true)
        .unwrap();
    engine.expand(expansion).await.unwrap();

    assert_eq!(fs::read_to_string(out.join("assets/b.txt")).unwrap(), "B");
    assert_eq!(fs::read_to_string(out.join("greeting.txt")).unwrap(), "hello Base");
    assert_eq!(
        fs::read_to_string(out.join("all.sql")).unwrap(),
        "select 1;select 2;"
    );
    assert_eq!(ctx.finish().unwrap().written, 4);
}

#[tokio::test]
async fn test_rm_is_idempotent() {
    let temp = tempdir().unwrap();
    let target = temp.path().join("stale");
    fs::create_dir_all(target.join("inner")).unwrap();
    let unit = write_unit(
        &temp.path().join("unit"),
        "$rm:\n  - {{ values.target }}\n  - {{ values.target }}/missing\n",
        None,
    );
    let values = ValuesContext::from_value(json!({ "target": target.to_string_lossy() }));

    let (_, result) = run(RunOptions::default(), &unit, &values).await;
    result.unwrap();
    assert!(!target.exists());
}

#[tokio::test]
async fn test_exec_requires_opt_in() {
    let temp = tempdir().unwrap();
    let unit = write_unit(&temp.path().join("unit"), "$exec: echo hi\n", None);

    let (_, result) = run(RunOptions::default(), &unit, &ValuesContext::default()).await;
    assert!(matches!(result, Err(EngineError::ExecDisabled(_))));
}

#[tokio::test]
async fn test_self_reference_is_too_deep() {
    let temp = tempdir().unwrap();
    let unit = write_unit(
        &temp.path().join("unit"),
        "$template: template.yaml\n$manifest:\n  - name: again\n",
        None,
    );

    let (ctx, result) = run(RunOptions::new().relative().with_max_depth(3), &unit, &ValuesContext::default()).await;
    match result {
        Err(EngineError::ExpansionTooDeep { depth, .. }) => assert_eq!(depth, 4),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(ctx.stats().processed(), 4);
}

#[tokio::test]
async fn test_missing_name_in_nested_manifest_is_fatal() {
    let temp = tempdir().unwrap();
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$template: nested.yaml\n$manifest:\n  - size: 1\n",
        None,
    );
    fs::write(unit_dir.join("nested.yaml"), "{}\n").unwrap();

    let (_, result) = run(RunOptions::new().relative(), &unit, &ValuesContext::default()).await;
    assert!(matches!(result, Err(EngineError::Template(_))));
}

#[tokio::test]
async fn test_schema_default_supplies_missing_name() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$out: {{ values.out }}/{{ name }}.yaml\nv: {{ v | default(value=1) }}\n",
        Some("name: a\n---\nv: 2\n"),
    );
    fs::write(
        unit_dir.join("schema.yaml"),
        "type: object\nproperties:\n  name: {type: string, default: fallback}\nrequired: [name]\n",
    )
    .unwrap();
    let unit = TemplateUnit {
        schema: Some(unit_dir.join("schema.yaml")),
        ..unit
    };

    let (ctx, result) = run(RunOptions::default(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(fs::read_to_string(out.join("a.yaml")).unwrap(), "v: 1\n");
    assert_eq!(fs::read_to_string(out.join("fallback.yaml")).unwrap(), "v: 2\n");
}

#[tokio::test]
async fn test_unnamed_item_fails_without_stopping_the_run() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$out: {{ values.out }}/{{ name }}.json\nname: {{ name }}\n",
        Some("- name: one\n- port: 2\n- name: three\n"),
    );

    let (ctx, result) = run(RunOptions::default(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 1);
    assert!(out.join("one.json").exists());
    assert!(out.join("three.json").exists());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 2);
}

#[tokio::test]
async fn test_repeated_zip_entry_keeps_last_write() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("b.zip");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$archive: {{ values.archive }}\n$out: README.yaml\nowner: {{ name }}\n",
        Some("name: first\n---\nname: second\n"),
    );
    let values = ValuesContext::from_value(json!({ "archive": archive.to_string_lossy() }));

    let (ctx, result) = run(RunOptions::default(), &unit, &values).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.written, 2);
    assert_eq!(summary.archives[0].entries, vec!["README.yaml"]);

    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
    assert_eq!(zip.len(), 1);
    let mut content = String::new();
    zip.by_name("README.yaml")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "owner: second\n");
}

#[tokio::test]
async fn test_tgz_archive_written_through_engine() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("dist/bundle.tgz");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$archive: {{ values.archive }}\n$out: ./conf/{{ name }}.json\nname: {{ name }}\n",
        Some("- name: api\n- name: web\n"),
    );
    let values = ValuesContext::from_value(json!({ "archive": archive.to_string_lossy() }));

    let (ctx, result) = run(RunOptions::default(), &unit, &values).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();
    assert_eq!(summary.archives.len(), 1);

    let decoder = flate2::read::GzDecoder::new(fs::File::open(&archive).unwrap());
    let mut tarball = tar::Archive::new(decoder);
    let mut contents = Vec::new();
    for entry in tarball.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        contents.push((name, content));
    }
    assert_eq!(
        contents,
        vec![
            ("conf/api.json".to_string(), r#"{"name":"api"}"#.to_string()),
            ("conf/web.json".to_string(), r#"{"name":"web"}"#.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_mkdir_creates_directories() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$mkdir:\n  - {{ values.out }}/a/b\n  - {{ values.out }}/c\n",
        None,
    );

    let (ctx, result) = run(RunOptions::default(), &unit, &values_with_out(&out)).await;
    result.unwrap();

    assert!(out.join("a/b").is_dir());
    assert!(out.join("c").is_dir());
    assert_eq!(ctx.finish().unwrap().written, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_runs_when_enabled() {
    let temp = tempdir().unwrap();
    let target = temp.path().join("touched");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$exec: touch {{ values.target }}\n",
        None,
    );
    let values = ValuesContext::from_value(json!({ "target": target.to_string_lossy() }));

    let (_, result) = run(RunOptions::new().enable_exec(), &unit, &values).await;
    result.unwrap();
    assert!(target.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_in_dry_run_is_not_run() {
    let temp = tempdir().unwrap();
    let target = temp.path().join("touched");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$exec: touch {{ values.target }}\n",
        None,
    );
    let values = ValuesContext::from_value(json!({ "target": target.to_string_lossy() }));

    let (_, result) = run(RunOptions::new().enable_exec().dry_run(), &unit, &values).await;
    result.unwrap();
    assert!(!target.exists());
}

#[tokio::test]
async fn test_nested_preparatory_steps_still_run() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit_dir = temp.path().join("unit");
    let unit = write_unit(
        &unit_dir,
        "$template: nested.yaml\n$manifest:\n  - name: child\n  - name: sibling\n",
        None,
    );
    fs::write(
        unit_dir.join("nested.yaml"),
        "$mkdir: {{ values.out }}/{{ name }}/logs\n---\n$text: \"{{ name }}\"\n$out: {{ values.out }}/{{ name }}/note.txt\n",
    )
    .unwrap();

    let (ctx, result) = run(RunOptions::new().relative(), &unit, &values_with_out(&out)).await;
    result.unwrap();
    let summary = ctx.finish().unwrap();

    assert_eq!(summary.processed, 3);
    assert!(out.join("child/logs").is_dir());
    assert!(out.join("sibling/logs").is_dir());
    assert_eq!(fs::read_to_string(out.join("sibling/note.txt")).unwrap(), "sibling");
}

#[tokio::test]
async fn test_shared_values_carry_imports_to_later_items() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$values:\n  - .: { {{ name }}: seen }\n$text: \"{{ values.first | default(value='none') }}\"\n$out: {{ values.out }}/{{ name }}.txt\n",
        Some("- name: first\n- name: second\n"),
    );

    let values = values_with_out(&out);
    let (ctx, result) = run(RunOptions::new().share_values(), &unit, &values).await;
    result.unwrap();
    ctx.finish().unwrap();

    assert_eq!(fs::read_to_string(out.join("first.txt")).unwrap(), "seen");
    assert_eq!(fs::read_to_string(out.join("second.txt")).unwrap(), "seen");
    assert_eq!(values.get("second"), Some(json!("seen")));
}

#[tokio::test]
async fn test_isolated_values_do_not_leak_between_items() {
    let temp = tempdir().unwrap();
    let out = temp.path().join("out");
    let unit = write_unit(
        &temp.path().join("unit"),
        "$values:\n  - .: { {{ name }}: seen }\n$text: \"{{ values.first | default(value='none') }}-{{ values.second | default(value='none') }}\"\n$out: {{ values.out }}/{{ name }}.txt\n",
        Some("- name: first\n- name: second\n"),
    );

    let values = values_with_out(&out);
    let (ctx, result) = run(RunOptions::default(), &unit, &values).await;
    result.unwrap();
    ctx.finish().unwrap();

    assert_eq!(fs::read_to_string(out.join("second.txt")).unwrap(), "none-seen");
    assert_eq!(values.get("first"), None);
}
