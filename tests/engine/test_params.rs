use chancery::core::entities::{Document, UnitMembership, UserProfile};
use chancery::core::rule_engine::context::EvalInputs;
use chancery::core::rule_engine::expression::ExpressionEngine;
use chancery::core::rule_engine::params::ParamsCalculator;
use chancery::core::rule_engine::schema::TaskTemplate;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::{Builder, NamedTempFile};

const YAML_TEMPLATE: &str = r#"
id: review-task
name: Document review
params:
  name:
    $expr: "|docs, user, units, events| docs[0].data.title + \" review\""
  label: Review
  meta:
    $expr: "|docs, user, units, events| #{ assignedBy: user.id }"
rules:
  - performerUnits: [4]
"#;

fn write_yaml(contents: &str) -> NamedTempFile {
    let file = Builder::new()
        .suffix(".yaml")
        .tempfile()
        .expect("temp file");
    fs::write(file.path(), contents).expect("write template");
    file
}

fn inputs(documents: &[Document]) -> EvalInputs {
    EvalInputs::prepare(
        documents,
        &[],
        &UserProfile::new("clerk-7"),
        &UnitMembership::default(),
    )
    .expect("inputs")
}

fn calculator() -> ParamsCalculator {
    ParamsCalculator::new(Arc::new(ExpressionEngine::default()))
}

#[test]
fn yaml_template_computes_params_from_documents() {
    let file = write_yaml(YAML_TEMPLATE);
    let template = TaskTemplate::load_from_file(file.path()).unwrap();

    let documents = vec![Document {
        id: "doc-1".to_string(),
        data: json!({"title": "Budget 2026"}),
    }];
    let params = calculator()
        .calculate(&template, &inputs(&documents))
        .unwrap();

    assert_eq!(params.name.as_deref(), Some("Budget 2026 review"));
    assert_eq!(params.label.as_deref(), Some("Review"));
    assert_eq!(params.meta, Some(json!({"assignedBy": "clerk-7"})));
}

#[test]
fn json_literals_pass_through_without_evaluation() {
    let file = NamedTempFile::new().expect("temp file");
    fs::write(
        file.path(),
        json!({
            "id": "static-task",
            "params": {
                "name": "Fixed name",
                "copyFromDocumentId": "doc-elsewhere"
            },
            "rules": []
        })
        .to_string(),
    )
    .expect("write template");
    let template = TaskTemplate::load_from_file(file.path()).unwrap();

    // No expression anywhere: literals are kept verbatim, including a
    // copy id that no visible document carries.
    let params = calculator().calculate(&template, &inputs(&[])).unwrap();
    assert_eq!(params.name.as_deref(), Some("Fixed name"));
    assert_eq!(params.copy_from_document_id.as_deref(), Some("doc-elsewhere"));
}

#[test]
fn bad_param_expression_fails_template_load() {
    let file = write_yaml(
        r#"
id: broken-task
params:
  name:
    $expr: "|docs, user| {"
"#,
    );

    let err = TaskTemplate::load_from_file(file.path()).unwrap_err();
    assert_eq!(err.code, "TPE-EXPR-001");
    assert_eq!(
        err.context.get("field").map(String::as_str),
        Some("params.name")
    );
    assert_eq!(
        err.context.get("template_id").map(String::as_str),
        Some("broken-task")
    );
}

#[test]
fn copy_source_must_match_a_visible_document() {
    let file = write_yaml(
        r#"
id: copy-task
params:
  label:
    $expr: "|docs, user, units, events| \"copy of \" + docs[0].id"
  copyFromDocumentId: doc-1
"#,
    );
    let template = TaskTemplate::load_from_file(file.path()).unwrap();
    let calculator = calculator();

    let foreign = vec![Document {
        id: "doc-other".to_string(),
        data: json!({}),
    }];
    let params = calculator.calculate(&template, &inputs(&foreign)).unwrap();
    assert_eq!(params.copy_from_document_id, None);

    let visible = vec![Document {
        id: "doc-1".to_string(),
        data: json!({}),
    }];
    let params = calculator.calculate(&template, &inputs(&visible)).unwrap();
    assert_eq!(params.copy_from_document_id.as_deref(), Some("doc-1"));
    assert_eq!(params.label.as_deref(), Some("copy of doc-1"));
}
