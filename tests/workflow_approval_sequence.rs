
use serde_json::json;
use test_support::{
    add_parameter, request_err, request_ok, seed_school, spawn_sidecar, submit_evaluation,
};

fn compile_draft(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    school: &test_support::School,
) -> String {
    let parameter_id = add_parameter(stdin, reader, "Communication", 1.0, &[("teacher", 1.0)]);
    submit_evaluation(
        stdin,
        reader,
        &school.student_id,
        &parameter_id,
        &school.term_id,
        "teacher",
        &school.teacher_id,
        4.0,
    );
    let compiled = request_ok(
        stdin,
        reader,
        "reports.compile",
        json!({
            "studentId": school.student_id,
            "termId": school.term_id,
            "compiledBy": school.teacher_id
        }),
    );
    compiled["reportId"].as_str().expect("report id").to_string()
}

#[test]
fn initiate_activates_exactly_one_step_and_moves_report_under_review() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);
    let report_id = compile_draft(&mut stdin, &mut reader, &school);

    let initiated = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.initiate",
        json!({ "reportId": report_id }),
    );
    let steps = initiated["steps"].as_array().expect("steps");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0]["status"], "pending");
    assert_eq!(steps[0]["approverRole"], "class_teacher");
    assert_eq!(steps[1]["status"], "waiting");
    assert_eq!(steps[1]["approverRole"], "principal");
    // Class teacher is mapped for 5-A, so no fallback fired.
    assert_eq!(initiated["fallbacks"]["classTeacher"], false);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": report_id }),
    );
    assert_eq!(report["status"], "under_review");

    // A second initiate on the same report is refused: it is no longer draft.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "workflow.initiate",
        json!({ "reportId": report_id }),
    );
    assert_eq!(error["code"], "bad_state");
}

#[test]
fn approving_non_final_step_promotes_the_next_one() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);
    let report_id = compile_draft(&mut stdin, &mut reader, &school);

    let initiated = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.initiate",
        json!({ "reportId": report_id }),
    );
    let step1 = initiated["steps"][0]["stepId"].as_str().expect("step 1");
    let step2 = initiated["steps"][1]["stepId"].as_str().expect("step 2");

    // The waiting step cannot be resolved before it is promoted.
    let early = request_err(
        &mut stdin,
        &mut reader,
        "workflow.process",
        json!({ "stepId": step2, "approverId": school.admin_id, "decision": "approved" }),
    );
    assert_eq!(early["code"], "step_not_pending");

    let processed = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.process",
        json!({ "stepId": step1, "approverId": school.teacher_id, "decision": "approved" }),
    );
    assert_eq!(processed["workflowComplete"], false);
    assert_eq!(processed["published"], false);
    assert_eq!(processed["nextStepNumber"], 2);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": report_id }),
    );
    assert_eq!(report["status"], "under_review");
    assert_eq!(report["workflow"][0]["status"], "approved");
    assert_eq!(report["workflow"][1]["status"], "pending");
}

#[test]
fn final_approval_publishes_once_and_writes_one_analytics_record() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);
    let report_id = compile_draft(&mut stdin, &mut reader, &school);

    let initiated = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.initiate",
        json!({ "reportId": report_id }),
    );
    let step1 = initiated["steps"][0]["stepId"].as_str().expect("step 1");
    let step2 = initiated["steps"][1]["stepId"].as_str().expect("step 2");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.process",
        json!({ "stepId": step1, "approverId": school.teacher_id, "decision": "approved" }),
    );
    let finished = request_ok(
        &mut stdin,
        &mut reader,
        "workflow.process",
        json!({ "stepId": step2, "approverId": school.admin_id, "decision": "approved" }),
    );
    assert_eq!(finished["workflowComplete"], true);
    assert_eq!(finished["published"], true);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": report_id }),
    );
    assert_eq!(report["status"], "published");
    assert!(report["publishedAt"].is_string());
    assert_eq!(report["approvedBy"], json!(school.admin_id));

    let analytics = request_ok(
        &mut stdin,
        &mut reader,
        "analytics.student",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(analytics["analytics"].as_array().expect("records").len(), 1);

    // A duplicate resolution of either step is a clean conflict, and the
    // analytics record is not duplicated.
    for step in [step1, step2] {
        let error = request_err(
            &mut stdin,
            &mut reader,
            "workflow.process",
            json!({ "stepId": step, "approverId": school.admin_id, "decision": "approved" }),
        );
        assert_eq!(error["code"], "step_not_pending");
    }
    let analytics = request_ok(
        &mut stdin,
        &mut reader,
        "analytics.student",
        json!({ "studentId": school.student_id }),
    );
    assert_eq!(analytics["analytics"].as_array().expect("records").len(), 1);
}
