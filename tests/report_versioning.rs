
use serde_json::json;
use test_support::{
    add_parameter, approve_to_published, request_ok, seed_school, spawn_sidecar,
    submit_evaluation,
};

#[test]
fn recompiling_increments_the_version_and_keeps_history() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);
    let parameter_id = add_parameter(
        &mut stdin,
        &mut reader,
        "Communication",
        1.0,
        &[("teacher", 1.0)],
    );
    submit_evaluation(
        &mut stdin,
        &mut reader,
        &school.student_id,
        &parameter_id,
        &school.term_id,
        "teacher",
        &school.teacher_id,
        3.0,
    );

    let compile = |stdin: &mut _, reader: &mut _| {
        request_ok(
            stdin,
            reader,
            "reports.compile",
            json!({
                "studentId": school.student_id,
                "termId": school.term_id,
                "compiledBy": school.teacher_id
            }),
        )
    };

    let first = compile(&mut stdin, &mut reader);
    assert_eq!(first["version"], 1);

    // A later evaluation lands; the recompile supersedes, not overwrites.
    submit_evaluation(
        &mut stdin,
        &mut reader,
        &school.student_id,
        &parameter_id,
        &school.term_id,
        "teacher",
        &school.teacher_id,
        5.0,
    );
    let second = compile(&mut stdin, &mut reader);
    assert_eq!(second["version"], 2);
    assert!((second["overallScore"].as_f64().expect("score") - 4.0).abs() < 1e-9);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "reports.listByStudent",
        json!({ "studentId": school.student_id }),
    );
    let rows = listed["reports"].as_array().expect("report rows");
    assert_eq!(rows.len(), 2);

    // Publishing the latest version still allows a later recompile, which
    // starts the next version rather than touching the published one.
    let report_id = second["reportId"].as_str().expect("report id");
    let _ = approve_to_published(
        &mut stdin,
        &mut reader,
        report_id,
        &school.teacher_id,
        &school.admin_id,
    );
    let third = compile(&mut stdin, &mut reader);
    assert_eq!(third["version"], 3);

    let published = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": report_id }),
    );
    assert_eq!(published["status"], "published");
    assert_eq!(published["version"], 2);
}
