
use serde_json::json;
use test_support::{
    add_parameter, request_err, request_ok, seed_school, spawn_sidecar, submit_evaluation,
};

#[test]
fn role_weights_must_sum_to_one() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _school = seed_school(&mut stdin, &mut reader);

    let param = request_ok(
        &mut stdin,
        &mut reader,
        "parameters.upsert",
        json!({
            "name": "Communication",
            "category": "life_skills",
            "weightage": 1.0,
            "gradeApplicability": ["5"]
        }),
    );
    let parameter_id = param["parameterId"].as_str().expect("parameter id");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "parameters.assignWeights",
        json!({
            "parameterId": parameter_id,
            "weights": [
                { "role": "teacher", "weightage": 0.5 },
                { "role": "parent", "weightage": 0.3 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_weightage");
    assert!((error["details"]["sum"].as_f64().expect("sum") - 0.8).abs() < 1e-9);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "parameters.assignWeights",
        json!({
            "parameterId": parameter_id,
            "weights": [{ "role": "homeroom", "weightage": 1.0 }]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "parameters.assignWeights",
        json!({
            "parameterId": parameter_id,
            "weights": [
                { "role": "teacher", "weightage": 0.5 },
                { "role": "teacher", "weightage": 0.5 }
            ]
        }),
    );
    assert_eq!(error["code"], "bad_params");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "parameters.assignWeights",
        json!({
            "parameterId": parameter_id,
            "weights": [
                { "role": "teacher", "weightage": 0.5 },
                { "role": "parent", "weightage": 0.3 },
                { "role": "self", "weightage": 0.2 }
            ]
        }),
    );
    assert_eq!(result["assignedRoles"], 3);
}

#[test]
fn roles_without_an_assignment_are_excluded_from_the_aggregate() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let school = seed_school(&mut stdin, &mut reader);

    // Only the teacher carries weight; the peer evaluation must not count.
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
        4.0,
    );
    submit_evaluation(
        &mut stdin,
        &mut reader,
        &school.student_id,
        &parameter_id,
        &school.term_id,
        "peer",
        "peer-student-9",
        1.0,
    );

    let compiled = request_ok(
        &mut stdin,
        &mut reader,
        "reports.compile",
        json!({
            "studentId": school.student_id,
            "termId": school.term_id,
            "compiledBy": school.teacher_id
        }),
    );
    assert!((compiled["overallScore"].as_f64().expect("overall") - 4.0).abs() < 1e-9);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": compiled["reportId"] }),
    );
    let feedback = &report["summary"]["parameter_breakdown"][&parameter_id]["stakeholder_feedback"];
    assert!(feedback.get("teacher").is_some());
    assert!(feedback.get("peer").is_none());
}
