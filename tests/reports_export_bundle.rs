
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use test_support::{
    add_parameter, request_err, request_ok, seed_school, spawn_sidecar, submit_evaluation,
};
use zip::ZipArchive;

#[test]
fn export_writes_a_checksummed_bundle_without_touching_report_state() {
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
        4.0,
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
    let report_id = compiled["reportId"].as_str().expect("report id");

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "reports.export",
        json!({ "reportId": report_id }),
    );
    assert_eq!(exported["filename"], "HPC_ADM-001_Term_1_english.zip");
    assert_eq!(exported["bundleFormat"], "hpc-report-v1");
    assert_eq!(exported["entryCount"], 2);

    let bundle_path = exported["bundlePath"].as_str().expect("bundle path");
    let mut archive =
        ZipArchive::new(File::open(bundle_path).expect("open bundle")).expect("read zip");

    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["format"], "hpc-report-v1");
    assert_eq!(manifest["language"], "english");

    let mut document_bytes = Vec::new();
    archive
        .by_name("report.json")
        .expect("document entry")
        .read_to_end(&mut document_bytes)
        .expect("read document");
    let mut hasher = Sha256::new();
    hasher.update(&document_bytes);
    let digest = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>();
    assert_eq!(manifest["documentSha256"].as_str().expect("checksum"), digest);
    assert_eq!(exported["documentSha256"].as_str().expect("checksum"), digest);

    let document: serde_json::Value =
        serde_json::from_slice(&document_bytes).expect("document json");
    assert_eq!(document["overallGrade"], "A");

    // Export is read-only over the report.
    let report = request_ok(
        &mut stdin,
        &mut reader,
        "reports.get",
        json!({ "reportId": report_id }),
    );
    assert_eq!(report["status"], "draft");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "reports.export",
        json!({ "reportId": report_id, "language": "marathi" }),
    );
    assert_eq!(error["code"], "bad_params");

    let error = request_err(
        &mut stdin,
        &mut reader,
        "reports.export",
        json!({ "reportId": "no-such-report" }),
    );
    assert_eq!(error["code"], "not_found");
}
