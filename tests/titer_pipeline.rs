//! Integration tests for the titer estimation pipeline.

use approx::assert_relative_eq;
use std::io::Write;
use std::path::PathBuf;
use tcid50::endpoint::{MSG_ALL_NEGATIVE, MSG_ALL_POSITIVE};
use tcid50::prelude::*;
use tempfile::{Builder, NamedTempFile};

/// Rows sampled from a known logistic curve.
///
/// Doses are log10 per mL at 10 µL per well, so dilution = 10^(x - 2).
fn logistic_rows(id: &str, log10_endpoint: f64, slope: f64, replicates: u32) -> Vec<String> {
    (0..9)
        .map(|i| {
            let x = log10_endpoint - 2.0 + 0.5 * i as f64;
            let p = 1.0 / (1.0 + (-(slope * (x - log10_endpoint))).exp());
            let cpe = (replicates as f64 * p).round() as u32;
            format!("{}\t{}\t{}\t{}", id, 10f64.powf(x - 2.0), cpe, replicates)
        })
        .collect()
}

fn assay_text() -> String {
    let mut lines = vec!["ID\tDilution\tCPE\tReplicates".to_string()];
    lines.extend(logistic_rows("virus_a", 5.0, -1.5, 1000));
    lines.extend(logistic_rows("virus_b", 6.5, -2.0, 1000));
    for d in [10, 100, 1000, 10000] {
        lines.push(format!("mock\t{}\t0\t8", d));
    }
    for d in [10, 100, 1000, 10000] {
        lines.push(format!("saturated\t{}\t8\t8", d));
    }
    lines.join("\n")
}

fn run(method: FitMethod) -> AnalysisOutput {
    let source = InputSource::resolve(Some(assay_text()), None).unwrap();
    Analysis::new()
        .method(method)
        .run_source(&source, None)
        .unwrap()
}

#[test]
fn test_known_curve_recovered_by_both_methods() {
    for method in [FitMethod::Logit, FitMethod::BinomialGlm] {
        let out = run(method);

        let a = out.results.get("virus_a").unwrap();
        assert_eq!(a.status, DetectionStatus::WithinRange, "{}", method);
        assert_relative_eq!(a.log10_tcid50.unwrap(), 5.0, epsilon = 0.05);
        assert!(a.ci_low.unwrap() <= 5.0 + 0.05 && a.ci_high.unwrap() >= 5.0 - 0.05);

        let b = out.results.get("virus_b").unwrap();
        assert_relative_eq!(b.log10_tcid50.unwrap(), 6.5, epsilon = 0.05);
        assert_relative_eq!(
            b.tcid50_per_ml.unwrap(),
            10f64.powf(b.log10_tcid50.unwrap()),
            max_relative = 1e-12
        );
        assert!(b.converged);
    }
}

#[test]
fn test_glm_recovers_slope() {
    let out = run(FitMethod::BinomialGlm);
    let a = out.results.get("virus_a").unwrap();
    assert_relative_eq!(a.slope.unwrap(), -1.5, epsilon = 0.05);
    assert!(a.deviance.is_some());
    assert!(a.r_squared.is_none());
}

#[test]
fn test_no_cpe_is_below_detection_limit() {
    let out = run(FitMethod::Logit);
    let mock = out.results.get("mock").unwrap();

    assert_eq!(mock.status, DetectionStatus::BelowDetectionLimit);
    assert_eq!(mock.status.to_string(), "below detection limit");
    assert!(mock.tcid50_per_ml.is_none());
    assert!(mock.log10_tcid50.is_none());
    assert!(mock.outside_detection);
    assert_eq!(mock.message.as_deref(), Some(MSG_ALL_NEGATIVE));
    assert_relative_eq!(
        mock.plot_titer_per_ml.unwrap(),
        0.8 * mock.lower_limit,
        max_relative = 1e-12
    );
}

#[test]
fn test_full_cpe_is_above_detection_limit() {
    let out = run(FitMethod::BinomialGlm);
    let sat = out.results.get("saturated").unwrap();

    assert_eq!(sat.status, DetectionStatus::AboveDetectionLimit);
    assert_eq!(sat.status.to_string(), "above detection limit");
    assert!(sat.tcid50_per_ml.is_none());
    assert_eq!(sat.message.as_deref(), Some(MSG_ALL_POSITIVE));
    assert_relative_eq!(sat.upper_limit, 1e6, max_relative = 1e-12);
    assert_relative_eq!(sat.plot_titer_per_ml.unwrap(), 1.2e6, max_relative = 1e-12);
}

#[test]
fn test_endpoint_consistent_with_slope_sign() {
    for method in [FitMethod::Logit, FitMethod::BinomialGlm] {
        let out = run(method);
        for (result, outcome) in out.results.iter().zip(&out.outcomes) {
            let (fit, x50) = match (outcome.fit(), result.log10_tcid50) {
                (Some(f), Some(x)) => (f, x),
                _ => continue,
            };
            let below = fit.predict_response(x50 - 0.5);
            let above = fit.predict_response(x50 + 0.5);
            assert_relative_eq!(fit.predict_response(x50), 0.5, epsilon = 1e-9);
            if fit.slope < 0.0 {
                assert!(below > 0.5 && above < 0.5);
            } else {
                assert!(below < 0.5 && above > 0.5);
            }
        }
    }
}

#[test]
fn test_csv_export_reload() {
    let out = run(FitMethod::Logit);
    let file = NamedTempFile::new().unwrap();
    out.results.to_csv(file.path()).unwrap();

    let reloaded = TiterResultSet::from_csv(file.path()).unwrap();
    assert_eq!(reloaded.len(), out.results.len());
    assert_eq!(reloaded.method, FitMethod::Logit);
    for (orig, back) in out.results.iter().zip(reloaded.iter()) {
        assert_eq!(orig.sample_id, back.sample_id);
        assert_eq!(orig.status, back.status);
        match (orig.tcid50_per_ml, back.tcid50_per_ml) {
            (Some(x), Some(y)) => assert_relative_eq!(x, y, max_relative = 1e-12),
            (None, None) => {}
            other => panic!("titer mismatch: {:?}", other),
        }
    }
}

#[test]
fn test_input_source_errors() {
    let both = InputSource::resolve(Some(assay_text()), Some(PathBuf::from("plate.csv")));
    assert_eq!(
        both.unwrap_err().to_string(),
        "Both input file and tab separated text provided."
    );

    let neither = InputSource::resolve(None, None);
    assert_eq!(
        neither.unwrap_err().to_string(),
        "Neither input file nor tab separated text provided."
    );

    let bad = InputSource::resolve(None, Some(PathBuf::from("plate.json")));
    assert_eq!(
        bad.unwrap_err().to_string(),
        "File does not have a supported file extension (.csv, .tsv, .xlsx)"
    );
}

#[test]
fn test_comma_decimal_csv_file() {
    let mut file = Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "ID;Dilution;CPE;Replicates").unwrap();
    writeln!(file, "S1;10;4;4").unwrap();
    writeln!(file, "S1;100;3;4").unwrap();
    writeln!(file, "S1;1000;1;4").unwrap();
    writeln!(file, "S1;10000;0;4").unwrap();
    file.flush().unwrap();

    let source = InputSource::resolve(None, Some(file.path().to_path_buf())).unwrap();
    let out = Analysis::new()
        .decimal(DecimalSeparator::Comma)
        .volume_ul(12.5)
        .run_source(&source, None)
        .unwrap();

    let s1 = out.results.get("S1").unwrap();
    // 10 / 0.0125 mL
    assert_relative_eq!(s1.lower_limit, 800.0, epsilon = 1e-9);
    assert!(s1.tcid50_per_ml.is_some());

    let expected = file.path().with_file_name(format!(
        "{}_out.csv",
        file.path().file_stem().unwrap().to_str().unwrap()
    ));
    assert_eq!(source.default_output(), expected);
}

#[test]
fn test_sample_sheet_groups_and_charts() {
    let mut sheet_file = Builder::new().suffix(".tsv").tempfile().unwrap();
    writeln!(sheet_file, "ID\tvirus\tpassage").unwrap();
    writeln!(sheet_file, "virus_a\tHSV-1\t3").unwrap();
    writeln!(sheet_file, "virus_b\tHSV-2\t5").unwrap();
    writeln!(sheet_file, "mock\tnone\tNA").unwrap();
    sheet_file.flush().unwrap();
    let sheet = SampleSheet::from_path(sheet_file.path()).unwrap();

    let table = AssayTable::from_tsv_str(&assay_text(), DecimalSeparator::Dot).unwrap();
    let out = Analysis::new()
        .group_column("virus")
        .run(&table, Some(&sheet))
        .unwrap();

    assert_eq!(out.results.get("virus_b").unwrap().group.as_deref(), Some("HSV-2"));
    assert!(out.results.get("saturated").unwrap().group.is_none());

    let dose = dose_response_chart(&out.results, &out.curves);
    assert_eq!(dose.panels.len(), 4);
    assert!(dose.panels[0].title.contains("HSV-1"));

    let dir = tempfile::tempdir().unwrap();
    let svg = dir.path().join("pasted_dose_response.svg");
    dose.render_svg(&svg).unwrap();
    titer_chart(&out.results)
        .render_svg(dir.path().join("pasted_titer.svg"))
        .unwrap();
    assert!(std::fs::metadata(&svg).unwrap().len() > 0);
}

#[test]
fn test_invalid_record_names_row() {
    let text = "ID\tDilution\tCPE\tReplicates\nS1\t10\t5\t4\n";
    let err = AssayTable::from_tsv_str(text, DecimalSeparator::Dot).unwrap_err();
    assert!(matches!(err, TiterError::InvalidValue { row: 1, .. }));
    assert!(err.to_string().contains("row 1"));
}

#[test]
fn test_xlsx_input_classified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.xlsx");

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in ["ID", "Dilution", "CPE", "Replicates"].iter().enumerate() {
        sheet.write_string(0, col as u16, *name).unwrap();
    }
    let rows = [
        (1.0, 10.0, 8.0),
        (1.0, 100.0, 6.0),
        (1.0, 1000.0, 1.0),
        (2.0, 10.0, 0.0),
        (2.0, 100.0, 0.0),
        (2.0, 1000.0, 0.0),
    ];
    for (i, &(id, dilution, cpe)) in rows.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write_number(r, 0, id).unwrap();
        sheet.write_number(r, 1, dilution).unwrap();
        sheet.write_number(r, 2, cpe).unwrap();
        sheet.write_number(r, 3, 8.0).unwrap();
    }
    workbook.save(&path).unwrap();

    let source = InputSource::resolve(None, Some(path.clone())).unwrap();
    let out = Analysis::new().run_source(&source, None).unwrap();

    let statuses: Vec<(&str, DetectionStatus)> = out
        .results
        .iter()
        .map(|r| (r.sample_id.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("1", DetectionStatus::WithinRange),
            ("2", DetectionStatus::BelowDetectionLimit),
        ]
    );
    assert_eq!(source.default_output(), dir.path().join("plate_out.csv"));
}

#[test]
fn test_separated_glm_fit_flagged_not_converged() {
    let mut lines = vec!["ID\tDilution\tCPE\tReplicates".to_string()];
    for (d, cpe) in [(10, 8), (100, 8), (1000, 0), (10000, 0)] {
        lines.push(format!("S\t{}\t{}\t8", d, cpe));
    }
    let source = InputSource::resolve(Some(lines.join("\n")), None).unwrap();
    let out = Analysis::new()
        .method(FitMethod::BinomialGlm)
        .run_source(&source, None)
        .unwrap();

    let s = out.results.get("S").unwrap();
    assert!(!s.converged);
    assert_eq!(out.results.summary().not_converged, 1);
    let x50 = s.log10_tcid50.unwrap();
    // Between the last all-positive and first all-negative dose
    assert!(x50 > 4.0 && x50 < 5.0, "endpoint {}", x50);

    let file = NamedTempFile::new().unwrap();
    out.results.to_csv(file.path()).unwrap();
    let reloaded = TiterResultSet::from_csv(file.path()).unwrap();
    assert!(!reloaded.get("S").unwrap().converged);
}
