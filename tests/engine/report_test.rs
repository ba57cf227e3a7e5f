use approx::assert_abs_diff_eq;

use det3d_uncertainty::config::SamplingMode;
use det3d_uncertainty::data::output::FrameUncertainty;
use det3d_uncertainty::evaluation::{CalibrationEvaluator, EvaluationReport};
use det3d_uncertainty::report::{
    read_json, render_evaluation_summary, render_temperature_fit, write_json, write_text, UncertaintySummary,
    UNCERTAINTY_RESULTS_FILE,
};
use det3d_uncertainty::temperature::{TemperatureCalibrator, TemperatureFit};
use det3d_uncertainty::{EngineConfig, Error};

use super::common::{det, frame, record, sample_set, scratch_dir, three_pass_frame, CAR};

#[test]
fn results_round_trip_through_json() {
    let dir = scratch_dir("results_json");
    let engine = EngineConfig::default().engine().unwrap();
    let results = engine.process_frames(&[three_pass_frame("000000"), three_pass_frame("000001")]);

    let path = dir.join("nested").join(UNCERTAINTY_RESULTS_FILE);
    write_json(&path, &results).unwrap();
    let loaded: Vec<FrameUncertainty> = read_json(&path).unwrap();
    assert_eq!(loaded, results);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"box\""));
    assert!(text.contains("\"detection_frequency\""));
}

#[test]
fn reading_a_missing_file_fails() {
    let dir = scratch_dir("missing_json");
    let result: Result<Vec<FrameUncertainty>, Error> = read_json(&dir.join("absent.json"));
    assert!(matches!(result, Err(Error::MissingInput(_))));
}

#[test]
fn uncertainty_summary_statistics() {
    let frames = vec![
        FrameUncertainty {
            frame_id: "000000".to_string(),
            num_sample_sets: 30,
            records: vec![record(0.0, 0.0, 0.9, CAR, 0.01), record(9.0, 0.0, 0.5, CAR, 0.03)],
        },
        FrameUncertainty::empty("000001"),
    ];
    let summary = UncertaintySummary::from_frames(&frames, SamplingMode::McDropout);
    assert_eq!(summary.samples_per_frame, Some((30, 30)));
    assert_eq!(summary.num_frames, 2);
    assert_eq!(summary.total_detections, 2);
    assert_eq!(summary.score_variance.count, 2);
    assert_abs_diff_eq!(summary.score_variance.mean, 0.02, epsilon = 1e-12);
    assert_abs_diff_eq!(summary.score_variance.std, 0.01, epsilon = 1e-12);
    assert_eq!((summary.score_variance.min, summary.score_variance.max), (0.01, 0.03));
    assert_eq!(summary.detection_frequency.mean, 1.0);

    let text = summary.to_string();
    assert!(text.contains("Mode: MC Dropout"));
    assert!(text.contains("Samples per frame: 30"));
    assert!(text.contains("Total detections: 2"));
    assert!(text.contains("Detection frequency:"));

    let dir = scratch_dir("summary_txt");
    write_text(&dir.join("uncertainty_summary.txt"), &text).unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("uncertainty_summary.txt")).unwrap(), text);
}

#[test]
fn summary_reports_sample_sets_seen() {
    let engine = EngineConfig::default().engine().unwrap();
    let two_passes = frame(
        "000000",
        vec![sample_set(vec![det(0.0, 0.0, 0.9, CAR)]), sample_set(vec![det(0.1, 0.0, 0.8, CAR)])],
    );
    let results = engine.process_frames(&[two_passes, three_pass_frame("000001")]);
    assert_eq!(results[0].num_sample_sets, 2);

    let summary = UncertaintySummary::from_frames(&results, SamplingMode::McDropout);
    assert_eq!(summary.samples_per_frame, Some((2, 3)));
    assert!(summary.to_string().contains("Samples per frame: 2 to 3"));

    let summary = UncertaintySummary::from_frames(&results[..1], SamplingMode::Ensemble);
    assert!(summary.to_string().contains("Samples per frame: 2\n"));
    assert!(summary.to_string().contains("Mode: Ensemble"));
    assert_eq!(UncertaintySummary::from_frames(&[], SamplingMode::Ensemble).samples_per_frame, None);
}

#[test]
fn older_results_without_sample_counts_still_load() {
    let json = r#"[{"frame_id": "000000", "records": []}]"#;
    let frames: Vec<FrameUncertainty> = serde_json::from_str(json).unwrap();
    assert_eq!(frames[0].num_sample_sets, 0);
}

#[test]
fn evaluation_report_round_trip_and_summary() {
    let evaluator = CalibrationEvaluator::new(0.7, 10).unwrap();
    let report = evaluator.evaluate(&[], &[]).unwrap();

    let dir = scratch_dir("metrics_json");
    write_json(&dir.join("uncertainty_metrics.json"), &report).unwrap();
    let loaded: EvaluationReport = read_json(&dir.join("uncertainty_metrics.json")).unwrap();
    assert_eq!(loaded, report);

    let text = render_evaluation_summary(&report);
    assert!(text.contains("ECE:   0.0000"));
    assert!(text.contains("AUROC:    0.5000"));
    assert!(text.contains("Uncertainty source: ScoreVariance"));
}

#[test]
fn temperature_fit_rendering() {
    let fit = TemperatureCalibrator::new(0.5, 2.0, 3)
        .unwrap()
        .fit(&[vec![1.0], vec![-1.0]], &[true, false])
        .unwrap();
    let text = render_temperature_fit(&fit);
    assert_eq!(text.lines().count(), 4);
    assert!(text.lines().last().unwrap().starts_with("best: T"));

    let dir = scratch_dir("fit_json");
    write_json(&dir.join("fit.json"), &fit).unwrap();
    let loaded: TemperatureFit = read_json(&dir.join("fit.json")).unwrap();
    assert_eq!(loaded, fit);
}
