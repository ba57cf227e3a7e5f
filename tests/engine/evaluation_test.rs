use approx::assert_abs_diff_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};

use det3d_uncertainty::data::input::GroundTruthAnnotation;
use det3d_uncertainty::data::output::FrameUncertainty;
use det3d_uncertainty::evaluation::{
    auroc_error_detection, brier_score, calibration_bins, class_calibration, expected_calibration_error,
    maximum_calibration_error, retention_curve, uncertainty_error_correlation, CalibrationEvaluator,
    PredictionOutcome, UncertaintySource,
};
use det3d_uncertainty::{Error, ObjectType};

use super::common::{car_label_line, record, CAR, PEDESTRIAN};

#[test]
fn ece_two_bin_example() {
    // each bin is off by 0.1: mean confidence 0.1 vs accuracy 0, 0.9 vs 1
    let confidences = [0.1, 0.1, 0.9, 0.9];
    let accuracies = [0.0, 0.0, 1.0, 1.0];
    assert_abs_diff_eq!(expected_calibration_error(&confidences, &accuracies, 2), 0.1, epsilon = 1e-12);
    assert_abs_diff_eq!(maximum_calibration_error(&confidences, &accuracies, 2), 0.1, epsilon = 1e-12);
}

#[test]
fn ece_is_zero_when_calibrated_per_bin() {
    assert_eq!(expected_calibration_error(&[0.5, 0.5], &[0.0, 1.0], 2), 0.0);
    assert_abs_diff_eq!(
        expected_calibration_error(&[0.25, 0.25, 0.25, 0.25, 1.0], &[1.0, 0.0, 0.0, 0.0, 1.0], 4),
        0.0,
        epsilon = 1e-12
    );
}

#[test]
fn bins_are_right_closed() {
    let bins = calibration_bins(&[0.0, 0.5, 0.50001, 1.0], &[1.0, 1.0, 0.0, 0.0], 2);
    assert_eq!(bins.len(), 2);
    assert_eq!(bins[0].count, 2);
    assert_eq!(bins[1].count, 2);
    assert_eq!((bins[0].lower, bins[0].upper), (0.0, 0.5));
    assert_eq!((bins[1].lower, bins[1].upper), (0.5, 1.0));
    assert_abs_diff_eq!(bins[0].mean_confidence, 0.25);
    assert_abs_diff_eq!(bins[0].mean_accuracy, 1.0);

    let sparse = calibration_bins(&[0.95], &[1.0], 10);
    assert_eq!(sparse.iter().filter(|b| b.count == 0).count(), 9);
    assert_eq!(sparse[9].count, 1);
}

#[test]
fn metric_bounds_on_random_inputs() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let n = rng.gen_range(1..60);
        let confidences: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..=1.0)).collect();
        let is_correct: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.6)).collect();
        let accuracies: Vec<f64> = is_correct.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect();
        let uncertainties: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..0.1)).collect();

        let ece = expected_calibration_error(&confidences, &accuracies, 10);
        let mce = maximum_calibration_error(&confidences, &accuracies, 10);
        assert!((0.0..=1.0).contains(&ece));
        assert!(ece <= mce + 1e-12);
        assert!((0.0..=1.0).contains(&auroc_error_detection(&uncertainties, &is_correct)));
        let (rho, r) = uncertainty_error_correlation(&uncertainties, &confidences);
        assert!((-1.0..=1.0).contains(&rho) && (-1.0..=1.0).contains(&r));
    }
}

#[test]
fn auroc_is_neutral_with_one_class() {
    assert_eq!(auroc_error_detection(&[0.1, 0.4, 0.2], &[true, true, true]), 0.5);
    assert_eq!(auroc_error_detection(&[0.1, 0.4, 0.2], &[false, false, false]), 0.5);
    assert_eq!(auroc_error_detection(&[0.1, 0.4], &[true, false]), 1.0);
}

#[test]
fn brier_of_confident_predictions() {
    assert_abs_diff_eq!(brier_score(&[1.0, 0.0], &[1.0, 0.0]), 0.0);
    assert_abs_diff_eq!(brier_score(&[0.8, 0.4], &[1.0, 0.0]), (0.04 + 0.16) / 2.0, epsilon = 1e-12);
    assert_eq!(brier_score(&[], &[]), 0.0);
}

#[test]
fn retention_curve_points() {
    let n = 40;
    let confidences: Vec<f64> = (0..n).map(|i| 1.0 - i as f64 / n as f64).collect();
    let uncertainties: Vec<f64> = (0..n).map(|i| i as f64).collect();
    // the least uncertain half is correct
    let is_correct: Vec<bool> = (0..n).map(|i| i < n / 2).collect();

    let curve = retention_curve(&confidences, &uncertainties, &is_correct, 20, 0.1);
    assert_eq!(curve.len(), 20);
    assert_abs_diff_eq!(curve.fractions[0], 0.1);
    assert_eq!(curve.fractions[19], 1.0);
    assert_eq!(curve.precisions[0], 1.0);
    assert_abs_diff_eq!(curve.precisions[19], 0.5);
    assert!(curve.precisions.windows(2).all(|w| w[0] >= w[1]));
    assert!(curve.mean_confidences[0] > curve.mean_confidences[19]);
}

#[test]
fn retention_drops_empty_points() {
    // 5 predictions: fractions below 0.2 keep nothing
    let curve = retention_curve(&[0.9; 5], &[0.1, 0.2, 0.3, 0.4, 0.5], &[true, false, true, false, true], 20, 0.1);
    assert!(curve.len() < 20);
    assert!(curve.fractions.iter().all(|&f| f >= 0.2));
    assert_abs_diff_eq!(*curve.precisions.last().unwrap(), 0.6);
    assert!(retention_curve(&[], &[], &[], 20, 0.1).is_empty());
}

fn scene() -> (Vec<FrameUncertainty>, Vec<GroundTruthAnnotation>) {
    let frames = vec![
        FrameUncertainty {
            frame_id: "000000".to_string(),
            num_sample_sets: 5,
            records: vec![
                record(10.0, 2.0, 0.9, CAR, 0.001),
                record(30.0, 0.0, 0.6, CAR, 0.02),
                // right place, wrong class
                record(10.0, 2.0, 0.4, PEDESTRIAN, 0.05),
            ],
        },
        FrameUncertainty::empty("000001"),
    ];
    let gts = vec![
        GroundTruthAnnotation::parse(&car_label_line(10.0, 2.0)).unwrap(),
        GroundTruthAnnotation::parse(&car_label_line(50.0, 0.0)).unwrap(),
    ];
    (frames, gts)
}

#[test]
fn evaluate_matches_ground_truth_per_class() {
    let (frames, gts) = scene();
    let evaluator = CalibrationEvaluator::new(0.7, 10).unwrap();

    let outcomes = evaluator.match_frame(&frames[0], &gts[0]);
    assert!(outcomes[0].is_correct);
    assert_abs_diff_eq!(outcomes[0].best_overlap, 1.0, epsilon = 1e-4);
    assert!(!outcomes[1].is_correct);
    assert_eq!(outcomes[1].error, 1.0);
    assert!(!outcomes[2].is_correct);
    assert_eq!(outcomes[2].best_overlap, 0.0);

    let report = evaluator.evaluate(&frames, &gts).unwrap();
    assert_eq!(report.total_predictions, 3);
    assert_eq!((report.true_positives, report.false_positives), (1, 2));
    assert_abs_diff_eq!(report.precision, 1.0 / 3.0, epsilon = 1e-12);
    assert_eq!(report.auroc, 1.0);
    assert!(report.spearman_correlation > 0.0);
    assert!(report.pearson_correlation > 0.0);
    assert_eq!(report.bins.len(), 10);
    assert_abs_diff_eq!(report.avg_confidence, (0.9 + 0.6 + 0.4) / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(*report.retention.precisions.last().unwrap(), report.precision, epsilon = 1e-12);
}

#[test]
fn ece_per_class() {
    let (frames, gts) = scene();
    let report = CalibrationEvaluator::new(0.7, 10).unwrap().evaluate(&frames, &gts).unwrap();

    assert_eq!(report.class_calibration.len(), 2);
    let car = &report.class_calibration[0];
    assert_eq!((car.label, car.object_type, car.count), (CAR, Some(ObjectType::Car), 2));
    assert_abs_diff_eq!(car.precision, 0.5);
    // one prediction per bin: (0.1 + 0.6) / 2
    assert_abs_diff_eq!(car.ece, 0.35, epsilon = 1e-12);
    let pedestrian = &report.class_calibration[1];
    assert_eq!(pedestrian.object_type, Some(ObjectType::Pedestrian));
    assert_abs_diff_eq!(pedestrian.ece, 0.4, epsilon = 1e-12);
    assert_abs_diff_eq!(report.classwise_ece, 0.375, epsilon = 1e-12);

    let unknown = class_calibration(
        &[PredictionOutcome {
            label: 9,
            confidence: 1.0,
            uncertainty: 0.0,
            best_overlap: 0.0,
            is_correct: false,
            error: 1.0,
        }],
        10,
    );
    assert_eq!(unknown[0].object_type, None);
    assert_abs_diff_eq!(unknown[0].ece, 1.0);
}

#[test]
fn zero_confidence_counts_in_first_bin() {
    let bins = calibration_bins(&[0.0, 0.0, 0.75], &[0.0, 1.0, 1.0], 4);
    assert_eq!(bins[0].count, 2);
    assert_abs_diff_eq!(bins[0].mean_accuracy, 0.5);
    assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 3);
    // (2 * 0.5 + 1 * 0.25) / 3
    assert_abs_diff_eq!(
        expected_calibration_error(&[0.0, 0.0, 0.75], &[0.0, 1.0, 1.0], 4),
        1.25 / 3.0,
        epsilon = 1e-12
    );
}

#[test]
fn uncertainty_source_selection() {
    let (frames, gts) = scene();
    let evaluator = CalibrationEvaluator::new(0.7, 10)
        .unwrap()
        .uncertainty_source(UncertaintySource::InverseConfidence);
    let outcomes = evaluator.match_frame(&frames[0], &gts[0]);
    assert_abs_diff_eq!(outcomes[1].uncertainty, 0.4, epsilon = 1e-12);
    assert_eq!(UncertaintySource::ScoreStd.of(&frames[0].records[0]), 0.001f64.sqrt());
}

#[test]
fn empty_evaluation_is_neutral() {
    let evaluator = CalibrationEvaluator::new(0.7, 10).unwrap();
    let report = evaluator.evaluate(&[], &[]).unwrap();
    assert_eq!(report.total_predictions, 0);
    assert_eq!((report.ece, report.mce), (0.0, 0.0));
    assert_eq!(report.auroc, 0.5);
    assert_eq!((report.spearman_correlation, report.pearson_correlation), (0.0, 0.0));
    assert_eq!(report.precision, 0.0);
    assert!(report.retention.is_empty());
    assert!(report.class_calibration.is_empty());
    assert_eq!(report.classwise_ece, 0.0);
}

#[test]
fn frame_and_annotation_counts_must_agree() {
    let (frames, gts) = scene();
    let evaluator = CalibrationEvaluator::new(0.7, 10).unwrap();
    assert!(matches!(evaluator.evaluate(&frames, &gts[..1]), Err(Error::ShapeMismatch(_))));
    assert!(CalibrationEvaluator::new(0.7, 0).is_err());
    assert!(CalibrationEvaluator::new(0.7, 10).unwrap().retention(20, 0.0).is_err());
}
