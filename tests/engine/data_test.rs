use std::path::Path;
use std::str::FromStr;

use approx::assert_abs_diff_eq;

use det3d_uncertainty::data::input::{
    label_path, load_ground_truth, FrameSamples, GroundTruthAnnotation, RawFramePredictions, SampleSet,
};
use det3d_uncertainty::report::read_json;
use det3d_uncertainty::{Box3D, Error, ObjectType};

use super::common::{car_box, car_label_line, scratch_dir, CAR};

#[test]
fn parse_kitti_label() {
    let content = format!(
        "{}\nPedestrian 0.00 1 0.20 300.0 140.0 330.0 220.0 1.7 0.6 0.8 -3.0 1.0 12.0 1.2\n\nDontCare -1 -1 -10 0 0 0 0 -1 -1 -1 -1000 -1000 -1000 -10\n",
        car_label_line(5.0, -2.0)
    );
    let gt = GroundTruthAnnotation::parse(&content).unwrap();
    assert_eq!(gt.len(), 3);

    let car = &gt.objects[0];
    assert_eq!(car.object_type(), Some(ObjectType::Car));
    assert_eq!(car.dimensions, [1.5, 1.8, 4.0]);
    assert_eq!(car.to_box(), car_box(5.0, -2.0));

    let ped = &gt.objects[1];
    assert_eq!(ped.occluded, 1);
    assert_abs_diff_eq!(ped.rotation_y, 1.2);
    assert_eq!(ped.to_box(), Box3D::new(-3.0, 1.0, 12.0, 0.8, 0.6, 1.7, 1.2));

    assert_eq!(gt.objects[2].object_type(), None);
    assert_eq!(gt.boxes_of(ObjectType::Car).len(), 1);
    assert!(gt.boxes_of(ObjectType::Cyclist).is_empty());
}

#[test]
fn trailing_score_column_is_ignored() {
    let line = format!("{} 0.93", car_label_line(1.0, 1.0));
    let gt = GroundTruthAnnotation::parse(&line).unwrap();
    assert_eq!(gt.objects[0].to_box(), car_box(1.0, 1.0));
}

#[test]
fn malformed_line_reports_its_number() {
    let content = format!("{}\nCar 0.0 0 short line", car_label_line(0.0, 0.0));
    match GroundTruthAnnotation::parse(&content) {
        Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected a parse error, got {:?}", other),
    }
}

#[test]
fn label_file_names() {
    let dir = Path::new("/data/label_2");
    assert_eq!(label_path(dir, "000042"), dir.join("000042.txt"));
    assert_eq!(label_path(dir, "42"), dir.join("000042.txt"));
    assert_eq!(label_path(dir, "000042.bin"), dir.join("000042.txt"));
    assert_eq!(label_path(dir, "scene_a"), dir.join("scene_a.txt"));
}

#[test]
fn missing_label_file_is_empty_annotation() {
    let dir = scratch_dir("gt_missing");
    std::fs::write(dir.join("000001.txt"), car_label_line(3.0, 0.0)).unwrap();

    let gts = load_ground_truth(&dir, &["000001".to_string(), "000002".to_string()]).unwrap();
    assert_eq!(gts.len(), 2);
    assert_eq!(gts[0].len(), 1);
    assert!(gts[1].is_empty());

    assert!(matches!(
        load_ground_truth(&dir.join("nope"), &[]),
        Err(Error::MissingGroundTruth(_))
    ));
}

#[test]
fn sample_set_validation() {
    let boxes = [car_box(0.0, 0.0).0, car_box(5.0, 0.0).0];
    let set = SampleSet::from_arrays(&boxes, &[0.7, 0.4], &[CAR, CAR]).unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.boxes()[1], car_box(5.0, 0.0));

    assert!(matches!(
        SampleSet::from_arrays(&boxes, &[0.7], &[CAR, CAR]),
        Err(Error::ShapeMismatch(_))
    ));
    assert!(matches!(
        SampleSet::from_arrays(&boxes, &[0.7, 1.2], &[CAR, CAR]),
        Err(Error::ScoreOutOfRange(_))
    ));
}

#[test]
fn sample_sets_from_json_check_scores() {
    let frame_json = |score: f64| {
        format!(
            r#"{{"frame_id": "000003", "sample_sets": [[{{"box": [0, 0, 0, 4, 1.8, 1.5, 0], "score": {}, "label": 1}}], []]}}"#,
            score
        )
    };
    let frame: FrameSamples = serde_json::from_str(&frame_json(0.75)).unwrap();
    assert_eq!(frame.num_sample_sets(), 2);
    assert_eq!(frame.sample_sets[0].detections[0].score, 0.75);
    assert!(frame.sample_sets[1].is_empty());

    assert!(serde_json::from_str::<FrameSamples>(&frame_json(1.5)).is_err());
    assert!(serde_json::from_str::<FrameSamples>(&frame_json(-0.5)).is_err());

    let dir = scratch_dir("bad_scores");
    std::fs::write(dir.join("samples.json"), format!("[{}]", frame_json(1.5))).unwrap();
    let loaded: Result<Vec<FrameSamples>, Error> = read_json(&dir.join("samples.json"));
    assert!(matches!(loaded, Err(Error::Json(_))));

    // written back as a bare list
    let json = serde_json::to_string(&frame.sample_sets[1]).unwrap();
    assert_eq!(json, "[]");
}

#[test]
fn raw_predictions_shape() {
    let mut raw = RawFramePredictions {
        frame_id: "000001".to_string(),
        boxes: vec![car_box(0.0, 0.0)],
        logits: vec![vec![1.0, -2.0, 0.5]],
    };
    assert!(raw.check_shape().is_ok());
    raw.logits.push(vec![]);
    assert!(raw.check_shape().is_err());
    raw.boxes.push(car_box(1.0, 0.0));
    assert!(raw.check_shape().is_err());
}

#[test]
fn object_type_conversions() {
    assert_eq!(ObjectType::from_str("car").unwrap(), ObjectType::Car);
    assert_eq!(ObjectType::from_str("CYCLIST").unwrap(), ObjectType::Cyclist);
    assert!(ObjectType::from_str("Van").is_err());
    assert_eq!(ObjectType::from_label(2), Some(ObjectType::Pedestrian));
    assert_eq!(ObjectType::from_label(0), None);
    assert_eq!(ObjectType::Cyclist.label(), 3);
    assert_eq!(ObjectType::Car.to_string(), "Car");
}

#[test]
fn box_serializes_as_plain_array() {
    let json = serde_json::to_string(&car_box(1.0, 2.0)).unwrap();
    assert_eq!(json, "[1.0,2.0,0.0,4.0,1.8,1.5,0.0]");
    assert_abs_diff_eq!(car_box(0.0, 0.0).volume(), 4.0 * 1.8 * 1.5, epsilon = 1e-12);
}
