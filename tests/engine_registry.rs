use std::io::Cursor;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, RgbImage};

use swiftdetect::detect::{
    Engine, EngineInput, EngineLoadError, EngineLoader, EngineParams, EngineRuntimeError,
    FALLBACK_LABEL,
};
use swiftdetect::detect::{BoundingBox, Detection};
use swiftdetect::{
    CatalogScanner, DefaultEngineLoader, DetectionBatch, EngineDescriptor, EngineRegistry,
    InferenceParams, InferencePipeline,
};

struct Fixed {
    labels: Vec<String>,
}

impl Engine for Fixed {
    fn name(&self) -> &'static str {
        "Fixed"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(
        &self,
        _input: EngineInput<'_>,
        _params: &EngineParams,
    ) -> Result<DetectionBatch, EngineRuntimeError> {
        Ok(DetectionBatch::empty())
    }
}

/// `yolo/ok` loads with person/car labels, everything else fails.
struct TestLoader;

impl EngineLoader for TestLoader {
    fn load(&self, descriptor: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
        match descriptor.model_name.as_str() {
            "ok" => Ok(Arc::new(Fixed {
                labels: vec!["person".to_string(), "car".to_string()],
            })),
            other => Err(EngineLoadError::WeightsNotFound {
                name: other.to_string(),
                searched: "models/yolo".into(),
            }),
        }
    }
}

fn ok() -> EngineDescriptor {
    EngineDescriptor::new("yolo", "ok")
}

fn broken() -> EngineDescriptor {
    EngineDescriptor::new("yolo", "broken")
}

#[test]
fn failed_switch_falls_back_and_recovers() {
    let registry = EngineRegistry::new(vec![ok(), broken()], TestLoader);

    let sel = registry.select(&ok());
    assert_eq!(sel.descriptor, ok());
    assert_eq!(registry.labels(), vec!["person", "car"]);
    assert_eq!(sel.last_error, None);

    let sel = registry.select(&broken());
    assert!(sel.descriptor.is_synthetic());
    assert_eq!(sel.labels, vec![FALLBACK_LABEL]);
    let err = sel.last_error.expect("fallback records the failure");
    assert!(err.starts_with("WeightsNotFound: "), "{}", err);
    assert_eq!(registry.status().implementation, "SyntheticEngine");

    let sel = registry.select(&ok());
    assert_eq!(sel.descriptor, ok());
    assert_eq!(sel.last_error, None);
    assert_eq!(registry.status().last_error, None);
}

#[test]
fn concurrent_switches_never_expose_torn_state() {
    let registry = Arc::new(EngineRegistry::new(vec![ok(), broken()], TestLoader));
    registry.select(&ok());

    let mut workers = Vec::new();
    for i in 0..4 {
        let registry = registry.clone();
        workers.push(thread::spawn(move || {
            for round in 0..200 {
                let target = if (i + round) % 2 == 0 { ok() } else { broken() };
                registry.select(&target);
            }
        }));
    }
    for _ in 0..4 {
        let registry = registry.clone();
        workers.push(thread::spawn(move || {
            for _ in 0..500 {
                let status = registry.status();
                if status.active == ok() {
                    assert_eq!(status.labels, vec!["person", "car"]);
                    assert_eq!(status.last_error, None);
                    assert_eq!(status.implementation, "Fixed");
                } else {
                    assert!(status.active.is_synthetic());
                    assert_eq!(status.labels, vec![FALLBACK_LABEL]);
                    assert!(status.last_error.is_some());
                    assert_eq!(status.implementation, "SyntheticEngine");
                }
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker panicked");
    }
}

#[test]
fn scanned_catalog_feeds_registry() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("yolo")).unwrap();
    std::fs::write(dir.path().join("yolo").join("m1.onnx"), b"not a model").unwrap();

    let scanner = CatalogScanner::new(dir.path()).with_hints(Vec::new());
    let registry = EngineRegistry::from_scanner(&scanner, DefaultEngineLoader::new(dir.path(), 640));
    assert_eq!(
        registry.list_available(),
        &[EngineDescriptor::new("yolo", "m1.onnx"), EngineDescriptor::synthetic()]
    );

    // m1.onnx is not a valid model (or the backend is compiled out), so the sweep
    // lands on the synthetic engine with a recorded error.
    let active = registry.active();
    assert!(active.descriptor.is_synthetic());
    assert!(active.last_error.is_some());
}

#[test]
fn missing_weights_report_where_they_were_looked_for() {
    let dir = tempfile::tempdir().unwrap();
    let loader = DefaultEngineLoader::new(dir.path(), 640);
    let err = loader
        .resolve_weights("yolo", "absent.onnx")
        .expect_err("nothing on disk");
    match err {
        EngineLoadError::WeightsNotFound { name, searched } => {
            assert_eq!(name, "absent.onnx");
            assert_eq!(searched, dir.path().join("yolo"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn selecting_unloadable_catalog_entry_records_error() {
    let m1 = EngineDescriptor::new("yolo", "m1");
    let registry = EngineRegistry::new(vec![m1.clone(), EngineDescriptor::synthetic()], TestLoader);
    assert_eq!(registry.list_available().len(), 2);

    let sel = registry.select(&m1);
    assert_eq!(sel.descriptor, EngineDescriptor::synthetic());
    assert!(sel.last_error.unwrap().contains("'m1' not found"));
}

/// Holds `infer` open until the test releases it.
struct Parked {
    labels: Vec<String>,
    entered: Barrier,
    release: Barrier,
}

impl Engine for Parked {
    fn name(&self) -> &'static str {
        "Parked"
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(
        &self,
        _input: EngineInput<'_>,
        _params: &EngineParams,
    ) -> Result<DetectionBatch, EngineRuntimeError> {
        self.entered.wait();
        self.release.wait();
        Ok(DetectionBatch {
            elapsed_ms: 1.0,
            detections: vec![Detection {
                class_id: 0,
                label: "car".to_string(),
                score: 0.8,
                bbox: BoundingBox::new(1.0, 1.0, 4.0, 4.0),
            }],
        })
    }
}

struct ParkedLoader(Arc<Parked>);

impl EngineLoader for ParkedLoader {
    fn load(&self, _descriptor: &EngineDescriptor) -> Result<Arc<dyn Engine>, EngineLoadError> {
        Ok(self.0.clone())
    }
}

#[test]
fn select_during_inference_leaves_in_flight_call_alone() {
    let parked = Arc::new(Parked {
        labels: vec!["car".to_string()],
        entered: Barrier::new(2),
        release: Barrier::new(2),
    });
    let registry = Arc::new(EngineRegistry::new(Vec::new(), ParkedLoader(parked.clone())));
    registry.select(&EngineDescriptor::new("yolo", "parked"));
    let pipeline = InferencePipeline::new(registry.clone());

    let mut frame = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(16, 16))
        .write_to(&mut Cursor::new(&mut frame), ImageFormat::Png)
        .unwrap();
    let in_flight = thread::spawn(move || pipeline.run_inference(&frame, &InferenceParams::default()));

    parked.entered.wait();
    let started = Instant::now();
    let sel = registry.select(&EngineDescriptor::synthetic());
    let switch_time = started.elapsed();
    assert!(sel.descriptor.is_synthetic());
    assert_eq!(sel.last_error, None);
    assert_eq!(registry.status().implementation, "SyntheticEngine");
    parked.release.wait();

    let batch = in_flight.join().expect("inference thread panicked");
    assert!(switch_time < Duration::from_secs(1), "select blocked for {:?}", switch_time);
    let labels: Vec<&str> = batch.detections.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["car"]);
}
