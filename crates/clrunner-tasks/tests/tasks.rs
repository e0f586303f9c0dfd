//! Task runs against the recording backend, using the bundled kernel sources.

use std::path::Path;

use clrunner::testing::{declared_entries, DeviceOp, RecordingBackend};
use clrunner::{ClError, Engine};
use clrunner_tasks::replace_missing::{self, replaced_at};
use clrunner_tasks::vector_add;
use clrunner_tasks::*;
use proptest::prelude::*;

fn kernel_dir() -> &'static Path {
    Path::new(KERNEL_DIR)
}

/// Host stand-ins mirroring the `.cl` kernels work-item by work-item.
fn backend() -> RecordingBackend {
    let backend = RecordingBackend::new();
    backend.register_kernel(vector_add::ENTRY_POINT, |launch| {
        let n = launch.scalar::<i32>(3) as usize;
        let a = launch.read::<f32>(0);
        let b = launch.read::<f32>(1);
        let mut result = launch.read::<f32>(2);
        for gid in 0..launch.global_size()[0] {
            if gid < n {
                result[gid] = a[gid] + b[gid];
            }
        }
        launch.write(2, &result);
    });
    backend.register_kernel(replace_missing::ENTRY_POINT, |launch| {
        let n = launch.scalar::<i32>(2) as usize;
        let input = launch.read::<f32>(0);
        let mut result = launch.read::<f32>(1);
        for gid in 0..launch.global_size()[0] {
            if gid < n {
                result[gid] = replaced_at(&input, gid);
            }
        }
        launch.write(1, &result);
    });
    backend
}

fn launches(backend: &RecordingBackend) -> Vec<(Vec<usize>, Option<Vec<usize>>)> {
    backend
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            DeviceOp::Launched { global, local, .. } => Some((global, local)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_kernel_sources_declare_entry_points() {
    let vector = std::fs::read_to_string(kernel_dir().join(vector_add::SOURCE_FILE)).unwrap();
    assert_eq!(declared_entries(&vector), vec![vector_add::ENTRY_POINT]);

    let replace =
        std::fs::read_to_string(kernel_dir().join(replace_missing::SOURCE_FILE)).unwrap();
    assert_eq!(declared_entries(&replace), vec![replace_missing::ENTRY_POINT]);
}

#[test]
fn test_add_1024() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let a = fill_seq(1024, 1.0);
    let b = fill_seq(1024, 0.5);
    let mut result = vec![0.0f32; 1024];
    let report = add_vectors(&engine, &a, &b, &mut result, kernel_dir()).unwrap();

    assert_eq!(report.buffers, 3);
    assert_eq!(report.bytes_read_back, 4096);
    assert_eq!(result[0], 1.5);
    assert_eq!(result[1023], 2047.5);

    let mut reference = vec![0.0f32; 1024];
    add_vectors_seq(&a, &b, &mut reference);
    compare(&result, &reference, DEFAULT_TOLERANCE).unwrap();

    assert_eq!(launches(&backend), vec![(vec![1024], Some(vec![256]))]);
    assert_eq!(backend.outstanding(), 0);
}

#[test]
fn test_add_rounds_global_size_up() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let a = fill_seq(1000, 1.0);
    let b = fill_seq(1000, 0.5);
    let mut result = vec![0.0f32; 1000];
    add_vectors(&engine, &a, &b, &mut result, kernel_dir()).unwrap();

    assert_eq!(launches(&backend), vec![(vec![1024], Some(vec![256]))]);
    let sizes: Vec<usize> = backend
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            DeviceOp::BufferCreated { size, .. } => Some(size),
            _ => None,
        })
        .collect();
    assert_eq!(sizes, vec![4000, 4000, 4000]);

    let mut reference = vec![0.0f32; 1000];
    add_vectors_seq(&a, &b, &mut reference);
    compare(&result, &reference, DEFAULT_TOLERANCE).unwrap();
}

#[test]
fn test_add_binds_inputs_output_then_count() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let a = fill_seq(8, 0.0);
    let b = fill_seq(8, 0.0);
    let mut result = vec![0.0f32; 8];
    add_vectors(&engine, &a, &b, &mut result, kernel_dir()).unwrap();

    let args: Vec<(u32, bool)> = backend
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            DeviceOp::ArgSet { index, buffer, .. } => Some((index, buffer.is_some())),
            _ => None,
        })
        .collect();
    assert_eq!(args, vec![(0, true), (1, true), (2, true), (3, false)]);
}

#[test]
fn test_add_size_mismatch_touches_no_device() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let a = fill_seq(8, 0.0);
    let b = fill_seq(7, 0.0);
    let mut result = vec![0.0f32; 8];
    let err = add_vectors(&engine, &a, &b, &mut result, kernel_dir()).unwrap_err();

    match err {
        TaskError::SizeMismatch { sizes } => assert_eq!(sizes, vec![8, 7, 8]),
        other => panic!("expected size mismatch, got {:?}", other),
    }
    assert!(backend.ops().is_empty());
}

#[test]
fn test_empty_input_is_rejected() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let mut result: Vec<f32> = Vec::new();
    let err = add_vectors(&engine, &[], &[], &mut result, kernel_dir()).unwrap_err();
    assert!(matches!(err, TaskError::Cl(ClError::InvalidDescriptor(_))));
    assert!(backend.ops().is_empty());
}

#[test]
fn test_missing_kernel_dir() {
    let backend = backend();
    let engine = Engine::new(&backend);
    let dir = tempfile::tempdir().unwrap();

    let input = fill_with_gaps(16, 1.0);
    let mut result = vec![0.0f32; 16];
    let err = replace_missing(&engine, &input, &mut result, dir.path()).unwrap_err();
    assert!(matches!(err, TaskError::Cl(ClError::SourceLoad { .. })));
    assert_eq!(backend.outstanding(), 0);
}

#[test]
fn test_replace_missing_1000() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let input = fill_with_gaps(1000, 1.0);
    let mut result = vec![0.0f32; 1000];
    replace_missing(&engine, &input, &mut result, kernel_dir()).unwrap();

    let mut reference = vec![0.0f32; 1000];
    replace_missing_seq(&input, &mut reference);
    compare(&result, &reference, DEFAULT_TOLERANCE).unwrap();

    // 1.0 at index 0 and 13.0 at index 12
    assert_eq!(result[6], 7.0);
    assert!(result.iter().all(|v| *v != 0.0));
    assert_eq!(launches(&backend), vec![(vec![1024], Some(vec![256]))]);
    assert_eq!(backend.outstanding(), 0);
}

#[test]
fn test_replace_missing_uses_slice_length() {
    let backend = backend();
    let engine = Engine::new(&backend);

    let input = fill_with_gaps(300, 1.0);
    let mut result = vec![0.0f32; 300];
    let report = replace_missing(&engine, &input, &mut result, kernel_dir()).unwrap();

    assert_eq!(report.bytes_uploaded, 1200);
    assert_eq!(report.bytes_read_back, 1200);
    assert_eq!(result[299], replaced_at(&input, 299));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_replace_missing_matches_host(
        input in prop::collection::vec(
            prop_oneof![3 => Just(0.0f32), 1 => 1.0f32..100.0],
            1..600,
        )
    ) {
        let backend = backend();
        let engine = Engine::new(&backend);

        let mut result = vec![-1.0f32; input.len()];
        replace_missing(&engine, &input, &mut result, kernel_dir()).unwrap();

        let mut reference = vec![0.0f32; input.len()];
        replace_missing_seq(&input, &mut reference);
        prop_assert!(compare(&result, &reference, DEFAULT_TOLERANCE).is_ok());

        for (i, v) in input.iter().enumerate() {
            if *v != 0.0 {
                prop_assert_eq!(result[i], *v);
            }
        }
        let any_present = input.iter().any(|v| *v != 0.0);
        prop_assert_eq!(result.iter().all(|v| *v != 0.0), any_present);
        prop_assert_eq!(backend.outstanding(), 0);
    }
}
