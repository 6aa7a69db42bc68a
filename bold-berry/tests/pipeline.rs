mod common;

use std::sync::Arc;

use bold_berry::prelude::*;
use common::*;
use ndarray::Array4;

fn catalog() -> TemplateCatalog {
    TemplateCatalog::new()
        .with("MNI152Lin", 2, Grid::from_zooms((6, 6, 6), [2.0; 3], [0.0; 3]).unwrap())
        .with("MNI152NLin6Asym", 1, Grid::from_zooms((12, 12, 12), [1.0; 3], [0.0; 3]).unwrap())
        .with("MNI152NLin6Asym", 2, Grid::from_zooms((6, 6, 6), [2.0; 3], [0.0; 3]).unwrap())
        .with("MNI152NLin2009cAsym", 2, Grid::from_zooms((6, 6, 6), [2.0; 3], [0.0; 3]).unwrap())
        .with("MNIPediatricAsym", 2, Grid::from_zooms((6, 6, 6), [2.0; 3], [0.0; 3]).unwrap())
        .with("OASIS30ANTs", 1, Grid::from_zooms((12, 12, 12), [1.0; 3], [0.0; 3]).unwrap())
}

#[test]
fn test_two_templates_identity() {
    init_logger();
    let spaces = ["MNI152Lin", "MNI152NLin6Asym"];
    let series = ramp_series(4, (6, 6, 6), 2.0);
    let p = pipeline(Arc::new(ReferenceKernel), catalog(), config(&spaces));
    let out = p.run(inputs(series.clone(), &spaces)).unwrap();

    let std = &out.standard;
    assert_eq!(std.len(), 2);
    assert_eq!(std.template, vec!["MNI152Lin", "MNI152NLin6Asym"]);
    assert_eq!(std.bold_mask_std.len(), 2);

    // MNI152Lin 与输入同网格.
    let lin = &std.bold_std[0];
    assert_eq!(lin.len(), 4);
    for (a, b) in lin.data().iter().zip(series.data().iter()) {
        assert!((a - b).abs() < 1e-4);
    }

    // MNI152NLin6Asym 未指定分辨率, 先尝试 res-2.
    let nlin = &std.bold_std[1];
    assert_eq!(nlin.grid().zooms(), [2.0; 3]);
    assert_eq!(nlin.repetition_time(), Some(2.0));
    assert!(std.bold_std_ref.iter().all(|r| r.grid().same_as(lin.grid())));
}

#[test]
fn test_resampled_onto_finer_template_grid() {
    init_logger();
    let spaces = ["MNI152NLin6Asym:res-1"];
    let series = ramp_series(2, (6, 6, 6), 2.0);
    let p = pipeline(Arc::new(ReferenceKernel), catalog(), config(&spaces));
    let out = p.run(inputs(series, &["MNI152NLin6Asym"])).unwrap();

    let s = &out.standard.bold_std[0];
    assert_eq!(s.grid().shape(), (12, 12, 12));
    for i in 0..=10 {
        let expected = i as f32 / 2.0 + 10.0;
        assert!((s.frame(1)[(i, 3, 3)] - expected).abs() < 1e-4, "voxel {i}");
    }
    // x = 11mm 超出输入视野.
    assert_eq!(s.frame(1)[(11, 3, 3)], 0.0);
}

#[test]
fn test_cohorts_use_their_own_grid() {
    init_logger();
    let spaces = ["MNIPediatricAsym:cohort-1:res-1", "MNIPediatricAsym:cohort-2:res-1"];
    let catalog = catalog()
        .with_cohort("MNIPediatricAsym", 1, 1, Grid::from_zooms((12, 12, 12), [1.0; 3], [0.0; 3]).unwrap())
        .with_cohort("MNIPediatricAsym", 2, 1, Grid::from_zooms((8, 8, 8), [1.5; 3], [0.0; 3]).unwrap());
    let series = ramp_series(2, (6, 6, 6), 2.0);
    let anat = ["MNIPediatricAsym:cohort-1", "MNIPediatricAsym:cohort-2"];
    let out = pipeline(Arc::new(ReferenceKernel), catalog, config(&spaces))
        .run(inputs(series, &anat))
        .unwrap();

    let std = &out.standard;
    assert_eq!(
        std.spatial_reference,
        vec!["MNIPediatricAsym:cohort-1_res-1", "MNIPediatricAsym:cohort-2_res-1"]
    );
    assert_eq!(std.template, vec!["MNIPediatricAsym", "MNIPediatricAsym"]);
    assert_eq!(std.bold_std[0].grid().shape(), (12, 12, 12));
    assert_eq!(std.bold_std[1].grid().shape(), (8, 8, 8));
    assert_eq!(std.bold_std[1].grid().zooms(), [1.5; 3]);
}

#[test]
fn test_join_order_independent_of_completion() {
    init_logger();
    let spaces = [
        "OASIS30ANTs",
        "MNI152NLin2009cAsym",
        "MNI152Lin",
        "MNIPediatricAsym",
        "MNI152NLin6Asym",
    ];
    let series = ramp_series(3, (6, 6, 6), 2.0);
    for _ in 0..3 {
        let p = pipeline(Arc::new(JitterKernel { max_delay_ms: 15 }), catalog(), config(&spaces));
        let out = p.run(inputs(series.clone(), &spaces)).unwrap();
        assert_eq!(out.standard.template, spaces.to_vec());
        assert_eq!(out.standard.spatial_reference, spaces.to_vec());
        // 每个位置的序列都在对应模板的网格上.
        assert_eq!(out.standard.bold_std[0].grid().zooms(), [1.0; 3]);
        for i in 1..spaces.len() {
            assert_eq!(out.standard.bold_std[i].grid().zooms(), [2.0; 3]);
            assert!(out.standard.bold_mask_std[i].grid().same_as(out.standard.bold_std[i].grid()));
        }
    }
}

#[test]
fn test_broken_chain_fails_before_resampling() {
    init_logger();
    let spaces = ["MNI152Lin"];
    let series = ramp_series(2, (6, 6, 6), 2.0);
    let mut inputs = inputs(series, &spaces);
    // 功能像到结构像的变换指向了错误的帧.
    inputs.transforms.bold_to_t1w = Transform::identity("boldref", "T2w");

    let kernel = Arc::new(CountingKernel::default());
    let p = pipeline(kernel.clone(), catalog(), config(&spaces));
    let err = p.run(inputs).unwrap_err();
    assert_eq!(err.branch_label(), Some("std_trans[MNI152Lin]/plan"));
    assert!(matches!(
        err.root(),
        ResampleError::Composition(CompositionError::FrameBreak { .. })
    ));
    assert_eq!(kernel.calls(), 0);
}

#[test]
fn test_missing_anat2std_names_space() {
    init_logger();
    let series = ramp_series(2, (6, 6, 6), 2.0);
    let p = pipeline(
        Arc::new(ReferenceKernel),
        catalog(),
        config(&["MNI152Lin", "MNI152NLin2009cAsym"]),
    );
    let err = p.run(inputs(series, &["MNI152Lin"])).unwrap_err();
    assert_eq!(err.branch_label(), Some("std_trans[MNI152NLin2009cAsym]/plan"));
    assert!(matches!(err.root(), ResampleError::MissingKey { .. }));
}

#[test]
fn test_negative_undershoot_clipped() {
    init_logger();
    let grid = Grid::from_zooms((2, 2, 1), [2.0; 3], [0.0; 3]).unwrap();
    let data = Array4::from_shape_vec((1, 2, 2, 1), vec![-0.3, -0.0001, 0.0, 5.0]).unwrap();
    let series = Series::new(grid.clone(), data).unwrap();
    let catalog = TemplateCatalog::new().with("MNI152Lin", 2, grid);
    let mut c = config(&["MNI152Lin"]);
    c.native = true;
    let out = pipeline(Arc::new(ReferenceKernel), catalog, c)
        .run(inputs(series, &["MNI152Lin"]))
        .unwrap();

    let values: Vec<f32> = out.standard.bold_std[0].data().iter().copied().collect();
    assert_eq!(values, vec![0.0, 0.0, 0.0, 5.0]);
    let native = out.native.unwrap();
    assert_eq!(native.bold.data().iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.0, 5.0]);
}
