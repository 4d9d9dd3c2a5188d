mod common;

use common::{
    write_archive_without_metadata, write_scene_archive, write_scene_archive_as, SCENE_NW_EASTING,
    SCENE_NW_NORTHING,
};
use fieldmap::core::field_mask::{Cutoff, FieldMaskBuilder, MaskParams};
use fieldmap::core::regions::{RegionLabeler, RegionParams};
use fieldmap::core::road_lines::RoadLineParams;
use fieldmap::core::temporal::{CompositeIndex, TemporalCompositor, TemporalStack};
use fieldmap::io::raster::{read_composite, read_geotiff};
use fieldmap::io::records::read_records_csv;
use fieldmap::io::SceneRepository;
use fieldmap::pipeline::{BandSelection, FieldPipeline, PipelineConfig};
use fieldmap::types::{AcquisitionTime, ProjectedPoint, Window, BACKGROUND};
use ndarray::{s, Array2};
use tempfile::TempDir;

fn acquisition(year: i32) -> AcquisitionTime {
    AcquisitionTime { year, month: 7, day: 14, hour: 17, minute: 25 }
}

/// Two bands whose ratio is +0.5 on the stripe columns and -0.5 elsewhere,
/// with the overall brightness changing from frame to frame
fn stripe_stacks(frames: usize, stripe: &[usize]) -> (TemporalStack, TemporalStack) {
    let mut nir = Vec::new();
    let mut red = Vec::new();
    for t in 0..frames {
        let k = 10.0 * (t + 1) as f32;
        let a = Array2::from_shape_fn((10, 10), |(_, c)| if stripe.contains(&c) { 3.0 * k } else { k });
        let b = Array2::from_shape_fn((10, 10), |(_, c)| if stripe.contains(&c) { k } else { 3.0 * k });
        let id = format!("scene{}", t);
        nir.push((id.clone(), acquisition(2000 + t as i32), a));
        red.push((id, acquisition(2000 + t as i32), b));
    }
    (
        TemporalStack::from_frames(4, nir).unwrap(),
        TemporalStack::from_frames(3, red).unwrap(),
    )
}

#[test]
fn test_compress_then_threshold_matches_hand_computed_mask() {
    let (nir, red) = stripe_stacks(4, &[4, 5]);
    let composite = TemporalCompositor::standard().compress(&nir, &red).unwrap();

    // Averages are exactly +-0.5, normalized onto +-1
    assert!(composite.values.iter().all(|&v| v == 1.0 || v == -1.0));
    assert_eq!(composite.values[[3, 4]], 1.0);
    assert_eq!(composite.values[[3, 3]], -1.0);

    // Clipped at zero, the stripe is 1 on flat 0; a disk wider than the stripe
    // opens it away, so the top-hat is 1 on the stripe and 0 off it
    let builder = FieldMaskBuilder::new(MaskParams {
        tophat_radius: Some(3),
        cutoff: Cutoff::Fixed(1.0),
        closing_size: 5,
    });
    let mask = builder.threshold(&composite).unwrap();
    let expected = Array2::from_shape_fn((10, 10), |(_, c)| if c == 4 || c == 5 { 1u32 } else { 0 });
    assert_eq!(mask, expected);
}

#[test]
fn test_fixed_point_composite_survives_geotiff() {
    let (nir, red) = stripe_stacks(3, &[2, 3, 7]);
    let composite = TemporalCompositor::standard().compress(&nir, &red).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("composite.tif");
    let window = Window::new(
        ProjectedPoint::new(SCENE_NW_EASTING, SCENE_NW_NORTHING),
        ProjectedPoint::new(SCENE_NW_EASTING + 300.0, SCENE_NW_NORTHING - 300.0),
    )
    .unwrap();
    let transform = fieldmap::types::GeoTransform::from_window(&window, 30.0);
    fieldmap::io::raster::write_composite(&composite, &transform, None, &path).unwrap();

    let restored: CompositeIndex = read_composite(&path, composite.ceiling).unwrap();
    for (a, b) in composite.values.iter().zip(restored.values.iter()) {
        assert!((a - b).abs() <= 2.0 / u16::MAX as f32);
    }
}

/// 60x60 composite: two fields split by a one pixel road, joined by a
/// bridge. Both keep a margin wider than the closing half-width so the
/// closing does not run into the raster edge.
fn bridged_fields() -> CompositeIndex {
    let mut values = Array2::from_elem((60, 60), -1.0f32);
    values.slice_mut(s![5..55, 5..30]).fill(1.0);
    values.slice_mut(s![5..55, 31..55]).fill(1.0);
    values[[20, 30]] = 1.0;
    CompositeIndex { values, ceiling: 1.0 }
}

fn segmentation_config(strides: Vec<usize>) -> PipelineConfig {
    PipelineConfig {
        mask: MaskParams {
            tophat_radius: None,
            cutoff: Cutoff::Fixed(0.0),
            closing_size: 9,
        },
        roads: RoadLineParams {
            strides,
            ..Default::default()
        },
        regions: RegionParams {
            min_speck_size: 10,
            min_area: 100,
            max_area: 10_000,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_road_removal_separates_bridged_fields() {
    let pipeline = FieldPipeline::with_repository(
        segmentation_config(vec![60]),
        SceneRepository::temporary().unwrap(),
    )
    .unwrap();
    let segmentation = pipeline.segment(&bridged_fields()).unwrap();

    assert_eq!(segmentation.thresholded[[20, 30]], 1);
    assert_eq!(segmentation.lines_burned, 1);

    let records = &segmentation.fields.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].label, 1);
    assert_eq!(records[0].area, 1250);
    assert_eq!((records[0].nw_row, records[0].nw_col), (5, 5));
    assert_eq!((records[0].se_row, records[0].se_col), (55, 30));
    assert_eq!(records[1].label, 2);
    assert_eq!(records[1].area, 1200);
    assert_eq!((records[1].nw_row, records[1].nw_col), (5, 31));

    let mask = &segmentation.fields.mask;
    assert!(mask.column(30).iter().all(|&v| v == BACKGROUND));
    assert_eq!(mask[[10, 10]], 1);
    assert_eq!(mask[[10, 40]], 2);
}

#[test]
fn test_without_road_removal_fields_stay_merged() {
    let pipeline = FieldPipeline::with_repository(
        segmentation_config(Vec::new()),
        SceneRepository::temporary().unwrap(),
    )
    .unwrap();
    let segmentation = pipeline.segment(&bridged_fields()).unwrap();
    assert_eq!(segmentation.lines_burned, 0);
    assert_eq!(segmentation.fields.records.len(), 1);
    assert_eq!(segmentation.fields.records[0].area, 2451);
}

#[test]
fn test_labeling_after_segmentation_is_stable() {
    let pipeline = FieldPipeline::with_repository(
        segmentation_config(vec![60]),
        SceneRepository::temporary().unwrap(),
    )
    .unwrap();
    let segmentation = pipeline.segment(&bridged_fields()).unwrap();
    let labeler = RegionLabeler::new(pipeline.config().regions.clone());
    let relabeled = labeler.label(&segmentation.fields.mask).unwrap();
    assert_eq!(relabeled.mask, segmentation.fields.mask);
    assert_eq!(relabeled.records, segmentation.fields.records);
}

/// Raw digital numbers for one 50x50 scene: inside the 40x40 window at
/// offset (5, 5), two fields split by a road at window column 19 with a
/// bridge at window row 12
fn scene_bands(k: u16) -> (Array2<u16>, Array2<u16>) {
    let is_field = |r: usize, c: usize| -> bool {
        if r < 5 || c < 5 {
            return false;
        }
        let (wr, wc) = (r - 5, c - 5);
        let rows = (4..36).contains(&wr);
        let left = (3..19).contains(&wc);
        let right = (20..36).contains(&wc);
        (rows && (left || right)) || (wr, wc) == (12, 19)
    };
    let nir = Array2::from_shape_fn((50, 50), |(r, c)| if is_field(r, c) { 3 * k } else { k });
    let red = Array2::from_shape_fn((50, 50), |(r, c)| if is_field(r, c) { k } else { 3 * k });
    (nir, red)
}

#[test]
fn test_pipeline_from_archives_to_outputs() {
    let _ = env_logger::builder().is_test(true).try_init();

    let archives = TempDir::new().unwrap();
    let outputs = TempDir::new().unwrap();
    for (i, year) in (2004..=2008).enumerate() {
        let (nir, red) = scene_bands(10 * (i as u16 + 1));
        write_scene_archive(archives.path(), year, &[(3, red), (4, nir)]);
    }
    write_archive_without_metadata(archives.path(), 2006);

    // A second 2007 scene whose 20x20 footprint stops short of the window
    let (small_nir, small_red) = scene_bands(30);
    write_scene_archive_as(
        archives.path(),
        "LT50340342007211PAC01",
        2007,
        &[
            (3, small_red.slice(s![..20, ..20]).to_owned()),
            (4, small_nir.slice(s![..20, ..20]).to_owned()),
        ],
    );

    // Corners 10 m inside pixel boundaries; the crop still starts on pixel (5, 5)
    let window = Window::new(
        ProjectedPoint::new(SCENE_NW_EASTING + 160.0, SCENE_NW_NORTHING - 160.0),
        ProjectedPoint::new(SCENE_NW_EASTING + 1_360.0, SCENE_NW_NORTHING - 1_360.0),
    )
    .unwrap();

    let config = PipelineConfig {
        window,
        numerator: BandSelection { band: 4, years: (2005..=2008).collect() },
        denominator: BandSelection { band: 3, years: (2005..=2007).collect() },
        archive_dir: archives.path().to_path_buf(),
        work_dir: None,
        output_dir: outputs.path().to_path_buf(),
        sample_bands: vec![3, 4],
        mask: MaskParams {
            tophat_radius: None,
            cutoff: Cutoff::Fixed(0.0),
            closing_size: 5,
        },
        roads: RoadLineParams {
            strides: vec![40],
            ..Default::default()
        },
        regions: RegionParams {
            min_speck_size: 10,
            min_area: 100,
            max_area: 10_000,
            ..Default::default()
        },
        ..Default::default()
    };

    let pipeline = FieldPipeline::new(config).unwrap();
    let result = pipeline.run().expect("Pipeline failed");

    // 2008 has no red frame, 2004 is outside both year sets
    assert_eq!(result.frames_used, 3);
    assert_eq!(result.excluded.len(), 2);
    let (uncovered, reason) = result
        .excluded
        .iter()
        .find(|(path, _)| path.to_string_lossy().contains("2007211PAC01"))
        .expect("Scene outside the window was not excluded");
    assert!(uncovered.is_file());
    assert!(reason.contains("outside the 20x20 raster"), "unexpected reason: {}", reason);
    assert!(result
        .excluded
        .iter()
        .any(|(path, _)| path.to_string_lossy().contains("2006999XXX01")));
    assert_eq!(result.transform.top_left_x, SCENE_NW_EASTING + 150.0);
    assert_eq!(result.transform.top_left_y, SCENE_NW_NORTHING - 150.0);
    assert_eq!(result.composite.dim(), (40, 40));
    assert_eq!(result.segmentation.lines_burned, 1);

    let records = &result.segmentation.fields.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].area, 512);
    assert_eq!((records[0].nw_row, records[0].nw_col), (4, 3));
    assert_eq!((records[0].se_row, records[0].se_col), (36, 19));
    assert!((records[0].centroid_row - 19.5).abs() < 1e-9);
    assert!((records[0].centroid_col - 10.5).abs() < 1e-9);
    assert_eq!((records[1].nw_row, records[1].nw_col), (4, 20));

    // 4 scenes x 2 bands x 2 fields; NIR over a field of the 2005 scene is 3k * 0.5
    assert_eq!(result.samples.len(), 16);
    let sample = result
        .samples
        .iter()
        .find(|s| s.label == 1 && s.band == 4 && s.acquisition.year == 2005)
        .expect("Missing 2005 NIR sample");
    assert!((sample.mean - 30.0).abs() < 1e-6);
    assert!(sample.variance.abs() < 1e-9);
    assert_eq!(sample.pixels, 512);

    let paths = pipeline.write_outputs(&result).unwrap();
    let suffix = window.file_suffix();
    assert!(paths.field_mask.ends_with(format!("field_mask_{}.tif", suffix)));

    let (mask, transform) = read_geotiff::<u32, _>(&paths.field_mask).unwrap();
    assert_eq!(mask, result.segmentation.fields.mask);
    // Anchored on the cropped pixel grid, not on the requested corner
    assert_eq!(transform.top_left_x, SCENE_NW_EASTING + 150.0);
    assert_eq!(transform.top_left_y, SCENE_NW_NORTHING - 150.0);
    assert_eq!(transform.pixel_width, 30.0);

    assert_eq!(read_records_csv(&paths.field_props).unwrap().len(), 2);
    assert!(paths.composite.is_file());
    assert!(paths.field_samples.map(|p| p.is_file()).unwrap_or(false));

    pipeline.finish().unwrap();
}
