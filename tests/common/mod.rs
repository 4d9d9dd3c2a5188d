//! Synthetic Landsat scene archives for integration tests

#![allow(dead_code)]

use fieldmap::io::raster::write_geotiff;
use fieldmap::types::GeoTransform;
use ndarray::Array2;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const PIXEL_SIZE: f64 = 30.0;
pub const SCENE_NW_EASTING: f64 = 390_000.0;
pub const SCENE_NW_NORTHING: f64 = 4_190_000.0;

/// Radiance rescaling used for every band of every synthetic scene
pub const SLOPE: f64 = 0.5;
pub const INTERCEPT: f64 = 0.0;

pub fn scene_id(year: i32) -> String {
    format!("LT5034034{}195PAC01", year)
}

pub fn mtl(scene_id: &str, year: i32, rows: usize, cols: usize, bands: &[usize]) -> String {
    let east = SCENE_NW_EASTING + cols as f64 * PIXEL_SIZE;
    let south = SCENE_NW_NORTHING - rows as f64 * PIXEL_SIZE;
    let mut text = String::new();
    text.push_str("GROUP = L1_METADATA_FILE\n");
    text.push_str("  GROUP = METADATA_FILE_INFO\n");
    text.push_str(&format!("    LANDSAT_SCENE_ID = \"{}\"\n", scene_id));
    text.push_str("  END_GROUP = METADATA_FILE_INFO\n");
    text.push_str("  GROUP = PRODUCT_METADATA\n");
    text.push_str(&format!("    DATE_ACQUIRED = {}-07-14\n", year));
    text.push_str("    SCENE_CENTER_TIME = \"17:25:02.6530000Z\"\n");
    for (corner, x, y) in [
        ("UL", SCENE_NW_EASTING, SCENE_NW_NORTHING),
        ("UR", east, SCENE_NW_NORTHING),
        ("LL", SCENE_NW_EASTING, south),
        ("LR", east, south),
    ] {
        text.push_str(&format!("    CORNER_{}_PROJECTION_X_PRODUCT = {:.3}\n", corner, x));
        text.push_str(&format!("    CORNER_{}_PROJECTION_Y_PRODUCT = {:.3}\n", corner, y));
    }
    text.push_str(&format!("    REFLECTIVE_LINES = {}\n", rows));
    text.push_str(&format!("    REFLECTIVE_SAMPLES = {}\n", cols));
    for band in bands {
        text.push_str(&format!(
            "    FILE_NAME_BAND_{} = \"{}_B{}.TIF\"\n",
            band, scene_id, band
        ));
    }
    text.push_str("  END_GROUP = PRODUCT_METADATA\n");
    text.push_str("  GROUP = RADIOMETRIC_RESCALING\n");
    for band in 1..=bands.iter().copied().max().unwrap_or(0) {
        text.push_str(&format!("    RADIANCE_MULT_BAND_{} = {:.4}\n", band, SLOPE));
        text.push_str(&format!("    RADIANCE_ADD_BAND_{} = {:.4}\n", band, INTERCEPT));
    }
    text.push_str("  END_GROUP = RADIOMETRIC_RESCALING\n");
    text.push_str("  GROUP = PROJECTION_PARAMETERS\n");
    text.push_str("    UTM_ZONE = 13\n");
    text.push_str(&format!("    GRID_CELL_SIZE_REFLECTIVE = {:.2}\n", PIXEL_SIZE));
    text.push_str("  END_GROUP = PROJECTION_PARAMETERS\n");
    text.push_str("END_GROUP = L1_METADATA_FILE\nEND\n");
    text
}

fn scene_transform() -> GeoTransform {
    GeoTransform {
        top_left_x: SCENE_NW_EASTING,
        pixel_width: PIXEL_SIZE,
        rotation_x: 0.0,
        top_left_y: SCENE_NW_NORTHING,
        rotation_y: 0.0,
        pixel_height: -PIXEL_SIZE,
    }
}

/// Pack `files` (already on disk) into `<dir>/<name>` as a tar.gz
fn pack_tar_gz(archive: &Path, files: &[PathBuf]) {
    let file = File::create(archive).expect("Failed to create archive");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for path in files {
        let name = path.file_name().expect("File without name");
        builder
            .append_path_with_name(path, name)
            .expect("Failed to add archive entry");
    }
    builder
        .into_inner()
        .expect("Failed to finish tar stream")
        .finish()
        .expect("Failed to finish gzip stream");
}

/// Write a scene archive for `year` holding the given raw band rasters
pub fn write_scene_archive(dir: &Path, year: i32, bands: &[(usize, Array2<u16>)]) -> PathBuf {
    write_scene_archive_as(dir, &scene_id(year), year, bands)
}

/// Same as [`write_scene_archive`] under an explicit scene id, which must
/// carry the year at characters 9..13
pub fn write_scene_archive_as(
    dir: &Path,
    id: &str,
    year: i32,
    bands: &[(usize, Array2<u16>)],
) -> PathBuf {
    let staging = tempfile::tempdir().expect("Failed to create staging dir");
    let (rows, cols) = bands.first().map(|(_, b)| b.dim()).unwrap_or((0, 0));
    let band_numbers: Vec<usize> = bands.iter().map(|(b, _)| *b).collect();

    let mut files = Vec::new();
    let mtl_path = staging.path().join(format!("{}_MTL.txt", id));
    std::fs::write(&mtl_path, mtl(id, year, rows, cols, &band_numbers))
        .expect("Failed to write metadata");
    files.push(mtl_path);

    for (band, raster) in bands {
        let path = staging.path().join(format!("{}_B{}.TIF", id, band));
        write_geotiff(raster, &scene_transform(), Some(32613), &path).expect("Failed to write band");
        files.push(path);
    }

    let archive = dir.join(format!("{}.tar.gz", id));
    pack_tar_gz(&archive, &files);
    archive
}

/// An archive for `year` that holds a band but no metadata file
pub fn write_archive_without_metadata(dir: &Path, year: i32) -> PathBuf {
    let id = format!("LT5034034{}999XXX01", year);
    let staging = tempfile::tempdir().expect("Failed to create staging dir");
    let band = staging.path().join(format!("{}_B3.TIF", id));
    write_geotiff(&Array2::<u16>::ones((4, 4)), &scene_transform(), None, &band)
        .expect("Failed to write band");
    let archive = dir.join(format!("{}.tar.gz", id));
    pack_tar_gz(&archive, &[band]);
    archive
}
