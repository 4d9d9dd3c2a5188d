//! GeoTIFF persistence for composites and label masks

use crate::core::temporal::CompositeIndex;
use crate::types::{FieldError, FieldResult, GeoTransform, LabelImage};
use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// EPSG code of a WGS84 UTM zone
pub fn utm_epsg(zone: u8, south: bool) -> u32 {
    if south {
        32700 + zone as u32
    } else {
        32600 + zone as u32
    }
}

/// Write a single-band GeoTIFF. `epsg` is attached as the CRS when given.
pub fn write_geotiff<T, P>(
    image: &Array2<T>,
    transform: &GeoTransform,
    epsg: Option<u32>,
    output_path: P,
) -> FieldResult<()>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let output_path = output_path.as_ref();
    let (height, width) = image.dim();
    if height == 0 || width == 0 {
        return Err(FieldError::Processing(format!(
            "Refusing to write empty raster to {}",
            output_path.display()
        )));
    }

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<T, _>(
        output_path,
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    if let Some(code) = epsg {
        dataset.set_spatial_ref(&SpatialRef::from_epsg(code)?)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<T> = image.iter().copied().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    log::info!(
        "Wrote {}x{} GeoTIFF: {}",
        width,
        height,
        output_path.display()
    );
    Ok(())
}

/// Read band 1 of a raster with its geotransform
pub fn read_geotiff<T, P>(path: P) -> FieldResult<(Array2<T>, GeoTransform)>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
    let image = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| FieldError::Processing(format!("Failed to reshape raster data: {}", e)))?;
    Ok((image, transform))
}

/// Composite index as 16-bit fixed point
pub fn write_composite<P: AsRef<Path>>(
    composite: &CompositeIndex,
    transform: &GeoTransform,
    epsg: Option<u32>,
    output_path: P,
) -> FieldResult<()> {
    write_geotiff(&composite.to_fixed_point(), transform, epsg, output_path)
}

/// Load a composite written by [`write_composite`] with the same ceiling
pub fn read_composite<P: AsRef<Path>>(path: P, ceiling: f32) -> FieldResult<CompositeIndex> {
    let (encoded, _) = read_geotiff::<u16, _>(path)?;
    Ok(CompositeIndex::from_fixed_point(&encoded, ceiling))
}

pub fn write_label_mask<P: AsRef<Path>>(
    mask: &LabelImage,
    transform: &GeoTransform,
    epsg: Option<u32>,
    output_path: P,
) -> FieldResult<()> {
    write_geotiff(mask, transform, epsg, output_path)
}
