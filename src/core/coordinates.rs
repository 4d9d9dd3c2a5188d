//! Conversions between projected UTM meters, scene pixels and geodetic
//! latitude/longitude.

use crate::types::{
    FieldError, FieldResult, GeodeticPoint, Hemisphere, PixelIndex, ProjectedPoint, SceneCorners,
    Window,
};
use serde::{Deserialize, Serialize};

/// False northing applied to southern hemisphere UTM coordinates
pub const SOUTHERN_FALSE_NORTHING: f64 = 10_000_000.0;

/// False easting of every UTM zone
pub const FALSE_EASTING: f64 = 500_000.0;

/// Mean earth radius used by the ground distance helpers, meters
pub const MEAN_EARTH_RADIUS: f64 = 6_371_000.0;

/// Reference ellipsoid and projection scale factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Semi-major axis in meters
    pub semi_major: f64,
    /// First eccentricity squared
    pub eccentricity_sq: f64,
    /// Central meridian scale factor
    pub scale_factor: f64,
}

impl Ellipsoid {
    /// WGS84 with the UTM scale factor
    pub fn wgs84() -> Self {
        let flattening = 1.0 / 298.257_223_563;
        Self {
            semi_major: 6_378_137.0,
            eccentricity_sq: flattening * (2.0 - flattening),
            scale_factor: 0.9996,
        }
    }

    /// Second eccentricity squared
    pub fn second_eccentricity_sq(&self) -> f64 {
        self.eccentricity_sq / (1.0 - self.eccentricity_sq)
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Mapping between a scene's projected coordinates and its pixel grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateFrame {
    pub corners: SceneCorners,
    /// Meters per pixel
    pub pixel_size: f64,
    pub rows: usize,
    pub cols: usize,
    pub zone: Option<u8>,
    pub hemisphere: Hemisphere,
    pub ellipsoid: Ellipsoid,
}

impl CoordinateFrame {
    pub fn new(corners: SceneCorners, pixel_size: f64, rows: usize, cols: usize) -> FieldResult<Self> {
        if !(pixel_size.is_finite() && pixel_size > 0.0) {
            return Err(FieldError::Metadata(format!(
                "Invalid pixel size {}",
                pixel_size
            )));
        }
        Ok(Self {
            corners,
            pixel_size,
            rows,
            cols,
            zone: None,
            hemisphere: Hemisphere::North,
            ellipsoid: Ellipsoid::wgs84(),
        })
    }

    pub fn with_zone(mut self, zone: u8, hemisphere: Hemisphere) -> Self {
        self.zone = Some(zone);
        self.hemisphere = hemisphere;
        self
    }

    /// Pixel containing `point`, measured from the NW corner
    pub fn projected_to_pixel(&self, point: ProjectedPoint) -> FieldResult<PixelIndex> {
        let nw = self.corners.nw;
        let row = ((nw.northing - point.northing) / self.pixel_size).floor();
        let col = ((point.easting - nw.easting) / self.pixel_size).floor();

        if row < 0.0 || col < 0.0 || row >= self.rows as f64 || col >= self.cols as f64 {
            return Err(FieldError::CoordinateOutOfBounds {
                row: row as i64,
                col: col as i64,
                rows: self.rows,
                cols: self.cols,
            });
        }

        Ok(PixelIndex {
            row: row as usize,
            col: col as usize,
        })
    }

    /// Projected coordinate of the NW corner of a pixel
    pub fn pixel_to_projected(&self, pixel: PixelIndex) -> ProjectedPoint {
        let nw = self.corners.nw;
        ProjectedPoint {
            easting: nw.easting + pixel.col as f64 * self.pixel_size,
            northing: nw.northing - pixel.row as f64 * self.pixel_size,
        }
    }

    /// NW corner of the pixel containing `point`
    pub fn pixel_origin(&self, point: ProjectedPoint) -> FieldResult<ProjectedPoint> {
        Ok(self.pixel_to_projected(self.projected_to_pixel(point)?))
    }

    /// Whether `point` lies inside the corner quadrilateral
    pub fn contains(&self, point: ProjectedPoint) -> bool {
        let c = &self.corners;
        // Clockwise when viewed with north up
        let ring = [c.nw, c.ne, c.se, c.sw];
        let mut sign = 0.0f64;
        for i in 0..ring.len() {
            let a = ring[i];
            let b = ring[(i + 1) % ring.len()];
            let cross = (b.easting - a.easting) * (point.northing - a.northing)
                - (b.northing - a.northing) * (point.easting - a.easting);
            if cross == 0.0 {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Latitude/longitude of a projected point using the frame's zone
    pub fn projected_to_geodetic(&self, point: ProjectedPoint) -> FieldResult<GeodeticPoint> {
        let zone = self.zone.ok_or_else(|| {
            FieldError::Metadata("Scene has no UTM zone".to_string())
        })?;
        Ok(utm_to_geodetic(
            zone,
            point.easting,
            point.northing,
            self.hemisphere,
            &self.ellipsoid,
        ))
    }
}

/// Central meridian of a 6 degree UTM zone, degrees
pub fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// Inverse UTM projection, returning decimal degrees
pub fn utm_to_geodetic(
    zone: u8,
    easting: f64,
    northing: f64,
    hemisphere: Hemisphere,
    ellipsoid: &Ellipsoid,
) -> GeodeticPoint {
    let a = ellipsoid.semi_major;
    let e2 = ellipsoid.eccentricity_sq;
    let ep2 = ellipsoid.second_eccentricity_sq();
    let k0 = ellipsoid.scale_factor;

    let northing = match hemisphere {
        Hemisphere::North => northing,
        Hemisphere::South => SOUTHERN_FALSE_NORTHING - northing,
    };
    let x = easting - FALSE_EASTING;

    // Footpoint latitude from the meridional arc
    let arc = northing / k0;
    let mu = arc / (a * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0));
    let sqrt_one_minus_e2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_one_minus_e2) / (1.0 + sqrt_one_minus_e2);
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();
    let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
    let n1 = a / denom.sqrt();
    let r1 = a * (1.0 - e2) / denom.powf(1.5);
    let t1 = tan_phi1 * tan_phi1;
    let c1 = ep2 * cos_phi1 * cos_phi1;
    let d = x / (n1 * k0);

    let latitude = phi1
        - (n1 * tan_phi1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let delta_lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos_phi1;

    let latitude = latitude.to_degrees();
    GeodeticPoint {
        latitude: match hemisphere {
            Hemisphere::North => latitude,
            Hemisphere::South => -latitude,
        },
        longitude: central_meridian(zone) + delta_lon.to_degrees(),
    }
}

/// Latitude/longitude of a window's NW and SE corners
pub fn window_to_geodetic(
    window: &Window,
    zone: u8,
    hemisphere: Hemisphere,
) -> (GeodeticPoint, GeodeticPoint) {
    let ellipsoid = Ellipsoid::wgs84();
    (
        utm_to_geodetic(zone, window.nw.easting, window.nw.northing, hemisphere, &ellipsoid),
        utm_to_geodetic(zone, window.se.easting, window.se.northing, hemisphere, &ellipsoid),
    )
}

/// Ground distance in meters spanned by a latitude difference in degrees
pub fn latitude_span_meters(lat_diff: f64) -> f64 {
    lat_diff.to_radians() * MEAN_EARTH_RADIUS
}

/// Ground distance in meters spanned by a longitude difference at `latitude`
pub fn longitude_span_meters(lon_diff: f64, latitude: f64) -> f64 {
    lon_diff.to_radians() * latitude.to_radians().cos() * MEAN_EARTH_RADIUS
}
