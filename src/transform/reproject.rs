//! Nearest-neighbour reprojection of a source raster onto a requested canvas.
//!
//! Every target pixel centre is unprojected to lon/lat, then all points are
//! resolved against the source in a single batch so the source can fetch
//! each of its tiles once. Projection work runs on the blocking pool.

use super::georeferenced::{BoundingBox, Georeference, GeoreferencedRaster, LonLat};
use super::mosaic::PixelSource;
use crate::crs::ProjectionRegistry;
use crate::error::Result;
use crate::raster::ArrayRaster;
use serde::{Deserialize, Serialize};

/// A map image request: canvas size, extent and target CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRequest {
    pub width: usize,
    pub height: usize,

    /// Extent in the target CRS's native units
    pub bbox: BoundingBox,

    /// Target CRS code (e.g., "EPSG:32661")
    pub crs: String,
}

impl MapRequest {
    pub fn new(width: usize, height: usize, bbox: BoundingBox, crs: impl Into<String>) -> Self {
        Self {
            width,
            height,
            bbox,
            crs: crs.into(),
        }
    }

    pub fn num_pixels(&self) -> usize {
        self.width * self.height
    }
}

/// Render `request` from `source`.
///
/// Target pixels whose centre has no source pixel (outside the source's
/// bounding box or not projectable) are left as `0`.
pub async fn render_map<P: PixelSource>(
    request: &MapRequest,
    source: &GeoreferencedRaster<P>,
    registry: &ProjectionRegistry,
) -> Result<ArrayRaster> {
    let projection = registry.get(&request.crs)?;
    let target = Georeference::new(request.width, request.height, request.bbox, projection);

    let points = tokio::task::spawn_blocking(move || {
        target
            .lon_lat_sequence()
            .map(Result::ok)
            .collect::<Vec<Option<LonLat>>>()
    })
    .await?;
    let values = source.nearest_pixels(&points).await?;

    tracing::debug!(
        "Rendered {}x{} in {} from {} points",
        request.width,
        request.height,
        request.crs,
        points.len()
    );

    ArrayRaster::from_pixels(
        request.width,
        request.height,
        values.into_iter().map(|v| v.unwrap_or(0)).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::codes;
    use crate::error::Error;
    use crate::raster::{Argb, Raster};

    /// 4x2 world raster, one value per quadrant-ish column.
    fn world_source() -> GeoreferencedRaster<ArrayRaster> {
        let pixels: Vec<Argb> = (1..=8).collect();
        GeoreferencedRaster::world(ArrayRaster::from_pixels(4, 2, pixels).unwrap())
    }

    #[tokio::test]
    async fn test_identity_render() {
        let source = world_source();
        let registry = ProjectionRegistry::default();
        let request = MapRequest::new(4, 2, BoundingBox::world(), codes::CRS84);

        let image = render_map(&request, &source, &registry).await.unwrap();
        assert_eq!(image.as_slice(), source.source().as_slice());
    }

    #[tokio::test]
    async fn test_crop_and_upsample() {
        let source = world_source();
        let registry = ProjectionRegistry::default();
        // North-east quadrant at 4x the source resolution
        let bbox = BoundingBox::new(0.0, 0.0, 180.0, 90.0).unwrap();
        let request = MapRequest::new(4, 2, bbox, codes::WGS84);

        let image = render_map(&request, &source, &registry).await.unwrap();
        assert_eq!(image.as_slice(), &[3, 3, 4, 4, 3, 3, 4, 4]);
    }

    #[tokio::test]
    async fn test_outside_source_is_zero() {
        let small = ArrayRaster::from_pixels(1, 1, vec![9]).unwrap();
        let source = GeoreferencedRaster::new(
            small,
            BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap(),
            std::sync::Arc::new(crate::crs::Projection::lon_lat()),
        );
        let registry = ProjectionRegistry::default();
        let request = MapRequest::new(2, 1, BoundingBox::new(-10.0, 0.0, 10.0, 10.0).unwrap(), codes::CRS84);

        let image = render_map(&request, &source, &registry).await.unwrap();
        assert_eq!(image.pixel(0, 0).unwrap(), 0);
        assert_eq!(image.pixel(1, 0).unwrap(), 9);
    }

    #[tokio::test]
    async fn test_polar_render() {
        let source = world_source();
        let registry = ProjectionRegistry::default();
        let bbox = BoundingBox::new(0.0, 0.0, 4_000_000.0, 4_000_000.0).unwrap();
        let request = MapRequest::new(8, 8, bbox, codes::UPS_NORTH);

        let image = render_map(&request, &source, &registry).await.unwrap();
        // Every pixel of the polar cap comes from the northern source row
        assert!(image.as_slice().iter().all(|&v| (1..=4).contains(&v)));
    }

    #[tokio::test]
    async fn test_unknown_crs() {
        let source = world_source();
        let registry = ProjectionRegistry::default();
        let request = MapRequest::new(2, 2, BoundingBox::world(), "EPSG:3857");
        assert!(matches!(
            render_map(&request, &source, &registry).await,
            Err(Error::UnsupportedCrs(_))
        ));
    }
}
