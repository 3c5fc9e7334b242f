//! Rasterizes annotations into the ground truth a detection network is
//! trained against.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use ndarray::Array3;
use tracing::instrument;

use crate::{
    util::{min_side, shrink, to_geo_poly, to_pixel_points},
    PolygonRecord,
};

#[derive(Debug, Clone, Copy)]
pub struct ScoreMapConfig {
    /// Fraction of the polygon kept after shrinking (DBNet's `r`).
    pub shrink_ratio: f32,
    /// Instances whose bounding box is thinner than this are masked out.
    pub min_text_size: f32,
}

impl Default for ScoreMapConfig {
    fn default() -> Self {
        Self {
            shrink_ratio: 0.4,
            min_text_size: 8.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreMaps {
    /// 255 inside the shrunk region of every readable instance.
    pub text: GrayImage,
    /// 0 over ignored or unusable instances, 255 elsewhere.
    pub mask: GrayImage,
}

impl ScoreMaps {
    #[instrument(level = "debug", skip(records))]
    pub fn render(
        records: &[PolygonRecord],
        width: u32,
        height: u32,
        config: &ScoreMapConfig,
    ) -> Self {
        let mut text = GrayImage::new(width, height);
        let mut mask = GrayImage::from_pixel(width, height, Luma([255]));

        for record in records {
            let polygon = to_geo_poly(record.points());
            if record.is_ignored() || min_side(&polygon) < config.min_text_size {
                fill(&mut mask, &polygon, 0);
                continue;
            }
            match shrink(&polygon, config.shrink_ratio) {
                Some(shrunk) => fill(&mut text, &shrunk, 255),
                None => {
                    log::trace!("Instance {:?} vanished when shrunk", record.transcription());
                    fill(&mut mask, &polygon, 0);
                }
            }
        }

        Self { text, mask }
    }

    /// Both maps stacked as `(2, height, width)` in `[0, 1]`, text first.
    pub fn to_array(&self) -> Array3<f32> {
        let (width, height) = self.text.dimensions();
        Array3::from_shape_fn(
            (2, height as usize, width as usize),
            |(channel, y, x)| {
                let map = if channel == 0 { &self.text } else { &self.mask };
                map.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
            },
        )
    }
}

fn fill(image: &mut GrayImage, polygon: &geo::Polygon<f32>, value: u8) {
    if let Some(points) = to_pixel_points(polygon) {
        draw_polygon_mut(image, &points, Luma([value]));
    }
}
