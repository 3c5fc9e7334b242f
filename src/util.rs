use float_ord::FloatOrd;
use geo::{Area, BoundingRect, Coord, EuclideanLength, LineString, Polygon};
use geo_clipper::{Clipper, EndType, JoinType};
use imageproc::point::Point;

pub(crate) fn to_geo_poly(points: &[Coord<i32>]) -> Polygon<f32> {
    let points = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(points), vec![])
}

/// Length of the shorter side of the polygon's bounding box.
pub(crate) fn min_side(polygon: &Polygon<f32>) -> f32 {
    polygon
        .bounding_rect()
        .map(|rect| rect.width().min(rect.height()))
        .unwrap_or(0.0)
}

/// Moves every edge inwards by `A * (1 - r^2) / L`. Returns the largest
/// remaining piece, or `None` if nothing is left.
pub(crate) fn shrink(polygon: &Polygon<f32>, shrink_ratio: f32) -> Option<Polygon<f32>> {
    let perimeter = polygon.exterior().euclidean_length();
    if perimeter <= 0.0 {
        return None;
    }
    let distance = polygon.unsigned_area() * (1.0 - shrink_ratio * shrink_ratio) / perimeter;

    let shrunk = polygon.offset(
        -distance,
        JoinType::Round(0.25),
        EndType::ClosedPolygon,
        1.0,
    );

    shrunk
        .0
        .into_iter()
        .filter(|piece| piece.unsigned_area() > 0.0)
        .max_by_key(|piece| FloatOrd(piece.unsigned_area()))
}

/// Exterior ring as drawable pixel points: rounded, without the closing
/// vertex or repeated neighbours. `None` when fewer than three remain.
pub(crate) fn to_pixel_points(polygon: &Polygon<f32>) -> Option<Vec<Point<i32>>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(polygon.exterior().0.len());
    for coord in polygon.exterior().coords() {
        let point = Point::new(coord.x.round() as i32, coord.y.round() as i32);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    (points.len() >= 3).then_some(points)
}
