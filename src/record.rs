use std::fmt;

use geo::{BoundingRect, Coord, LineString, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Transcription marking a region that must be excluded from scoring.
pub const IGNORE_TEXT: &str = "###";

/// Fewest vertices a text region may have.
pub const MIN_POINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    #[serde(rename = "c")]
    Curved,
    #[serde(rename = "h")]
    Horizontal,
    #[serde(rename = "#")]
    Ignore,
}

impl Orientation {
    pub fn as_char(self) -> char {
        match self {
            Orientation::Curved => 'c',
            Orientation::Horizontal => 'h',
            Orientation::Ignore => '#',
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One annotated text instance.
///
/// `points` is the open vertex chain; the polygon it describes is always
/// closed, see [`PolygonRecord::polygon`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord", into = "RawRecord")]
pub struct PolygonRecord {
    points: Vec<Coord<i32>>,
    orientation: Orientation,
    transcription: String,
}

impl PolygonRecord {
    /// Builds a record from the orientation the region's shape implies.
    /// An [`IGNORE_TEXT`] transcription always wins over `shape`.
    pub fn new(
        points: Vec<Coord<i32>>,
        shape: Orientation,
        transcription: impl Into<String>,
    ) -> Self {
        let transcription = transcription.into();
        let orientation = if transcription == IGNORE_TEXT {
            Orientation::Ignore
        } else {
            shape
        };
        Self {
            points,
            orientation,
            transcription,
        }
    }

    pub fn points(&self) -> &[Coord<i32>] {
        &self.points
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn transcription(&self) -> &str {
        &self.transcription
    }

    pub fn is_ignored(&self) -> bool {
        self.orientation == Orientation::Ignore
    }

    /// The closed polygon; the exterior ring repeats the first vertex.
    pub fn polygon(&self) -> Polygon<i32> {
        Polygon::new(LineString::new(self.points.clone()), vec![])
    }

    /// Vertices as a `(k, 2)` array of `(x, y)` rows.
    pub fn to_array(&self) -> Array2<i32> {
        Array2::from_shape_fn((self.points.len(), 2), |(row, col)| {
            let point = self.points[row];
            if col == 0 {
                point.x
            } else {
                point.y
            }
        })
    }

    pub fn bounding_rect(&self) -> Option<Rect<i32>> {
        LineString::new(self.points.clone()).bounding_rect()
    }

    /// Whether every vertex is a valid pixel index of a `width` x `height`
    /// image.
    pub fn within_bounds(&self, width: u32, height: u32) -> bool {
        self.points.iter().all(|point| {
            point.x >= 0
                && point.y >= 0
                && (point.x as i64) < width as i64
                && (point.y as i64) < height as i64
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecord {
    points: Vec<[i32; 2]>,
    orientation: Orientation,
    transcription: String,
}

impl TryFrom<RawRecord> for PolygonRecord {
    type Error = String;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        if raw.points.len() < MIN_POINTS {
            return Err(format!(
                "expected at least {MIN_POINTS} points, got {}",
                raw.points.len()
            ));
        }
        if raw.transcription == IGNORE_TEXT && raw.orientation != Orientation::Ignore {
            return Err(format!(
                "transcription {IGNORE_TEXT:?} must be tagged '#', got '{}'",
                raw.orientation
            ));
        }
        Ok(Self {
            points: raw
                .points
                .into_iter()
                .map(|[x, y]| Coord { x, y })
                .collect(),
            orientation: raw.orientation,
            transcription: raw.transcription,
        })
    }
}

impl From<PolygonRecord> for RawRecord {
    fn from(record: PolygonRecord) -> Self {
        Self {
            points: record.points.iter().map(|p| [p.x, p.y]).collect(),
            orientation: record.orientation,
            transcription: record.transcription,
        }
    }
}
