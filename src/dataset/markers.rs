//! Reference marker geometry of the tracked object.
//!
//! The sequence configuration scripts declare the marker positions and the
//! platform origin in motion-capture coordinates:
//!
//! ```text
//! seq.ReferencePoints = [[x; y; z]
//!                        [x; y; z]
//!                        ...
//!                        [x; y; z]];
//! seq.Origin = [x; y; z];
//! ```
//!
//! The model keeps the markers relative to the origin, i.e. expressed in
//! the object-local frame.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use nalgebra::Vector3;

use crate::geometry::MIN_CORRESPONDENCES;

const REFERENCE_POINTS_KEY: &str = "seq.ReferencePoints";
const ORIGIN_KEY: &str = "seq.Origin";

/// Ordered marker positions in the object-local frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerModel {
    points: Vec<Vector3<f64>>,
}

impl MarkerModel {
    /// Fails if there are too few markers to fit a rigid pose.
    pub fn new(points: Vec<Vector3<f64>>) -> Result<Self> {
        if points.len() < MIN_CORRESPONDENCES {
            bail!(
                "marker model needs at least {} points, got {}",
                MIN_CORRESPONDENCES,
                points.len()
            );
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Anything able to produce the reference marker model.
pub trait MarkerModelProvider {
    fn load_markers(&self) -> Result<MarkerModel>;
}

/// Reads markers from a sequence configuration script.
#[derive(Debug, Clone)]
pub struct MarkerScript<'a> {
    path: &'a Path,
}

impl<'a> MarkerScript<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path }
    }
}

impl MarkerModelProvider for MarkerScript<'_> {
    fn load_markers(&self) -> Result<MarkerModel> {
        let text = fs::read_to_string(self.path)
            .with_context(|| format!("Failed to open configuration file {:?}", self.path))?;
        parse_marker_script(&text)
            .with_context(|| format!("Failed to parse configuration file {:?}", self.path))
    }
}

/// Parse reference points and origin from a configuration script.
pub fn parse_marker_script(text: &str) -> Result<MarkerModel> {
    let code = strip_comments(text);

    let Some(refs_at) = code.find(REFERENCE_POINTS_KEY) else {
        bail!("no {} statement", REFERENCE_POINTS_KEY);
    };
    let refs_body = bracketed(&code[refs_at..], "[[", "]]")
        .with_context(|| format!("unterminated {} matrix", REFERENCE_POINTS_KEY))?;

    let mut points = Vec::new();
    let mut rest = refs_body;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            bail!("unterminated reference point");
        };
        points.push(parse_point(&rest[open + 1..open + close])?);
        rest = &rest[open + close + 1..];
    }

    let origin = match code.find(ORIGIN_KEY) {
        Some(at) => {
            let body = bracketed(&code[at..], "[", "]")
                .with_context(|| format!("unterminated {} vector", ORIGIN_KEY))?;
            parse_point(body)?
        }
        None => Vector3::zeros(),
    };

    MarkerModel::new(points.into_iter().map(|p| p - origin).collect())
}

/// Drop blank lines and `%` comments, keeping line structure.
fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| match line.find('%') {
            Some(at) => &line[..at],
            None => line,
        })
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text strictly between the first `open` and the following `close`,
/// keeping the inner bracket of `[[`.
fn bracketed<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = start + text[start..].find(close)?;
    if open.len() > 1 {
        // "[[a] [b]]" -> "[a] [b]"
        Some(&text[start - 1..end + 1])
    } else {
        Some(&text[start..end])
    }
}

fn parse_point(text: &str) -> Result<Vector3<f64>> {
    let values = text
        .split(|c: char| c == ';' || c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("invalid coordinate {:?}", s))
        })
        .collect::<Result<Vec<_>>>()?;
    if values.len() != 3 {
        bail!("expected 3 coordinates, got {} in {:?}", values.len(), text.trim());
    }
    Ok(Vector3::new(values[0], values[1], values[2]))
}
