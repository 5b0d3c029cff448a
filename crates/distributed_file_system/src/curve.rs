//! Piecewise-constant functions of simulated time.

use serde::{Deserialize, Serialize};

/// One step of a [Curve]: the curve takes `value` from `time` until the next step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub time: f64,
    pub value: f64,
}

/// Value that changes over simulated time, e.g. link bandwidth or storage speed.
///
/// In configs a curve is either a plain number or a list of `{time, value}` steps, steps may come in any order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "RawCurve")]
pub enum Curve {
    Constant(f64),
    Steps(Vec<CurvePoint>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCurve {
    Constant(f64),
    Steps(Vec<CurvePoint>),
}

impl From<RawCurve> for Curve {
    fn from(raw: RawCurve) -> Self {
        match raw {
            RawCurve::Constant(value) => Curve::Constant(value),
            RawCurve::Steps(points) => Curve::steps(points.into_iter().map(|point| (point.time, point.value))),
        }
    }
}

impl Curve {
    /// Builds a step curve, sorting points by time.
    pub fn steps(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut points = points
            .into_iter()
            .map(|(time, value)| CurvePoint { time, value })
            .collect::<Vec<_>>();
        points.sort_by(|a, b| a.time.total_cmp(&b.time));
        Curve::Steps(points)
    }

    /// Value at `time`. Before the first step the first step's value is used, an empty curve is zero.
    pub fn value_at(&self, time: f64) -> f64 {
        match self {
            Curve::Constant(value) => *value,
            Curve::Steps(points) => {
                let idx = points.partition_point(|point| point.time <= time);
                match idx {
                    0 => points.first().map(|point| point.value).unwrap_or(0.),
                    _ => points[idx - 1].value,
                }
            }
        }
    }

    /// Multiplies every value by `factor`.
    pub fn scaled(&self, factor: f64) -> Curve {
        match self {
            Curve::Constant(value) => Curve::Constant(value * factor),
            Curve::Steps(points) => Curve::Steps(
                points
                    .iter()
                    .map(|point| CurvePoint {
                        time: point.time,
                        value: point.value * factor,
                    })
                    .collect(),
            ),
        }
    }

    pub fn points(&self) -> Vec<CurvePoint> {
        match self {
            Curve::Constant(value) => vec![CurvePoint { time: 0., value: *value }],
            Curve::Steps(points) => points.clone(),
        }
    }
}

impl From<f64> for Curve {
    fn from(value: f64) -> Self {
        Curve::Constant(value)
    }
}

impl Default for Curve {
    fn default() -> Self {
        Curve::Constant(0.)
    }
}
