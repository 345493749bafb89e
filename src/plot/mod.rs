//! Declarative chart specifications for dose-response and titer plots.
//!
//! Charts are built as plain data ([`ChartSpec`]) so they can be inspected,
//! exported as JSON, or rendered to SVG with [`ChartSpec::render_svg`].

mod render;

use crate::data::{TiterResult, TiterResultSet};
use crate::error::Result;
use crate::model::FitMethod;
use crate::transform::{expit, ResponseCurve};
use serde::{Deserialize, Serialize};

/// Width of one facet in pixels.
pub const PANEL_WIDTH: u32 = 360;
/// Height of one facet in pixels.
pub const PANEL_HEIGHT: u32 = 300;
/// Maximum number of facets per row.
pub const MAX_COLUMNS: usize = 3;
/// Points sampled along a fitted curve.
const CURVE_SAMPLES: usize = 60;

/// An sRGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

pub const OBSERVED: Rgb = Rgb(31, 119, 180);
pub const FITTED: Rgb = Rgb(44, 160, 44);
pub const THRESHOLD: Rgb = Rgb(214, 39, 40);
pub const OUT_OF_RANGE: Rgb = Rgb(200, 200, 200);

/// One drawable element of a panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    /// Scatter of points.
    Points {
        label: String,
        data: Vec<(f64, f64)>,
        color: Rgb,
        size: u32,
    },
    /// Polyline through the points in order.
    Line {
        label: String,
        data: Vec<(f64, f64)>,
        color: Rgb,
        width: u32,
    },
    /// Horizontal rule across the panel.
    Rule { y: f64, color: Rgb, width: u32 },
}

impl Layer {
    /// Data extent of the layer, if it has any.
    fn bounds(&self) -> Option<((f64, f64), (f64, f64))> {
        match self {
            Layer::Points { data, .. } | Layer::Line { data, .. } => {
                let finite: Vec<&(f64, f64)> = data
                    .iter()
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .collect();
                if finite.is_empty() {
                    return None;
                }
                let extent = |values: Vec<f64>| {
                    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
                    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                    (lo, hi)
                };
                Some((
                    extent(finite.iter().map(|p| p.0).collect()),
                    extent(finite.iter().map(|p| p.1).collect()),
                ))
            }
            Layer::Rule { .. } => None,
        }
    }
}

/// A single facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    /// Names for integer x positions (categorical axis).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub x_categories: Vec<String>,
    pub layers: Vec<Layer>,
}

impl Panel {
    /// Create a panel whose ranges are fitted to its layers later.
    pub fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            x_range: (0.0, 1.0),
            y_range: (0.0, 1.0),
            x_categories: Vec::new(),
            layers: Vec::new(),
        }
    }

    /// Add a layer.
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Set the axis ranges to cover every layer, with padding.
    pub fn fit_ranges(mut self) -> Self {
        let mut x = (f64::INFINITY, f64::NEG_INFINITY);
        let mut y = (f64::INFINITY, f64::NEG_INFINITY);
        for layer in &self.layers {
            if let Some((lx, ly)) = layer.bounds() {
                x = (x.0.min(lx.0), x.1.max(lx.1));
                y = (y.0.min(ly.0), y.1.max(ly.1));
            }
            if let Layer::Rule { y: ry, .. } = layer {
                y = (y.0.min(*ry), y.1.max(*ry));
            }
        }
        if x.0.is_finite() {
            self.x_range = padded_range(x.0, x.1);
        }
        if y.0.is_finite() {
            self.y_range = padded_range(y.0, y.1);
        }
        self
    }
}

/// Pad a range by 10%, or by a fixed amount when it is degenerate.
pub fn padded_range(min: f64, max: f64) -> (f64, f64) {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let span = hi - lo;
    let pad = if span < 1e-6 { 0.5 } else { span * 0.1 };
    (lo - pad, hi + pad)
}

/// A complete chart: a grid of facets under one title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub columns: usize,
    pub panels: Vec<Panel>,
}

impl ChartSpec {
    /// Lay out panels in a grid of at most [`MAX_COLUMNS`] columns.
    pub fn grid(title: &str, panels: Vec<Panel>) -> Self {
        let columns = panels.len().clamp(1, MAX_COLUMNS);
        let rows = panels.len().div_ceil(columns).max(1);
        Self {
            title: title.to_string(),
            width: PANEL_WIDTH * columns as u32,
            height: PANEL_HEIGHT * rows as u32 + 40,
            columns,
            panels,
        }
    }

    /// Number of grid rows.
    pub fn rows(&self) -> usize {
        self.panels.len().div_ceil(self.columns.max(1)).max(1)
    }

    /// Export the specification itself as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn panel_title(result: &TiterResult) -> String {
    let mut title = result.sample_id.clone();
    if let Some(group) = &result.group {
        title.push_str(&format!(" ({})", group));
    }
    match result.log10_tcid50 {
        Some(t) if !result.outside_detection => title.push_str(&format!(": 10^{:.2}", t)),
        _ => title.push_str(&format!(": {}", result.status)),
    }
    title
}

/// One facet per sample: observations, fitted curve, and the 50% threshold.
///
/// Logit fits are drawn on the logit scale with a rule at 0; binomial fits on
/// the fraction scale with a rule at 0.5.
pub fn dose_response_chart(results: &TiterResultSet, curves: &[ResponseCurve]) -> ChartSpec {
    let logit_scale = results.method == FitMethod::Logit;
    let (y_label, rule) = if logit_scale {
        ("logit(CPE fraction)", 0.0)
    } else {
        ("CPE fraction", 0.5)
    };

    let panels = results
        .iter()
        .filter_map(|r| {
            let curve = curves.iter().find(|c| c.sample_id == r.sample_id)?;
            let observed: Vec<(f64, f64)> = if logit_scale {
                curve.log_dose.iter().copied().zip(curve.logit.iter().copied()).collect()
            } else {
                curve.log_dose.iter().copied().zip(curve.fraction.iter().copied()).collect()
            };

            let mut panel = Panel::new(&panel_title(r), "log10 dose (per mL)", y_label).layer(
                Layer::Points {
                    label: "observed".to_string(),
                    data: observed,
                    color: OBSERVED,
                    size: 4,
                },
            );

            if let (Some(a), Some(b)) = (r.intercept, r.slope) {
                let (lo, hi) = curve.log_dose_range();
                let (lo, hi) = (lo - 0.25, hi + 0.25);
                let step = (hi - lo) / (CURVE_SAMPLES - 1) as f64;
                let data = (0..CURVE_SAMPLES)
                    .map(|i| {
                        let x = lo + step * i as f64;
                        let eta = a + b * x;
                        (x, if logit_scale { eta } else { expit(eta) })
                    })
                    .collect();
                panel = panel.layer(Layer::Line {
                    label: "fit".to_string(),
                    data,
                    color: FITTED,
                    width: 2,
                });
            }

            Some(
                panel
                    .layer(Layer::Rule {
                        y: rule,
                        color: THRESHOLD,
                        width: 1,
                    })
                    .fit_ranges(),
            )
        })
        .collect();

    ChartSpec::grid("Dose response", panels)
}

/// log10 TCID50/mL per sample.
///
/// Samples outside the detection limits are drawn light gray at their chart
/// position; samples without any position are left out.
pub fn titer_chart(results: &TiterResultSet) -> ChartSpec {
    let mut within = Vec::new();
    let mut outside = Vec::new();
    for (i, r) in results.iter().enumerate() {
        let y = match r.plot_titer_per_ml {
            Some(v) if v > 0.0 => v.log10(),
            _ => continue,
        };
        if r.outside_detection {
            outside.push((i as f64, y));
        } else {
            within.push((i as f64, y));
        }
    }

    let mut panel = Panel::new("", "sample", "log10 TCID50/mL")
        .layer(Layer::Points {
            label: "within range".to_string(),
            data: within,
            color: OBSERVED,
            size: 5,
        })
        .layer(Layer::Points {
            label: "outside detection".to_string(),
            data: outside,
            color: OUT_OF_RANGE,
            size: 5,
        })
        .fit_ranges();
    panel.x_range = (-0.5, results.len().max(1) as f64 - 0.5);
    panel.x_categories = results.iter().map(|r| r.sample_id.clone()).collect();

    let mut chart = ChartSpec::grid("TCID50/mL", vec![panel]);
    chart.width = PANEL_WIDTH.max(80 * results.len() as u32);
    chart
}
