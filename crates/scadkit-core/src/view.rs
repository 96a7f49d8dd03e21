//! Camera view resolution.
//!
//! Turns a [`ViewSelector`] (preset, named views, explicit `az:el` pairs or a
//! turntable) into an ordered list of [`ViewSpec`]s. All camera math lives
//! here so the three operation kinds share one notion of a view and output
//! labels stay deterministic.

use crate::error::{Result, ScadError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Elevation of the classic isometric eye direction (1, 1, 1).
pub const ISO_ELEVATION: f64 = 35.264;

/// Camera distance used when a view does not carry its own.
pub const DEFAULT_DISTANCE: f64 = 200.0;

/// Upper bound on turntable frames (a 0.1° step).
pub const MAX_TURNTABLE_FRAMES: usize = 3600;

/// Named view table: name -> (azimuth, elevation).
const NAMED_VIEWS: &[(&str, f64, f64)] = &[
    ("iso", 45.0, ISO_ELEVATION),
    ("iso_ne", 45.0, ISO_ELEVATION),
    ("iso_nw", 135.0, ISO_ELEVATION),
    ("iso_sw", 225.0, ISO_ELEVATION),
    ("iso_se", 315.0, ISO_ELEVATION),
    ("front", 270.0, 0.0),
    ("back", 90.0, 0.0),
    ("left", 180.0, 0.0),
    ("right", 0.0, 0.0),
    ("top", 0.0, 90.0),
    ("bottom", 0.0, -90.0),
];

/// Preset table. `standard` is not listed: it is the union of these.
const PRESETS: &[(&str, &[&str])] = &[
    ("single", &["iso"]),
    ("iso", &["iso_ne", "iso_nw", "iso_sw", "iso_se"]),
    ("ortho", &["front", "back", "left", "right", "top", "bottom"]),
];

const STANDARD_PRESET: &str = "standard";

/// A single resolved camera position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    /// Stable label used for output file naming.
    pub label: String,

    /// Degrees in `[0, 360)`.
    pub azimuth: f64,

    /// Degrees in `[-90, 90]`.
    pub elevation: f64,

    /// Camera distance from the origin; falls back to the render default.
    pub distance: Option<f64>,
}

impl ViewSpec {
    /// Create a view, wrapping azimuth and clamping elevation.
    pub fn new(label: impl Into<String>, azimuth: f64, elevation: f64) -> Self {
        Self {
            label: label.into(),
            azimuth: azimuth.rem_euclid(360.0),
            elevation: elevation.clamp(-90.0, 90.0),
            distance: None,
        }
    }

    /// Set an explicit camera distance.
    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    /// Eye position for this view, looking at the origin.
    pub fn eye(&self, default_distance: f64) -> [f64; 3] {
        let distance = self.distance.unwrap_or(default_distance);
        let az = self.azimuth.to_radians();
        let el = self.elevation.to_radians();
        [
            distance * el.cos() * az.cos(),
            distance * el.cos() * az.sin(),
            distance * el.sin(),
        ]
    }

    /// Six-value `eye,center` camera argument understood by the compiler.
    pub fn camera_arg(&self, default_distance: f64) -> String {
        let [x, y, z] = self.eye(default_distance);
        [x, y, z, 0.0, 0.0, 0.0]
            .iter()
            .map(|v| format_coord(*v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Format a coordinate with three decimals, normalising `-0.000`.
fn format_coord(v: f64) -> String {
    let s = format!("{v:.3}");
    if s == "-0.000" {
        "0.000".to_string()
    } else {
        s
    }
}

/// What the caller asked to look at.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewSelector {
    /// A preset name: `single`, `iso`, `ortho` or `standard`.
    Preset(String),

    /// Named views from the fixed table, in the given order.
    Views(Vec<String>),

    /// Raw comma-separated `az:el` list.
    Angles(String),

    /// Evenly spaced azimuths at a fixed elevation.
    Turntable {
        step: f64,
        elevation: f64,
        start_azimuth: f64,
    },
}

impl Default for ViewSelector {
    fn default() -> Self {
        ViewSelector::Preset("single".to_string())
    }
}

impl ViewSelector {
    /// Whether this selector produces rotation-sequence frames.
    pub fn is_turntable(&self) -> bool {
        matches!(self, ViewSelector::Turntable { .. })
    }

    /// Parse a comma-separated list of view names.
    pub fn views_from_list(list: &str) -> Self {
        ViewSelector::Views(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    }
}

/// Resolve a selector into an ordered list of views.
pub fn resolve(selector: &ViewSelector) -> Result<Vec<ViewSpec>> {
    let views = match selector {
        ViewSelector::Preset(name) => resolve_preset(name)?,
        ViewSelector::Views(names) => {
            let views = names
                .iter()
                .map(|n| named_view(n))
                .collect::<Result<Vec<_>>>()?;
            dedup_by_label(views)
        }
        ViewSelector::Angles(raw) => {
            let mut seen = HashSet::new();
            parse_angles(raw)?
                .into_iter()
                // `+ 0.0` folds -0 into 0
                .filter(|(az, el)| seen.insert(((az + 0.0).to_bits(), (el + 0.0).to_bits())))
                .map(|(az, el)| {
                    ViewSpec::new(
                        format!("az{}_el{}", label_from_value(az), label_from_value(el)),
                        az,
                        el,
                    )
                })
                .collect()
        }
        ViewSelector::Turntable {
            step,
            elevation,
            start_azimuth,
        } => turntable(*step, *elevation, *start_azimuth)?,
    };
    Ok(views)
}

/// Look up a single named view.
pub fn named_view(name: &str) -> Result<ViewSpec> {
    NAMED_VIEWS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(n, az, el)| ViewSpec::new(*n, *az, *el))
        .ok_or_else(|| ScadError::UnknownView {
            name: name.to_string(),
            available: view_names().join(", "),
        })
}

/// All named views, in table order.
pub fn view_names() -> Vec<&'static str> {
    NAMED_VIEWS.iter().map(|(n, _, _)| *n).collect()
}

/// All preset names, `standard` last.
pub fn preset_names() -> Vec<&'static str> {
    PRESETS
        .iter()
        .map(|(n, _)| *n)
        .chain(std::iter::once(STANDARD_PRESET))
        .collect()
}

/// Expand a preset into its views.
pub fn resolve_preset(name: &str) -> Result<Vec<ViewSpec>> {
    let names: Vec<&str> = if name == STANDARD_PRESET {
        let mut seen = HashSet::new();
        PRESETS
            .iter()
            .flat_map(|(_, views)| views.iter().copied())
            .filter(|v| seen.insert(*v))
            .collect()
    } else {
        PRESETS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, views)| views.to_vec())
            .ok_or_else(|| ScadError::UnknownView {
                name: name.to_string(),
                available: preset_names().join(", "),
            })?
    };
    names.into_iter().map(named_view).collect()
}

/// Parse a comma-separated list of `az:el` pairs.
///
/// Empty tokens are skipped; any other malformed token fails with the token
/// itself in the error.
pub fn parse_angles(raw: &str) -> Result<Vec<(f64, f64)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|token| {
            let invalid = || ScadError::InvalidAngleFormat {
                token: token.to_string(),
            };
            let (az, el) = token.split_once(':').ok_or_else(invalid)?;
            let az: f64 = az.trim().parse().map_err(|_| invalid())?;
            let el: f64 = el.trim().parse().map_err(|_| invalid())?;
            if !az.is_finite() || !el.is_finite() {
                return Err(invalid());
            }
            Ok((az, el))
        })
        .collect()
}

/// Build turntable frames: `ceil(360 / step)` azimuths starting at
/// `start_azimuth`, each labelled with a zero-padded frame index.
///
/// Steps yielding more than [`MAX_TURNTABLE_FRAMES`] frames are rejected.
pub fn turntable(step: f64, elevation: f64, start_azimuth: f64) -> Result<Vec<ViewSpec>> {
    if !step.is_finite() || step <= 0.0 || step > 360.0 {
        return Err(ScadError::InvalidTurntableStep { step });
    }
    // Guard against 360/step landing a hair above an integer.
    let frames = ((360.0 / step) - 1e-9).ceil().max(1.0);
    if frames > MAX_TURNTABLE_FRAMES as f64 {
        return Err(ScadError::InvalidTurntableStep { step });
    }
    let count = frames as usize;
    let width = (count - 1).to_string().len().max(3);

    Ok((0..count)
        .map(|i| {
            ViewSpec::new(
                format!("frame_{i:0width$}"),
                start_azimuth + i as f64 * step,
                elevation,
            )
        })
        .collect())
}

/// Filename-safe rendering of an angle: `22.5` -> `22p5`, `-10` -> `m10`.
///
/// Uses the shortest exact decimal form, so distinct values never share a
/// label.
pub fn label_from_value(value: f64) -> String {
    let sign = if value < 0.0 { "m" } else { "" };
    format!("{sign}{}", value.abs().to_string().replace('.', "p"))
}

fn dedup_by_label(views: Vec<ViewSpec>) -> Vec<ViewSpec> {
    let mut seen = HashSet::new();
    views
        .into_iter()
        .filter(|v| seen.insert(v.label.clone()))
        .collect()
}
