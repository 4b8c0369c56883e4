//! Plain value types shared across the workspace.

use crate::errors::MdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cartesian triple. Engine units are nm (positions) and nm/ps (velocities).
pub type Vec3 = [f64; 3];

/// Periodic box, three row vectors in nm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxVectors(pub [Vec3; 3]);

impl BoxVectors {
    /// Rectangular box with edge lengths `a`, `b`, `c`.
    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Self {
        BoxVectors([[a, 0.0, 0.0], [0.0, b, 0.0], [0.0, 0.0, c]])
    }

    /// Diagonal edge lengths.
    pub fn lengths(&self) -> Vec3 {
        [self.0[0][0], self.0[1][1], self.0[2][2]]
    }

    /// Box volume in nm³ (triple product, so triclinic boxes are fine).
    pub fn volume(&self) -> f64 {
        let [a, b, c] = self.0;
        let cross = [
            b[1] * c[2] - b[2] * c[1],
            b[2] * c[0] - b[0] * c[2],
            b[0] * c[1] - b[1] * c[0],
        ];
        (a[0] * cross[0] + a[1] * cross[1] + a[2] * cross[2]).abs()
    }

    /// Geometric centre of the box.
    pub fn center(&self) -> Vec3 {
        let l = self.lengths();
        [l[0] / 2.0, l[1] / 2.0, l[2] / 2.0]
    }

    /// Returns a copy with every vector scaled by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        let mut out = self.0;
        for v in out.iter_mut() {
            for x in v.iter_mut() {
                *x *= factor;
            }
        }
        BoxVectors(out)
    }

    /// Whether the box is in reduced form: `a` along x, `b` in the xy
    /// plane, positive diagonal, and each off-diagonal no longer than half
    /// the diagonal element it is reduced against.
    pub fn is_reduced_form(&self) -> bool {
        let [a, b, c] = self.0;
        a[1] == 0.0
            && a[2] == 0.0
            && b[2] == 0.0
            && a[0] > 0.0
            && b[1] > 0.0
            && c[2] > 0.0
            && b[0].abs() <= 0.5 * a[0]
            && c[0].abs() <= 0.5 * a[0]
            && c[1].abs() <= 0.5 * b[1]
    }

    /// Shifts `d` by whole box vectors, `c` first, then `b`, then `a`.
    /// Works for rectangular and reduced-form triclinic boxes.
    fn reduce(&self, mut d: Vec3, shift: impl Fn(f64) -> f64) -> Vec3 {
        for k in (0..3).rev() {
            let v = self.0[k];
            if v[k] > 0.0 {
                let n = shift(d[k] / v[k]);
                if n != 0.0 {
                    for (dx, vx) in d.iter_mut().zip(v) {
                        *dx -= n * vx;
                    }
                }
            }
        }
        d
    }

    /// Minimum-image displacement `b - a`.
    pub fn minimum_image(&self, a: &Vec3, b: &Vec3) -> Vec3 {
        self.reduce([b[0] - a[0], b[1] - a[1], b[2] - a[2]], f64::round)
    }

    /// Image of `p` inside the primary cell.
    pub fn wrap(&self, p: &Vec3) -> Vec3 {
        self.reduce(*p, f64::floor)
    }
}

/// The three stages this crate knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    #[serde(rename = "min", alias = "minimize")]
    Minimize,
    #[serde(rename = "nvt")]
    Nvt,
    #[serde(rename = "npt")]
    Npt,
}

impl StageKind {
    /// Whether the stage integrates dynamics (as opposed to minimizing).
    pub fn is_dynamics(&self) -> bool {
        matches!(self, StageKind::Nvt | StageKind::Npt)
    }

    /// Default output suffix for this stage.
    pub fn suffix(&self) -> &'static str {
        match self {
            StageKind::Minimize => "min",
            StageKind::Nvt => "nvt",
            StageKind::Npt => "npt",
        }
    }

    /// Name under which the stage is recorded in a run history.
    pub fn stage_name(&self) -> StageName {
        match self {
            StageKind::Minimize => StageName::Minimization,
            StageKind::Nvt => StageName::Nvt,
            StageKind::Npt => StageName::Npt,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for StageKind {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min" | "minimize" | "minimization" => Ok(StageKind::Minimize),
            "nvt" => Ok(StageKind::Nvt),
            "npt" => Ok(StageKind::Npt),
            other => Err(MdError::config(format!("unknown stage '{}'", other))),
        }
    }
}

/// Run-level stage names, including the externally produced bookends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Setup,
    Minimization,
    Nvt,
    Npt,
    Fec,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageName::Setup => "SETUP",
            StageName::Minimization => "MINIMIZATION",
            StageName::Nvt => "NVT",
            StageName::Npt => "NPT",
            StageName::Fec => "FEC",
        };
        f.write_str(s)
    }
}

/// Compute back-ends, in `Auto` fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "CUDA")]
    Cuda,
    #[serde(rename = "OpenCL")]
    OpenCl,
    #[serde(rename = "CPU")]
    Cpu,
    Reference,
}

impl BackendKind {
    /// Order in which `Auto` tries back-ends.
    pub const FALLBACK_ORDER: [BackendKind; 4] = [
        BackendKind::Cuda,
        BackendKind::OpenCl,
        BackendKind::Cpu,
        BackendKind::Reference,
    ];

    /// GPU-class back-ends take a precision mode and a device index.
    pub fn is_gpu(&self) -> bool {
        matches!(self, BackendKind::Cuda | BackendKind::OpenCl)
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Cuda => "CUDA",
            BackendKind::OpenCl => "OpenCL",
            BackendKind::Cpu => "CPU",
            BackendKind::Reference => "Reference",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" => Ok(BackendKind::Cuda),
            "opencl" => Ok(BackendKind::OpenCl),
            "cpu" => Ok(BackendKind::Cpu),
            "reference" => Ok(BackendKind::Reference),
            other => Err(MdError::config(format!("unknown platform '{}'", other))),
        }
    }
}

/// Requested back-end: a specific one, or whatever instantiates first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlatformPreference {
    #[default]
    Auto,
    Backend(BackendKind),
}

impl FromStr for PlatformPreference {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            Ok(PlatformPreference::Auto)
        } else {
            s.parse().map(PlatformPreference::Backend)
        }
    }
}

impl TryFrom<String> for PlatformPreference {
    type Error = MdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PlatformPreference> for String {
    fn from(value: PlatformPreference) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PlatformPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformPreference::Auto => f.write_str("Auto"),
            PlatformPreference::Backend(kind) => kind.fmt(f),
        }
    }
}

/// Floating-point mode of GPU-class back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Mixed,
    #[default]
    Single,
    Double,
}

impl Precision {
    /// Order in which `Auto` tries precision modes.
    pub const AUTO_ORDER: [Precision; 3] = [Precision::Mixed, Precision::Single, Precision::Double];

    pub fn name(&self) -> &'static str {
        match self {
            Precision::Mixed => "mixed",
            Precision::Single => "single",
            Precision::Double => "double",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Precision {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mixed" => Ok(Precision::Mixed),
            "single" => Ok(Precision::Single),
            "double" => Ok(Precision::Double),
            other => Err(MdError::config(format!("unknown precision '{}'", other))),
        }
    }
}

/// Non-bonded treatment requested for periodic systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NonbondedMethod {
    NoCutoff,
    CutoffNonPeriodic,
    CutoffPeriodic,
    #[default]
    #[serde(rename = "PME")]
    Pme,
    Ewald,
}

impl NonbondedMethod {
    /// Methods that need a periodic box.
    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            NonbondedMethod::CutoffPeriodic | NonbondedMethod::Pme | NonbondedMethod::Ewald
        )
    }

    pub fn uses_cutoff(&self) -> bool {
        !matches!(self, NonbondedMethod::NoCutoff)
    }
}

impl fmt::Display for NonbondedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NonbondedMethod::NoCutoff => "NoCutoff",
            NonbondedMethod::CutoffNonPeriodic => "CutoffNonPeriodic",
            NonbondedMethod::CutoffPeriodic => "CutoffPeriodic",
            NonbondedMethod::Pme => "PME",
            NonbondedMethod::Ewald => "Ewald",
        };
        f.write_str(s)
    }
}

/// Which bond lengths are held fixed during dynamics and minimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Constraints {
    None,
    /// Bonds that involve a hydrogen.
    #[default]
    HBonds,
    /// Every bond, plus H-X-H and H-O-X angles.
    HAngles,
    AllBonds,
}

impl Constraints {
    pub fn name(&self) -> &'static str {
        match self {
            Constraints::None => "None",
            Constraints::HBonds => "HBonds",
            Constraints::HAngles => "HAngles",
            Constraints::AllBonds => "AllBonds",
        }
    }
}

impl fmt::Display for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Constraints {
    type Err = MdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Constraints::None),
            "hbonds" => Ok(Constraints::HBonds),
            "hangles" => Ok(Constraints::HAngles),
            "allbonds" => Ok(Constraints::AllBonds),
            other => Err(MdError::config(format!("unknown constraints '{}'", other))),
        }
    }
}
