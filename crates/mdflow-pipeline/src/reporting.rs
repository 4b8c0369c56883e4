//! Reporting scheduler and the built-in reporters.
//!
//! Sampling intervals arrive in ps and are converted to step counts with the
//! resolved time step. A zero interval disables its channel outright: no
//! reporter is attached and no file is created.

use mdflow_core::{BoxVectors, IntegrationContext, Reporter, Result, State, Vec3};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Step counts derived from a stage's time and sampling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingPlan {
    pub total_steps: u64,
    /// Steps between trajectory frames, `None` when disabled
    pub trajectory_every: Option<u64>,
    /// Steps between state-log rows, `None` when disabled
    pub log_every: Option<u64>,
    /// Frames the trajectory will hold
    pub total_frames: u64,
}

impl ReportingPlan {
    pub fn new(time: f64, timestep: f64, trajectory_interval: f64, reporter_interval: f64) -> Self {
        let total_steps = steps_for(time, timestep);
        let trajectory_every = interval_steps(trajectory_interval, timestep);
        let total_frames = if trajectory_interval > 0.0 {
            (time / trajectory_interval).round() as u64
        } else {
            0
        };
        Self {
            total_steps,
            trajectory_every,
            log_every: interval_steps(reporter_interval, timestep),
            total_frames,
        }
    }
}

fn steps_for(time: f64, timestep: f64) -> u64 {
    (time / timestep).round().max(0.0) as u64
}

fn interval_steps(interval: f64, timestep: f64) -> Option<u64> {
    if interval > 0.0 {
        // an interval shorter than half a step still samples every step
        Some(steps_for(interval, timestep).max(1))
    } else {
        None
    }
}

/// Tab-separated scalar observables, one row per report.
pub struct StateDataReporter {
    path: PathBuf,
    interval: u64,
    out: BufWriter<File>,
}

impl StateDataReporter {
    pub const HEADER: &'static str =
        "#\"Step\"\t\"Potential Energy (kJ/mole)\"\t\"Total Energy (kJ/mole)\"\t\"Box Volume (nm^3)\"\t\"Density (g/mL)\"\t\"Temperature (K)\"";

    pub fn create(path: &Path, interval: u64) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{}", Self::HEADER)?;
        Ok(Self {
            path: path.to_path_buf(),
            interval,
            out,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter for StateDataReporter {
    fn name(&self) -> &str {
        "state-log"
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn report(&mut self, state: &State) -> Result<()> {
        let opt = |v: Option<f64>| v.map_or_else(|| "NaN".to_string(), |x| format!("{:.6}", x));
        writeln!(
            self.out,
            "{}\t{:.6}\t{:.6}\t{}\t{}\t{:.6}",
            state.step,
            state.potential_energy,
            state.total_energy(),
            opt(state.volume()),
            opt(state.density),
            state.temperature
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Progress lines through the `log` facade.
pub struct ProgressReporter {
    interval: u64,
    total_steps: u64,
    started: std::time::Instant,
}

impl ProgressReporter {
    pub fn new(interval: u64, total_steps: u64) -> Self {
        Self {
            interval,
            total_steps,
            started: std::time::Instant::now(),
        }
    }
}

impl Reporter for ProgressReporter {
    fn name(&self) -> &str {
        "progress"
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn report(&mut self, state: &State) -> Result<()> {
        let percent = if self.total_steps > 0 {
            100.0 * state.step as f64 / self.total_steps as f64
        } else {
            100.0
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        let ns_per_day = if elapsed > 0.0 {
            state.time * 1e-3 / elapsed * 86_400.0
        } else {
            0.0
        };
        log::info!(
            "step {}/{} ({:.1}%) t={:.3} ps T={:.1} K {:.2} ns/day",
            state.step,
            self.total_steps,
            percent,
            state.time,
            state.temperature,
            ns_per_day
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    step: u64,
    /// ps
    time: f64,
    /// nm
    positions: &'a [Vec3],
    box_vectors: Option<&'a BoxVectors>,
}

/// JSON-lines trajectory, one frame per line.
pub struct TrajectoryReporter {
    path: PathBuf,
    interval: u64,
    frames: u64,
    out: BufWriter<File>,
}

impl TrajectoryReporter {
    pub fn create(path: &Path, interval: u64) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            interval,
            frames: 0,
            out: BufWriter::new(File::create(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Reporter for TrajectoryReporter {
    fn name(&self) -> &str {
        "trajectory"
    }

    fn interval(&self) -> u64 {
        self.interval
    }

    fn report(&mut self, state: &State) -> Result<()> {
        let frame = Frame {
            step: state.step,
            time: state.time,
            positions: &state.positions,
            box_vectors: state.box_vectors.as_ref(),
        };
        serde_json::to_writer(&mut self.out, &frame)?;
        self.out.write_all(b"\n")?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        log::debug!("Wrote {} frames to {}", self.frames, self.path.display());
        Ok(())
    }
}

/// Drives a context and invokes reporters on schedule.
pub struct Simulation {
    context: Box<dyn IntegrationContext>,
    reporters: Vec<Box<dyn Reporter>>,
    steps_done: u64,
}

impl Simulation {
    pub fn new(context: Box<dyn IntegrationContext>) -> Self {
        Self {
            context,
            reporters: Vec::new(),
            steps_done: 0,
        }
    }

    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }

    pub fn context(&self) -> &dyn IntegrationContext {
        self.context.as_ref()
    }

    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    /// Integrates exactly `steps` steps, stopping at each reporting event.
    pub fn step(&mut self, steps: u64) -> Result<()> {
        let target = self.steps_done + steps;
        while self.steps_done < target {
            let next_event = self
                .reporters
                .iter()
                .map(|r| {
                    let every = r.interval().max(1);
                    self.steps_done + every - self.steps_done % every
                })
                .min()
                .unwrap_or(target)
                .min(target);

            self.context.step(next_event - self.steps_done)?;
            self.steps_done = next_event;

            let due: Vec<usize> = (0..self.reporters.len())
                .filter(|&i| self.steps_done % self.reporters[i].interval().max(1) == 0)
                .collect();
            if !due.is_empty() {
                let state = self.context.state()?;
                for i in due {
                    self.reporters[i].report(&state)?;
                }
            }
        }
        Ok(())
    }

    /// Flushes reporters and hands the context back.
    pub fn finish(mut self) -> Result<Box<dyn IntegrationContext>> {
        for r in self.reporters.iter_mut() {
            r.finish()?;
        }
        Ok(self.context)
    }
}
