// src/output.rs
use crate::mc::ensemble::EnsembleResult;
use crate::trajectory::Trajectory;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// One row per output point: `time,x0,x1,...`
pub fn write_trajectory_to_csv<P: AsRef<Path>>(filename: P, trajectory: &Trajectory) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(filename)?);
    let variables = trajectory.states.first().map_or(0, |s| s.len());
    write!(file, "time")?;
    for i in 0..variables {
        write!(file, ",x{}", i)?;
    }
    writeln!(file)?;

    for (time, state) in trajectory.times.iter().zip(&trajectory.states) {
        write!(file, "{}", time)?;
        for value in state.iter() {
            write!(file, ",{}", value)?;
        }
        writeln!(file)?;
    }
    file.flush()
}

/// One row per fired event: `time,roots,confidence`
pub fn write_events_to_csv<P: AsRef<Path>>(filename: P, trajectory: &Trajectory) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(filename)?);
    writeln!(file, "time,roots,confidence")?;
    for event in &trajectory.events {
        let roots: Vec<String> = event.roots.iter().map(|r| r.to_string()).collect();
        writeln!(file, "{},{},{:?}", event.time, roots.join(";"), event.confidence)?;
    }
    file.flush()
}

/// One row per trajectory: `path_id,seed,events,x0,x1,...`
pub fn write_ensemble_to_csv<P: AsRef<Path>>(filename: P, result: &EnsembleResult) -> io::Result<()> {
    let mut file = BufWriter::new(File::create(filename)?);
    let variables = result.statistics.mean.len();
    write!(file, "path_id,seed,events")?;
    for i in 0..variables {
        write!(file, ",x{}", i)?;
    }
    writeln!(file)?;

    for (i, path) in result.trajectories.iter().enumerate() {
        write!(file, "{},{},{}", i, path.seed, path.events)?;
        for value in path.final_state.iter() {
            write!(file, ",{}", value)?;
        }
        writeln!(file)?;
    }
    file.flush()
}

pub fn write_summary_to_csv<P: AsRef<Path>>(filename: P, summary_data: &[(&str, String)]) -> io::Result<()> {
    let mut file = File::create(filename)?;
    for (key, value) in summary_data {
        writeln!(file, "{},{}", key, value)?;
    }
    Ok(())
}
