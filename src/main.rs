use anyhow::{Context, Result};
use clap::Parser;
use influenza_sim::{frame_channel, spawn_presenter, FocusId, FrameSink, InfluenzaSimulation};
use log::{debug, error, info, trace};
use rayon::prelude::*;
use simulation_common::{OutputConfig, SimulationConfig, Snapshot};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// Command-line arguments for the simulation engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config.toml file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of independent runs (overrides general.number_of_runs)
    #[arg(short, long)]
    runs: Option<u32>,

    /// Base RNG seed; run N uses seed + N (overrides general.seed)
    #[arg(short, long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    let args = Args::parse();
    info!("Starting Influenza Simulation Engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)
        .with_context(|| format!("Could not load configuration from '{}'", args.config.display()))?;
    if let Some(runs) = args.runs {
        config.general.number_of_runs = runs;
    }
    if args.seed.is_some() {
        config.general.seed = args.seed;
    }
    config.validate()?;

    let params = config.get_sim_params();
    debug!("Simulation Parameters: {:#?}", params);
    info!(
        "{} run(s) of {} timesteps on {} Rayon threads.",
        config.general.number_of_runs,
        config.general.run_time,
        rayon::current_num_threads()
    );

    // --- Presentation (optional) ---
    let (sink, presenter) = if config.output.presentation_enabled {
        let (sink, receiver) = frame_channel(config.output.frame_queue_capacity);
        let handle = spawn_presenter(receiver).context("Failed to spawn presentation thread")?;
        (Some(sink), Some(handle))
    } else {
        (None, None)
    };

    // --- Runs ---
    let start_time = Instant::now();
    let results: Vec<Result<()>> = (0..config.general.number_of_runs)
        .into_par_iter()
        .map(|run| execute_run(&config, run, sink.as_ref()))
        .collect();

    let dropped = sink.as_ref().map(FrameSink::dropped).unwrap_or(0);
    drop(sink);
    if let Some(handle) = presenter {
        match handle.join() {
            Ok(stats) => info!(
                "Presenter received {} frames ({} merges), {} frames dropped.",
                stats.frames, stats.merges, dropped
            ),
            Err(_) => error!("Presentation thread panicked."),
        }
    }

    let mut failed = 0;
    for (run, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            error!("Run {} failed: {:#}", run, e);
            failed += 1;
        }
    }

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    if failed > 0 {
        anyhow::bail!("{} of {} runs failed.", failed, config.general.number_of_runs);
    }
    info!("Simulation Complete.");
    Ok(())
}

/// Runs one simulation to completion and saves its statistics.
fn execute_run(config: &SimulationConfig, run: u32, sink: Option<&FrameSink>) -> Result<()> {
    let params = config.get_sim_params();
    let seed = config.general.seed.map(|s| s.wrapping_add(u64::from(run)));
    let mut sim = InfluenzaSimulation::new(params, seed)
        .with_context(|| format!("Failed to initialise run {}", run))?;
    let run_time = config.general.run_time;
    let record_interval = config.output.record_interval.max(1);

    let world = sim.params().world;
    info!(
        "Run {}: starting {} timesteps on a {}x{} {} grid (seed {:?}).",
        run,
        run_time,
        world.grid_width,
        world.grid_height,
        if world.is_toroidal { "toroidal" } else { "bounded" },
        seed
    );
    let start_time = Instant::now();

    // --- Initial Snapshot (time = 0) ---
    sim.record_snapshot();

    for step in 0..=run_time {
        let step_start_time = Instant::now();
        sim.step().with_context(|| format!("Run {} failed at timestep {}", run, step))?;
        let step_duration = step_start_time.elapsed();
        let snapshot = sim.record_snapshot().clone();

        let merges = sim.drain_merges();
        if let Some(sink) = sink {
            let merged: Vec<(FocusId, FocusId)> =
                merges.iter().map(|m| (m.focus_id, m.colliding_focus_id)).collect();
            let mut frame = sim.frame(run);
            frame.merges = merges;
            if !sink.offer(frame) && !merged.is_empty() {
                debug!("Run {} t={}: frame dropped, merges (focus, with): {:?}", run, snapshot.time, merged);
            }
        } else if config.focus_system.debug_text_enabled && !merges.is_empty() {
            debug!("Run {} t={}: {} focus merge(s) detected.", run, snapshot.time, merges.len());
        }

        if config.general.debug_text_enabled {
            debug!(
                "Run {} t={}: healthy {} containing {} expressing {} infectious {} dead {} | virgin {} mature {}",
                run,
                snapshot.time,
                snapshot.healthy,
                snapshot.containing,
                snapshot.expressing,
                snapshot.infectious,
                snapshot.dead,
                snapshot.virgin_immune,
                snapshot.mature_immune
            );
        }

        let is_record_step = (step + 1) % record_interval == 0;
        let is_last_step = step == run_time;
        if is_record_step || is_last_step {
            info!(
                "Run {} Step [{}/{}] | Infected: {} | Dead: {} | Immune: {} | Avg foci area: {:.2} | Elapsed: {:.2} s",
                run,
                step + 1,
                run_time + 1,
                snapshot.infected(),
                snapshot.dead,
                snapshot.immune_total(),
                snapshot.avg_foci_area,
                start_time.elapsed().as_secs_f64()
            );
        } else {
            trace!(
                "Run {} Step [{}/{}] completed in {:.2} ms",
                run,
                step + 1,
                run_time + 1,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    sim.report_usable_foci(run);

    // --- Save Recorded Data ---
    if config.output.save_stats {
        save_snapshots(&config.output, run, sim.get_recorded_snapshots())?;
    } else {
        info!("Run {}: skipping saving snapshots as per config (save_stats is false).", run);
    }
    if config.output.save_csv {
        save_csv(&config.output, run, sim.get_recorded_snapshots())?;
    }
    Ok(())
}

fn save_snapshots(output: &OutputConfig, run: u32, snapshots: &[Snapshot]) -> Result<()> {
    let output_format = output.format.as_deref().unwrap_or("json");
    let base = format!("{}_run{}_stats", output.base_filename, run);

    match output_format {
        "json" => save_json(&format!("{}.json", base), snapshots),
        "bincode" => {
            // Binary format (much more compact)
            let filename = format!("{}.bin", base);
            let file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename))?;
            bincode::serialize_into(file, snapshots)
                .with_context(|| format!("Error serializing snapshots to bincode in '{}'", filename))?;
            info!("Snapshots saved to {} (binary format)", filename);
            Ok(())
        }
        "messagepack" => {
            let filename = format!("{}.msgpack", base);
            let mut file = File::create(&filename)
                .with_context(|| format!("Error creating snapshot file '{}'", filename))?;
            rmp_serde::encode::write(&mut file, snapshots)
                .with_context(|| format!("Error serializing snapshots to MessagePack in '{}'", filename))?;
            info!("Snapshots saved to {} (MessagePack format)", filename);
            Ok(())
        }
        _ => {
            error!("Unknown output format: {}. Using JSON instead.", output_format);
            save_json(&format!("{}.json", base), snapshots)
        }
    }
}

fn save_json(filename: &str, snapshots: &[Snapshot]) -> Result<()> {
    let json_string = serde_json::to_string(snapshots).context("Error serializing snapshots to JSON")?;
    let mut file = File::create(filename)
        .with_context(|| format!("Error creating snapshot file '{}'", filename))?;
    file.write_all(json_string.as_bytes())
        .with_context(|| format!("Error writing snapshot JSON to file '{}'", filename))?;
    info!("Snapshots saved to {}", filename);
    Ok(())
}

fn save_csv(output: &OutputConfig, run: u32, snapshots: &[Snapshot]) -> Result<()> {
    let filename = format!("{}_run{}_stats.csv", output.base_filename, run);
    let mut writer = csv::Writer::from_path(&filename)
        .with_context(|| format!("Error creating CSV file '{}'", filename))?;
    writer.write_record([
        "time",
        "healthy",
        "containing",
        "expressing",
        "infectious",
        "dead",
        "virgin_immune",
        "mature_immune",
        "avg_foci_area",
        "avg_enabled_focus_cells",
    ])?;
    for s in snapshots {
        writer.write_record(&[
            s.time.to_string(),
            s.healthy.to_string(),
            s.containing.to_string(),
            s.expressing.to_string(),
            s.infectious.to_string(),
            s.dead.to_string(),
            s.virgin_immune.to_string(),
            s.mature_immune.to_string(),
            format!("{:.4}", s.avg_foci_area),
            s.avg_enabled_focus_cells.map(|v| format!("{:.4}", v)).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    info!("Counters saved to {}", filename);
    Ok(())
}
