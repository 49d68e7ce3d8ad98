//! Command-line front end for inspecting and running show documents.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use showrig::transport::MonitorTransport;
use showrig::{load_show, save_show, ShowError};

#[derive(Parser)]
#[command(name = "showrig-cli", about = "Stage-lighting show-control engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a show document: devices, patches, playback structure.
    Info {
        /// Path to the show document.
        show: PathBuf,
    },
    /// Evaluate a device selector against the show's rig.
    Query {
        show: PathBuf,
        /// Selector string, e.g. "[$position=FOH][@intensity>0.5f]".
        selector: String,
    },
    /// Run the rig for a while with the playback attached, then print the
    /// last output frame.
    Run {
        show: PathBuf,
        /// How long to run, in seconds.
        #[arg(long, default_value_t = 2.0)]
        seconds: f64,
        /// Cue list layer to fire a go on before running, if any.
        #[arg(long)]
        go: Option<String>,
    },
    /// Load a show document and write it back out (format check).
    Roundtrip {
        show: PathBuf,
        /// Output path; defaults to overwriting the input.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ShowError> {
    match cli.command {
        Command::Info { show } => {
            let (rig, playback) = load_show(&show)?;
            println!("show: {}", show.display());
            println!("refresh rate: {} Hz", rig.refresh_rate());
            println!("devices: {}", rig.device_count());
            rig.with_devices(|devices| {
                for (id, d) in devices {
                    let params: Vec<&str> = d.param_names().collect();
                    println!("  {id} (channel {}, {}): {}", d.channel(), d.kind(), params.join(", "));
                }
            });
            println!("patches: {}", rig.transport_names().join(", "));
            println!("layers: {}", playback.layer_names().join(", "));
            println!("timelines: {}", playback.timeline_names().join(", "));
            println!("grandmaster: {}", playback.grandmaster());
            Ok(())
        }
        Command::Query { show, selector } => {
            let (rig, _) = load_show(&show)?;
            let set = rig.select(&selector);
            println!("{}", set.info());
            Ok(())
        }
        Command::Run { show, seconds, go } => {
            let (mut rig, mut playback) = load_show(&show)?;
            let (monitor, handle) = MonitorTransport::new();
            rig.add_transport("cli-monitor", Box::new(monitor))?;
            rig.init()?;
            playback.attach_to_rig(1, &rig)?;
            playback.start();
            if let Some(layer) = go {
                if !playback.go(&layer) {
                    eprintln!("go failed on layer {layer}");
                }
            }

            rig.start();
            std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0)));
            playback.stop();
            rig.stop();

            println!("ran {} ticks", handle.update_count());
            if let Some(frame) = handle.last_frame() {
                for (id, params) in frame {
                    for (name, param) in params {
                        if let Some(f) = param.as_float() {
                            println!("  {id}.{name} = {:.3}", f.val());
                        }
                    }
                }
            }
            if rig.is_slow() {
                eprintln!("warning: rig was running slowly");
            }
            Ok(())
        }
        Command::Roundtrip { show, out } => {
            let (rig, playback) = load_show(&show)?;
            let out = out.unwrap_or_else(|| show.clone());
            save_show(&rig, &playback, &out, true)?;
            println!("wrote {}", out.display());
            Ok(())
        }
    }
}
