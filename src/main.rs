// Training and generation driver for the LSTM-RBM.
//
// Trains on every `.mid` file in a directory, then writes generated pieces.
// Ctrl+C during training stops after the current chunk and still generates.
//
// Usage: lstm-rbm [--config FILE] [--data DIR] [--epochs N] [--batch-size N]
//                 [--seed N] [--output PREFIX] [--samples N] [--show] [--verbose]

use lstm_rbm::utils::init_logging;
use lstm_rbm::{LstmRbm, ModelConfig};
use std::error::Error;
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        print_usage();
        return Ok(());
    }

    init_logging(has_flag(&args, "--verbose"));

    let mut config = match parse_flag::<String>(&args, "--config") {
        Some(path) => ModelConfig::from_json_file(path)?,
        None => ModelConfig::default(),
    };
    if let Some(seed) = parse_flag(&args, "--seed") {
        config.seed = seed;
    }
    let data_dir: String = parse_flag(&args, "--data").unwrap_or_else(|| "Nottingham/train".to_string());
    let num_epochs: usize = parse_flag(&args, "--epochs").unwrap_or(200);
    let batch_size: usize = parse_flag(&args, "--batch-size").unwrap_or(100);
    let output: String = parse_flag(&args, "--output").unwrap_or_else(|| "sample".to_string());
    let samples: usize = parse_flag(&args, "--samples").unwrap_or(2);
    let show = has_flag(&args, "--show");

    let files = midi_files(Path::new(&data_dir))?;
    log::info!("Found {} MIDI files in {}", files.len(), data_dir);

    let mut model = LstmRbm::new(config)?;

    let interrupt = model.interrupt_handle();
    ctrlc::set_handler(move || interrupt.trigger())?;

    model.train(&files, batch_size, num_epochs)?;

    for i in 1..=samples {
        let path = format!("{}{}.mid", output, i);
        model.generate(&path, show)?;
        println!("Wrote {}", path);
    }
    Ok(())
}

/// Every `.mid`/`.midi` file directly inside `dir`, sorted by name.
fn midi_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn print_usage() {
    println!("Usage: lstm-rbm [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>       JSON model configuration (defaults otherwise)");
    println!("  --data <DIR>          Directory of training MIDI files (default: Nottingham/train)");
    println!("  --epochs <N>          Training epochs (default: 200)");
    println!("  --batch-size <N>      Time steps per update (default: 100)");
    println!("  --seed <N>            Random seed, overrides the configuration");
    println!("  --output <PREFIX>     Output file prefix (default: sample)");
    println!("  --samples <N>         Number of pieces to generate (default: 2)");
    println!("  --show                Print a piano-roll of each generated piece");
    println!("  --verbose             Debug logging");
    println!("  --help, -h            Show this help");
}
