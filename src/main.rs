use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use transfer_bootstrap::io::{read_bootstrap_newicks, read_reference_newick};
use transfer_bootstrap::support::{log_if, Algo, Engine, SupportConfig};

/// Assign branch supports to a reference tree from a set of bootstrap trees,
/// by transfer bootstrap expectation (TBE) or classical Felsenstein
/// bootstrap proportions (FBP).
#[derive(Parser, Debug)]
#[command(
    name = "transfer-bootstrap",
    about = "Branch support from bootstrap trees (TBE / FBP)",
    disable_version_flag = true
)]
struct Args {
    /// Reference tree file (Newick)
    #[arg(short = 'i', long = "input")]
    input: Option<PathBuf>,

    /// Bootstrap trees file, one Newick tree per line
    #[arg(short = 'b', long = "boot")]
    boot: Option<PathBuf>,

    /// Output tree file; stdout when absent or "-"; ".gz" compresses
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,

    /// Number of worker threads, clamped to the hardware maximum
    #[arg(short = '@', long = "num-threads", default_value_t = 1)]
    num_threads: usize,

    /// Per-branch statistics file
    #[arg(short = 'S', long = "stat-file")]
    stat_file: Option<PathBuf>,

    /// Support algorithm
    #[arg(short = 'a', long = "algo", value_enum, default_value_t = AlgoArg::Tbe)]
    algo: AlgoArg,

    /// Distance cutoff for the moved-taxa computation (tbe only)
    #[arg(short = 'd', long = "dist-cutoff", default_value_t = 0.3)]
    dist_cutoff: f64,

    /// Quiet mode: suppresses progress messages
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,

    /// Engine PRNG seed; derived from the clock when absent
    #[arg(short = 's', long = "seed")]
    seed: Option<u64>,

    /// Print version and exit
    #[arg(short = 'v', long = "version", default_value_t = false)]
    version: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AlgoArg {
    Tbe,
    TbeRapid,
    Fbp,
}

impl From<AlgoArg> for Algo {
    fn from(a: AlgoArg) -> Algo {
        match a {
            AlgoArg::Tbe => Algo::Tbe,
            AlgoArg::TbeRapid => Algo::TbeRapid,
            AlgoArg::Fbp => Algo::Fbp,
        }
    }
}

fn main() {
    let args = Args::parse();
    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return;
    }
    let (Some(input), Some(boot)) = (&args.input, &args.boot) else {
        eprintln!("An option is missing: -i and -b are required (see --help)");
        std::process::exit(1);
    };

    let seed = args.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    });
    let show = !args.quiet;
    log_if(show, format!("Input tree      : {}", input.display()));
    log_if(show, format!("Bootstrap trees : {}", boot.display()));
    log_if(
        show,
        format!(
            "Output tree     : {}",
            args.out
                .as_ref()
                .map_or_else(|| "stdout".to_string(), |p| p.display().to_string())
        ),
    );
    let algo_label = match args.algo {
        AlgoArg::Tbe => "tbe",
        AlgoArg::TbeRapid => "tbe-rapid",
        AlgoArg::Fbp => "fbp",
    };
    log_if(show, format!("Algo            : {algo_label}"));
    log_if(show, format!("Threads         : {}", args.num_threads));
    log_if(show, format!("Seed            : {seed}"));

    let t0 = Instant::now();
    let ref_newick = match read_reference_newick(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let boot_newicks = match read_bootstrap_newicks(boot) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    log_if(show, format!("Num trees: {}", boot_newicks.len()));
    log_if(
        show,
        format!("Reading trees {:.3}s", t0.elapsed().as_secs_f64()),
    );

    let mut engine = Engine::new(SupportConfig {
        algo: args.algo.into(),
        threads: args.num_threads,
        dist_cutoff: args.dist_cutoff,
        quiet: args.quiet,
        seed,
    });

    let t1 = Instant::now();
    let outcome = match engine.run(&ref_newick, &boot_newicks) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(3);
        }
    };
    if outcome.skipped > 0 {
        eprintln!(
            "{} of {} bootstrap trees were skipped",
            outcome.skipped,
            boot_newicks.len()
        );
    }
    log_if(
        show,
        format!(
            "Computing supports over {} trees {:.3}s",
            outcome.num_trees,
            t1.elapsed().as_secs_f64()
        ),
    );

    if let Err(e) = engine.emit(&outcome, args.out.as_deref(), args.stat_file.as_deref()) {
        eprintln!("{e}");
        std::process::exit(4);
    }
}
