use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;

use warpcost::cfg::loops::load_unroll_table;
use warpcost::cost::report;
use warpcost::diagnostic::render_diagnostics;
use warpcost::{analyze_listing, AnalyzeOptions};

#[derive(Parser)]
#[command(
    name = "warpcost",
    version,
    about = "Static cycle estimator for warp-based GPU assembly listings"
)]
struct Cli {
    /// Input assembly listing
    input: PathBuf,
    /// Dump instruction-class counts
    #[arg(long)]
    counts: bool,
    /// Dump the ALU-to-global ratio
    #[arg(long)]
    ratios: bool,
    /// Dump loop nesting and body sizes
    #[arg(long)]
    loopinfo: bool,
    /// Dump per-loop instruction counts
    #[arg(long)]
    loopcounts: bool,
    /// Dump per-loop ALU-to-global ratios
    #[arg(long)]
    loopratios: bool,
    /// Dump basic blocks with their instructions
    #[arg(long)]
    dumpbb: bool,
    /// Dump CFG successor/predecessor lists
    #[arg(long)]
    dumpcfg: bool,
    /// Dump the classified instruction stream
    #[arg(long)]
    dumpinst: bool,
    /// Write the CFG to cfg.dot
    #[arg(long)]
    dotcfg: bool,
    /// Count and report execution cycles
    #[arg(long)]
    cycles: bool,
    /// Report per-loop cycle totals as well
    #[arg(long)]
    loopcycles: bool,
    /// Treat the input as an unrolled kernel and consult ./.uconf
    #[arg(long)]
    unrolled: bool,
    /// Experimental register-dependency mode
    #[arg(long)]
    exp: bool,
    /// Number of concurrent warps
    #[arg(long, default_value_t = 32)]
    warps: u32,
    /// Default loop trip count when no unroll information applies
    #[arg(long, default_value_t = 256)]
    trip_count: u32,
}

const UNROLL_CONFIG_PATH: &str = "./.uconf";

fn main() {
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", cli.input.display(), e);
            process::exit(1);
        }
    };

    // A missing or unreadable unroll table is not fatal; defaults apply.
    let unroll_factors = if cli.unrolled {
        match load_unroll_table(Path::new(UNROLL_CONFIG_PATH)) {
            Ok(factors) => Some(factors),
            Err(e) => {
                eprintln!("warning: {}; using default loop trip counts", e);
                None
            }
        }
    } else {
        None
    };

    let options = AnalyzeOptions {
        warps: cli.warps,
        exp_mode: cli.exp,
        default_trip_count: cli.trip_count,
        unroll_factors,
    };

    let filename = cli.input.to_string_lossy();
    let (mut analyses, diagnostics) = analyze_listing(&source, &options);
    render_diagnostics(&diagnostics, &filename, &source);

    let params = options.cycle_params();
    for analysis in &mut analyses {
        println!(
            "Processing kernel: {}",
            analysis.name().unwrap_or("<unnamed>")
        );
        println!("----------------------------------");

        if cli.counts {
            print!("{}", report::format_inst_counts(&analysis.cfg));
        }
        if cli.ratios {
            print!("{}", report::format_ratios(&analysis.cfg));
        }
        if cli.loopratios {
            print!("{}", report::format_loop_ratios(&analysis.cfg));
        }
        if cli.loopinfo {
            print!("{}", report::format_loop_info(&analysis.cfg));
        }
        if cli.loopcounts {
            print!("{}", report::format_loop_counts(&analysis.cfg));
        }
        if cli.dumpinst {
            print!("{}", report::format_inst_stream(&analysis.kernel.stream));
        }
        if cli.dumpcfg {
            print!("{}", report::format_cfg(&analysis.cfg));
        }
        if cli.dumpbb {
            print!(
                "{}",
                report::format_basic_blocks(&analysis.cfg, &analysis.kernel.stream)
            );
        }

        if cli.cycles || cli.loopcycles {
            let summary = analysis.count_cycles(&params);
            print!("{}", report::format_cycle_summary(&summary, cli.loopcycles));
        }

        if cli.dotcfg {
            let dot = warpcost::dot::render_dot(&analysis.cfg, &analysis.kernel.stream);
            if let Err(e) = std::fs::write("cfg.dot", dot) {
                eprintln!("error: cannot write 'cfg.dot': {}", e);
                process::exit(1);
            }
        }
    }
}
