use clap::Parser;
use rvx::{Config, GenFlags};
use rvx_ir::optimizer::Passes;
use std::path::PathBuf;
use std::process::ExitCode;

/// Accepted boolean spellings for `--flag=value` style options.
fn flag_value(s: &str) -> Result<bool, String> {
    match s {
        "yes" | "on" | "true" => Ok(true),
        "no" | "off" | "false" => Ok(false),
        other => Err(format!("unrecognized boolean value '{other}'")),
    }
}

/// Static binary translator from RV64 ELF executables to x86-64 assembly.
#[derive(Parser, Debug)]
#[command(name = "rvx", version, about)]
struct Args {
    /// Guest ELF executable.
    input: PathBuf,

    /// Output assembly module (stdout when omitted).
    output: Option<PathBuf>,

    /// Verify the IR between pipeline stages.
    #[arg(long, default_value = "no", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    debug: bool,

    /// Collect every candidate during indirect-jump backtracking.
    #[arg(long = "full-backtracking", default_value = "no", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    full_backtracking: bool,

    /// Run the optimizer passes.
    #[arg(long, default_value = "yes", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    optimize: bool,

    /// Fuse address arithmetic into memory operands.
    #[arg(long = "merge-ops", default_value = "yes", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    merge_ops: bool,

    /// Emit BMI2 shift instructions.
    #[arg(long, default_value = "no", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    bmi2: bool,

    /// Use the CHD perfect-hash indirect-jump table.
    #[arg(long = "chd-lookup", default_value = "no", value_parser = flag_value, num_args = 0..=1, default_missing_value = "yes")]
    chd_lookup: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config {
        debug: args.debug,
        full_backtracking: args.full_backtracking,
        ..Config::default()
    };
    if !args.optimize {
        config.passes = Passes::empty();
    }
    config.gen_flags.set(GenFlags::MERGE_OP, args.merge_ops);
    config.gen_flags.set(GenFlags::ARCH_BMI2, args.bmi2);
    config.gen_flags.set(GenFlags::CHD_IJUMP, args.chd_lookup);

    let decoder = rvx_isa::Rv64Decoder;
    let result = match &args.output {
        Some(path) => {
            let mut file = match std::fs::File::create(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("rvx: cannot create {}: {e}", path.display());
                    return ExitCode::FAILURE;
                }
            };
            rvx::translate(&args.input, &decoder, &config, &mut file)
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            rvx::translate(&args.input, &decoder, &config, &mut lock)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rvx: {e}");
            ExitCode::FAILURE
        }
    }
}
