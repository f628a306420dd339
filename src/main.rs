use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tickscript::{compile_source, HostFunctions, PoolConfig, ScriptCache, Scripts, VmPool};

#[derive(Parser)]
#[command(name = "tickscript")]
#[command(about = "Run a script the way the game does: attached to an entity, resumed once per tick")]
struct Cli {
    /// The script to run.
    script: PathBuf,

    /// Give up after this many ticks if the script is still running.
    #[arg(long, default_value_t = 1000)]
    ticks: usize,

    /// Print the compiled bytecode before running.
    #[arg(long)]
    disassemble: bool,

    /// Library script whose top-level functions the script may call. Repeatable.
    #[arg(long = "lib", value_name = "PATH")]
    libs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut functions = HostFunctions::with_builtins();
    for path in &cli.libs {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read library {}", path.display()))?;
        let library = compile_source(&source, &functions)
            .with_context(|| format!("Failed to compile library {}", path.display()))?;
        let count = functions.register_program(&library);
        log::info!("{}: {} functions", path.display(), count);
    }
    let functions = Rc::new(functions);

    let mut cache = ScriptCache::new(Rc::clone(&functions));
    let program = cache.load_file(&cli.script)?;
    if cli.disassemble {
        print!("{}", program.disassemble());
    }

    let mut pool = VmPool::new(functions, PoolConfig::default());
    let mut scripts = Scripts::new();
    scripts.attach(&mut pool, &program)?;

    for tick in 1..=cli.ticks {
        let report = scripts.tick(&mut pool);
        if let Some(error) = report.faults.first() {
            bail!("{}", error);
        }
        if scripts.is_empty() {
            log::debug!("finished after {} ticks", tick);
            return Ok(());
        }
    }
    scripts.detach_all(&mut pool);
    bail!("Script still running after {} ticks", cli.ticks)
}
