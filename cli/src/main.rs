use std::ffi::{CStr, c_char, c_void};
use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result, WrapErr, miette};
use sable::{
    CompilationOptions, Engine, EngineOptions, ExecutionOptions, render_error, render_warnings_to,
};

/// Sable - compile and run Sable scripts
#[derive(Parser, Debug)]
#[command(name = "sable")]
#[command(about = "Compile and run Sable scripts", long_about = None)]
struct Args {
    /// Script to run (reads stdin when neither a file nor --eval is given)
    file: Option<PathBuf>,

    /// Source text to run instead of a file
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Print the compiled bytecode
    #[arg(long)]
    disassemble: bool,

    /// Compile only
    #[arg(long)]
    no_run: bool,

    /// Register cells available to the VM
    #[arg(long, default_value_t = 1000)]
    register_capacity: usize,

    /// Maximum nesting of script calls
    #[arg(long, default_value_t = 1000)]
    max_call_depth: usize,
}

extern "C" fn print_i64(value: i64) {
    println!("{value}");
}

extern "C" fn print_f64(value: f64) {
    println!("{value}");
}

extern "C" fn puts(text: *const c_char) {
    if text.is_null() {
        return;
    }
    println!("{}", unsafe { CStr::from_ptr(text) }.to_string_lossy());
}

fn read_source(args: &Args) -> Result<String> {
    if let Some(source) = &args.eval {
        return Ok(source.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display()));
    }
    let mut source = String::new();
    std::io::stdin()
        .read_to_string(&mut source)
        .into_diagnostic()?;
    Ok(source)
}

fn main() -> Result<()> {
    let args = Args::parse();

    use tracing_subscriber::{EnvFilter, fmt};

    // RUST_LOG controls the level; default to WARN.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .into_diagnostic()?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let source = read_source(&args)?;

    let options = EngineOptions {
        default_compilation_options: CompilationOptions::default(),
        default_execution_options: ExecutionOptions {
            register_capacity: args.register_capacity,
            max_call_depth: args.max_call_depth,
        },
    };
    let engine = Engine::new(options, |env| unsafe {
        env.register_native("print_i64", print_i64 as *const c_void);
        env.register_native("print_f64", print_f64 as *const c_void);
        env.register_native("puts", puts as *const c_void);
    });

    let program = match engine.compile(&source) {
        Ok(program) => program,
        Err(e) => {
            render_error(&e);
            return Err(miette!("compilation failed"));
        }
    };
    render_warnings_to(&source, program.warnings(), &mut std::io::stderr(), true)
        .into_diagnostic()?;

    if args.disassemble {
        print!("{}", program.disassemble());
    }
    if args.no_run {
        return Ok(());
    }

    match program.run() {
        Ok(Some(value)) => {
            let ty = program.program().unit(program.program().entry()).return_type;
            tracing::debug!(%ty, "program returned");
            println!("{}", value.display(ty));
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            render_error(&e);
            Err(miette!("execution failed"))
        }
    }
}
