use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use kestrel::diagnostic::{Diagnostic, Phase, ansi::AnsiRenderer, json};
use kestrel::vm::DirectoryResolver;
use kestrel::{CompileError, Compiler, Environment, RuntimeError, Value, Vm, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "kestrel", version, about = "Compile and run a kestrel script")]
struct Cli {
    /// Script file to run
    file: PathBuf,

    /// Arguments passed to the script as $1..$n
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Function to start from instead of main
    #[arg(long, value_name = "NAME")]
    entry: Option<String>,

    /// Print the compiled program and exit
    #[arg(long)]
    dump: bool,

    /// Skip the peephole optimizer
    #[arg(long)]
    no_optimize: bool,

    /// Report errors as JSON on stderr
    #[arg(long)]
    json: bool,

    /// Directory searched for `use`d modules; may be repeated
    #[arg(short = 'M', long = "module-path", value_name = "DIR")]
    module_path: Vec<PathBuf>,

    /// VM limits as a JSON file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

enum Failure {
    Setup(String),
    Compile(CompileError, String),
    Runtime(RuntimeError),
}

impl Failure {
    fn diagnostic(&self) -> Diagnostic {
        match self {
            Failure::Setup(message) => Diagnostic::new(Phase::Compile, message),
            Failure::Compile(e, source) => Diagnostic::from(e).with_source(source.clone()),
            Failure::Runtime(e) => Diagnostic::from(e),
        }
    }
}

struct StderrLogger {
    level: log::LevelFilter,
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let source = std::fs::read_to_string(&cli.file)
        .map_err(|e| Failure::Setup(format!("cannot read {}: {e}", cli.file.display())))?;
    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| Failure::Setup(format!("cannot read {}: {e}", path.display())))?;
            VmConfig::from_json(&text).map_err(|e| Failure::Setup(format!("invalid config {}: {e}", path.display())))?
        }
        None => VmConfig::default(),
    };

    let env = Environment::standard();
    let compiler = Compiler::new()
        .with_known_functions(env.function_names().map(str::to_string))
        .optimize(!cli.no_optimize);
    let program = compiler.compile(&source).map_err(|e| Failure::Compile(e, source.clone()))?;
    if cli.dump {
        print!("{}", program.disassemble());
        return Ok(());
    }

    let mut roots = cli.module_path.clone();
    if let Some(dir) = cli.file.parent() {
        roots.push(dir.to_path_buf());
    }
    let env = env.with_resolver(DirectoryResolver::new(roots).with_compiler(compiler));
    let mut vm = Vm::with_config(env, config);
    vm.load(&program).map_err(Failure::Runtime)?;

    let args = cli.args.iter().map(|arg| Value::from(arg.as_str())).collect();
    let result = vm.run_entry(cli.entry.as_deref(), args).map_err(Failure::Runtime)?;
    log::debug!("script returned {result}");
    let _ = std::io::stdout().flush();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            let _ = std::io::stdout().flush();
            let diagnostic = failure.diagnostic();
            if cli.json {
                eprintln!("{}", json::render(&diagnostic));
            } else {
                let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
                eprint!("{}", renderer.render(&diagnostic));
            }
            ExitCode::FAILURE
        }
    }
}
