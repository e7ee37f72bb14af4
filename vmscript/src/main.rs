use std::fs;
use std::process::ExitCode;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmscript::cli::{self, CliArgs, ConfigFile};
use vmscript::config::{self, Config};
use vmscript::debugger::StepDebugger;
use vmscript::mode::{DryRunMode, ExecutionMode, LiveMode};
use vmscript::monitor::MonitorTransport;
use vmscript::script::validate::has_errors;
use vmscript::script::{validate_script, Executor, Expander, Parser};

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("vmscript: {e}");
            eprintln!("{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    // RUST_LOG wins over -v/-q.
    let level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("vmscript={level}"))))
        .init();

    match run(args) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("vmscript: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: CliArgs) -> Result<i32, String> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match &args.config {
        ConfigFile::Skip => None,
        ConfigFile::Explicit(path) => Some(path.clone()),
        ConfigFile::Search => config::find_user_config(),
    };
    let config = match config_path {
        None => Config::new(),
        Some(path) => {
            let (config, errors) = Config::load_file(&path)
                .map_err(|e| format!("cannot read config {}: {e}", path.display()))?;
            for err in errors {
                warn!(file = %path.display(), "{err}");
            }
            config
        }
    };

    // ── Variables and parsing ─────────────────────────────────────────────────
    let mut expander = Expander::from_env();
    for (name, value) in config.vars.iter() {
        expander.set(name.as_str(), value.as_str());
    }
    for (name, value) in &args.defines {
        expander.set(name.as_str(), value.as_str());
    }

    let src = fs::read_to_string(&args.script)
        .map_err(|e| format!("cannot read {}: {e}", args.script.display()))?;
    let mut parser = Parser::with_expander(expander.clone());
    let script = parser
        .parse(&src)
        .map_err(|e| format!("{}: {e}", args.script.display()))?;
    info!(
        script = %args.script.display(),
        lines = script.metadata.total_lines,
        functions = script.functions.len(),
        "parsed"
    );

    if args.check {
        let issues = validate_script(&script, parser.expander());
        for issue in &issues {
            println!("{}:{issue}", args.script.display());
        }
        return Ok(if has_errors(&issues) { 1 } else { 0 });
    }

    // ── Mode ──────────────────────────────────────────────────────────────────
    let mut settings = config.settings.clone();
    if args.timeout.is_some() {
        settings.timeout = args.timeout;
    }

    let mode: Box<dyn ExecutionMode> = if args.dry_run {
        Box::new(DryRunMode::new())
    } else {
        let address = args
            .monitor
            .clone()
            .or_else(|| config.monitor.clone())
            .ok_or("no monitor address: pass -m<addr> or set 'monitor' in the config file")?;
        let transport = MonitorTransport::connect(&address)
            .map_err(|e| format!("monitor {address}: {e}"))?;
        Box::new(LiveMode::new(transport, config.ocr.clone()).with_key_delay(config.key_delay))
    };

    // ── Execute ───────────────────────────────────────────────────────────────
    let mut executor = Executor::new(mode, expander, settings).with_script_path(&args.script);
    if args.debugging() {
        let debugger = StepDebugger::stdio()
            .stepping(args.step)
            .with_breakpoints(args.breakpoints.iter().copied());
        executor = executor.with_debugger(Box::new(debugger));
    }

    let result = executor.execute(&script);
    if let Some(err) = &result.error {
        eprintln!("vmscript: {err}");
    }
    info!(
        success = result.success,
        exit_code = result.exit_code,
        lines = result.lines_executed,
        duration = ?result.duration,
        "done"
    );
    Ok(result.exit_code)
}
