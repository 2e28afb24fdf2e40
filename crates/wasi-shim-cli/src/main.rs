//! WASI Shim Command-Line Interface
//!
//! This CLI provides tools for:
//! - Running WASI preview1 command modules on the shim
//! - Calling exports of reactor modules
//! - Inspecting a module's imports, exports and asyncify instrumentation

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use wasi_shim::{
    HostImports, HostValue, RunOutcome, ShimConfig, ShimError, ShimRuntime, Val, ValType,
};

#[derive(Parser)]
#[command(name = "wasi-shim")]
#[command(author, version, about = "WASI preview1 shim runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a module's `_start`, or initialize it and call one export
    Run {
        /// Module to run (.wasm or .wat)
        module: PathBuf,

        /// Arguments passed to the guest after argv[0]
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Environment variable for the guest (KEY=VALUE, repeatable)
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// JSON config file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Initialize a reactor and call this export instead of `_start`
        #[arg(long)]
        invoke: Option<String>,

        /// i32 parameters for --invoke
        #[arg(long = "param", allow_negative_numbers = true)]
        params: Vec<i32>,

        /// Descriptor number the guest uses for stdin
        #[arg(long)]
        stdin: Option<u32>,

        /// Descriptor number the guest uses for stdout
        #[arg(long)]
        stdout: Option<u32>,

        /// Descriptor number the guest uses for stderr
        #[arg(long)]
        stderr: Option<u32>,

        /// Fuel limit for execution
        #[arg(long)]
        fuel: Option<u64>,

        /// Let `proc_exit` return to the guest instead of stopping it
        #[arg(long)]
        no_return_on_exit: bool,

        /// Link imports nobody provides as trapping functions
        #[arg(long)]
        trap_unknown: bool,
    },

    /// Show a module's imports, exports and asyncify instrumentation
    Inspect {
        /// Module to inspect (.wasm or .wat)
        module: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct ModuleReport {
    name: String,
    asyncified: bool,
    exports: Vec<String>,
    imports: Vec<String>,
}

fn parse_env(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("invalid environment variable '{}': expected KEY=VALUE", pair),
        })
        .collect()
}

/// Host imports every module run by the CLI can use.
///
/// `env.async_sleep(ms)` suspends the guest on a tokio timer; the guest
/// must be instrumented with asyncify to call it.
fn builtin_imports() -> HostImports {
    let mut imports = HostImports::new();
    imports.define("env", "async_sleep", [ValType::I32], [], |args| {
        let ms = args.first().and_then(Val::i32).unwrap_or(0).max(0) as u64;
        HostValue::Pending(
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, ShimError>(Vec::new())
            }
            .boxed(),
        )
    });
    imports
}

#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    module_path: PathBuf,
    args: Vec<String>,
    env: Vec<String>,
    config_path: Option<PathBuf>,
    invoke: Option<String>,
    params: Vec<i32>,
    stdio: (Option<u32>, Option<u32>, Option<u32>),
    fuel: Option<u64>,
    no_return_on_exit: bool,
    trap_unknown: bool,
) -> Result<i32> {
    let mut config = match &config_path {
        Some(path) => ShimConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ShimConfig::default(),
    };

    // argv[0] is the module path unless the config already names one
    if config.args.is_empty() {
        config.args.push(module_path.display().to_string());
    }
    config.args.extend(args);
    config.env.extend(parse_env(&env)?);

    let (stdin, stdout, stderr) = stdio;
    if let Some(fd) = stdin {
        config.stdio.stdin = fd;
    }
    if let Some(fd) = stdout {
        config.stdio.stdout = fd;
    }
    if let Some(fd) = stderr {
        config.stdio.stderr = fd;
    }
    if fuel.is_some() {
        config.fuel_limit = fuel;
    }
    if no_return_on_exit {
        config.return_on_exit = false;
    }
    if trap_unknown {
        config.trap_unknown_imports = true;
    }
    debug!("config: {:?}", config);

    let runtime = ShimRuntime::new(config).context("failed to create runtime")?;
    let module = runtime
        .load_module(&module_path)
        .with_context(|| format!("failed to load {}", module_path.display()))?;
    let mut instance = runtime
        .instantiate(&module, &builtin_imports())
        .context("failed to instantiate module")?;
    info!(
        "instantiated {} (asyncify: {})",
        module.name(),
        instance.is_asyncified()
    );

    match invoke {
        None => {
            let outcome = instance.start().await.context("guest failed")?;
            if let RunOutcome::Exited(code) = outcome {
                info!("guest exited with code {}", code);
            }
            Ok(outcome.code())
        }
        Some(name) => {
            match instance.initialize().await {
                Ok(()) => {}
                Err(ShimError::Exit(exit)) => return Ok(exit.0),
                Err(e) => return Err(e).context("initialization failed"),
            }
            let params: Vec<Val> = params.into_iter().map(Val::I32).collect();
            let result = match instance.call(&name, &params).await {
                Ok(result) => result,
                Err(ShimError::Exit(exit)) => return Ok(exit.0),
                Err(e) => return Err(e).with_context(|| format!("call to {} failed", name)),
            };
            instance.wasi_mut().flush();

            let rendered: Vec<String> = result.values.iter().map(format_val).collect();
            println!("{}", rendered.join(" "));
            info!(
                "{} took {}us (fuel: {:?})",
                name, result.execution_time_us, result.fuel_consumed
            );
            Ok(0)
        }
    }
}

fn format_val(val: &Val) -> String {
    match val {
        Val::I32(v) => v.to_string(),
        Val::I64(v) => v.to_string(),
        Val::F32(bits) => f32::from_bits(*bits).to_string(),
        Val::F64(bits) => f64::from_bits(*bits).to_string(),
        other => format!("{:?}", other),
    }
}

fn cmd_inspect(module_path: &Path, json: bool) -> Result<()> {
    let runtime = ShimRuntime::new(ShimConfig::development()).context("failed to create runtime")?;
    let module = runtime
        .load_module(module_path)
        .with_context(|| format!("failed to load {}", module_path.display()))?;

    let report = ModuleReport {
        name: module.name().to_string(),
        asyncified: module.is_asyncified(),
        exports: module.exports().map(str::to_string).collect(),
        imports: module
            .imports()
            .map(|(module, name)| format!("{}.{}", module, name))
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("=== Module: {} ===", report.name);
    println!();
    println!("Asyncify:  {}", if report.asyncified { "yes" } else { "no" });
    println!();
    println!("Exports ({}):", report.exports.len());
    for export in &report.exports {
        println!("  {}", export);
    }
    println!();
    println!("Imports ({}):", report.imports.len());
    for import in &report.imports {
        println!("  {}", import);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            module,
            args,
            env,
            config,
            invoke,
            params,
            stdin,
            stdout,
            stderr,
            fuel,
            no_return_on_exit,
            trap_unknown,
        } => {
            let code = cmd_run(
                module,
                args,
                env,
                config,
                invoke,
                params,
                (stdin, stdout, stderr),
                fuel,
                no_return_on_exit,
                trap_unknown,
            )
            .await?;
            std::process::exit(code);
        }

        Commands::Inspect { module, json } => cmd_inspect(&module, json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["A=1".to_string(), "B=x=y".to_string(), "C=".to_string()]).unwrap();
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string()),
                ("C".to_string(), String::new()),
            ]
        );
        assert!(parse_env(&["NOVALUE".to_string()]).is_err());
        assert!(parse_env(&["=1".to_string()]).is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "wasi-shim", "run", "--env", "K=V", "--fuel", "10", "app.wasm", "--", "-x", "y",
        ]);
        match cli.command {
            Commands::Run { module, args, env, fuel, .. } => {
                assert_eq!(module, PathBuf::from("app.wasm"));
                assert_eq!(args, vec!["-x", "y"]);
                assert_eq!(env, vec!["K=V"]);
                assert_eq!(fuel, Some(10));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_builtin_imports() {
        let imports = builtin_imports();
        assert_eq!(imports.names().collect::<Vec<_>>(), vec![("env", "async_sleep")]);
    }

    #[test]
    fn test_format_val() {
        assert_eq!(format_val(&Val::I32(-3)), "-3");
        assert_eq!(format_val(&Val::F64(2.5f64.to_bits())), "2.5");
    }
}
