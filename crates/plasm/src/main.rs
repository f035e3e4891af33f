use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use plasm::{compile, diagnostics, CompileOptions};

/// plasm — compiler for the plasm source language, targeting
/// WebAssembly-GC text format.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<RunCommand>,

    /// Source file to compile (when no subcommand is given)
    src: Option<PathBuf>,

    /// Output path, without extension (defaults to `src` without its extension)
    out: Option<PathBuf>,

    /// Dump per-phase diagnostics and the IR/WAT text
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum RunCommand {
    /// Compile to a temp directory, then invoke the host runner
    Run {
        src: PathBuf,
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("plasm: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(RunCommand::Run { src, args }) => run_command(&src, &args, cli.verbose),
        None => {
            let src = cli.src.context("the following required arguments were not provided: <SRC>")?;
            let out = cli.out.unwrap_or_else(|| without_extension(&src));
            compile_command(&src, &out, cli.verbose)
        }
    }
}

fn compile_command(src: &PathBuf, out: &PathBuf, verbose: bool) -> Result<()> {
    eprintln!("plasm: compiling {}", src.display());
    let source = fs::read_to_string(src).with_context(|| format!("failed to read {}", src.display()))?;

    let options = CompileOptions { emit_wat_only: false, verbose };
    let output = compile(&source, &options).map_err(|diags| anyhow::anyhow!(diagnostics::render(&diags)))?;

    if verbose {
        eprintln!("{}", output.wat);
    }

    let wat_path = out.with_extension("wat");
    fs::write(&wat_path, &output.wat).with_context(|| format!("failed to write {}", wat_path.display()))?;
    eprintln!("plasm: wrote {}", wat_path.display());

    let wasm_path = out.with_extension("wasm");
    match invoke_wat2wasm(&wat_path, &wasm_path) {
        Ok(()) => eprintln!("plasm: wrote {}", wasm_path.display()),
        Err(err) => {
            if verbose {
                eprintln!("plasm: wat2wasm unavailable ({err}); leaving {} in place", wat_path.display());
            }
        }
    }

    Ok(())
}

fn run_command(src: &PathBuf, args: &[String], verbose: bool) -> Result<()> {
    let dir = std::env::temp_dir().join(format!("plasm-run-{}", std::process::id()));
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let out = dir.join(src.file_stem().unwrap_or_default());

    compile_command(src, &out, verbose)?;

    let wasm_path = out.with_extension("wasm");
    if !wasm_path.exists() {
        anyhow::bail!("{} was not produced (wat2wasm not found); nothing to run", wasm_path.display());
    }

    eprintln!("plasm: running {}", wasm_path.display());
    let status = Command::new("wasmtime")
        .arg(&wasm_path)
        .args(args)
        .status()
        .with_context(|| "failed to invoke host runner (expected `wasmtime` on PATH)".to_string())?;
    if !status.success() {
        anyhow::bail!("host runner exited with {status}");
    }
    Ok(())
}

fn invoke_wat2wasm(wat_path: &PathBuf, wasm_path: &PathBuf) -> Result<()> {
    let status = Command::new("wat2wasm")
        .arg(wat_path)
        .arg("-o")
        .arg(wasm_path)
        .status()
        .context("wat2wasm not found on PATH")?;
    if !status.success() {
        anyhow::bail!("wat2wasm exited with {status}");
    }
    Ok(())
}

fn without_extension(src: &PathBuf) -> PathBuf {
    src.with_extension("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_bare_source() {
        let cli = Cli::parse_from(["plasm", "input.plasm"]);
        assert_eq!(cli.src, Some(PathBuf::from("input.plasm")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["plasm", "run", "input.plasm", "--", "a", "b"]);
        match cli.command {
            Some(RunCommand::Run { src, args }) => {
                assert_eq!(src, PathBuf::from("input.plasm"));
                assert_eq!(args, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn without_extension_strips_suffix() {
        assert_eq!(without_extension(&PathBuf::from("foo.plasm")), PathBuf::from("foo"));
    }
}
