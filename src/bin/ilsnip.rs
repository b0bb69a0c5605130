//! Command line front end: compile a snippet and print its IL.
//!
//! Reads the source from a file, from stdin (`-`), or falls back to the
//! example snippet of the selected language. Exits with 0 when a listing was
//! printed, 1 for compiler diagnostics and 2 for any other failure.

use clap::Parser;
use ilsnip::compiler::{CompileRequest, CompilerRegistry, CompilerSettings, Language};
use ilsnip::core::config::{example_snippet, DEFAULT_COMPILER_VERSION};
use ilsnip::disasm::RenderOptions;
use ilsnip::pipeline::{Pipeline, PipelineResult};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ilsnip")]
#[command(about = "Compile a C# or VB snippet and show its IL", long_about = None)]
struct Cli {
    /// Source file, `-` for stdin; the example snippet when omitted
    file: Option<PathBuf>,

    /// Source language key
    #[arg(short, long, default_value = "C#")]
    language: String,

    /// Compiler version: v2.0, v3.5 or v4.0
    #[arg(long, default_value = DEFAULT_COMPILER_VERSION)]
    compiler_version: String,

    /// Compile without optimizations
    #[arg(long)]
    no_optimize: bool,

    /// Compile without debug information
    #[arg(long)]
    no_debug: bool,

    /// Include the assembly and module headers
    #[arg(long)]
    headers: bool,

    /// Print bodies as plain instruction lists
    #[arg(long)]
    flat: bool,

    /// Parent directory for compiler scratch space
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Print the example snippet of the language and exit
    #[arg(long)]
    example: bool,
}

fn read_source(cli: &Cli) -> io::Result<Option<String>> {
    match cli.file.as_deref() {
        Some(path) if path.as_os_str() == "-" => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(Some(buffer))
        }
        Some(path) => std::fs::read_to_string(path).map(Some),
        None => Ok(example_snippet(&cli.language).map(str::to_string)),
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    if cli.example {
        return match example_snippet(&cli.language) {
            Some(source) => {
                println!("{}", source);
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("No example for language '{}'", cli.language);
                ExitCode::from(2)
            }
        };
    }

    let source = match read_source(&cli) {
        Ok(Some(source)) => source,
        Ok(None) => {
            eprintln!("No source given and no example for language '{}'", cli.language);
            return ExitCode::from(2);
        }
        Err(e) => {
            eprintln!("Error reading source: {e}");
            return ExitCode::from(2);
        }
    };

    let language = Language::from_key(&cli.language).unwrap_or(Language::CSharp);
    let request = CompileRequest {
        language: cli.language.clone(),
        compiler_version: cli.compiler_version.clone(),
        optimize: !cli.no_optimize,
        include_debug_info: !cli.no_debug,
        ..CompileRequest::new(source, language)
    };
    let options = RenderOptions { include_headers: cli.headers, detect_control_structures: !cli.flat };
    let settings = CompilerSettings { temp_root: cli.temp_dir.clone() };
    let pipeline = Pipeline::new(CompilerRegistry::with_default_backends(settings));

    let result = pipeline.run(&request, options);
    match &result {
        PipelineResult::Il(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        PipelineResult::Diagnostics(_) => {
            eprintln!("{}", result.present());
            ExitCode::from(1)
        }
        PipelineResult::Failure(_) => {
            eprintln!("{}", result.present());
            ExitCode::from(2)
        }
    }
}
