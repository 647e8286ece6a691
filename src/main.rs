use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sdvu::bytecode::Chunk;
use sdvu::codegen::{binary, disasm};
use sdvu::compiler::{self, Options};
use sdvu::diagnostic::{Diagnostic, ansi::AnsiRenderer, json, registry};
use sdvu::lexer::{self, TokenKind};
use sdvu::register::MAX_REGISTERS;

const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE: u8 = 65;
const EXIT_IO: u8 = 74;

#[derive(Parser, Debug)]
#[command(name = "sdvu", version)]
#[command(about = "Compile guarded-action programs to 32-bit register bytecode")]
struct Cli {
    /// More logging on stderr (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file to a binary chunk
    Compile {
        file: PathBuf,

        /// Output file, `<FILE stem>.bin` by default
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the disassembly
        #[arg(long)]
        listing: bool,

        /// Print the global table as JSON
        #[arg(long)]
        symbols: bool,

        /// Report diagnostics as JSON, one object per line
        #[arg(long)]
        json: bool,

        /// General registers available to the allocator
        #[arg(long, default_value_t = MAX_REGISTERS as u8, value_parser = clap::value_parser!(u8).range(2..=15))]
        registers: u8,
    },
    /// Print the tokens of a source file
    Scan { file: PathBuf },
    /// Print the listing of a binary chunk
    Disasm { file: PathBuf },
    /// Explain an error code, e.g. SDVU-S001
    Explain { code: String },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {e}", path.display());
        ExitCode::from(EXIT_IO)
    })
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(EXIT_USAGE) } else { ExitCode::SUCCESS };
        }
    };
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Compile { file, output, listing, symbols, json, registers } => {
            run_compile(&file, output, listing, symbols, json, Options { registers: registers.into() })
        }
        Command::Scan { file } => run_scan(&file),
        Command::Disasm { file } => run_disasm(&file),
        Command::Explain { code } => run_explain(&code),
    };
    result.unwrap_or_else(|code| code)
}

fn run_compile(
    file: &Path,
    output: Option<PathBuf>,
    listing: bool,
    symbols: bool,
    as_json: bool,
    options: Options,
) -> Result<ExitCode, ExitCode> {
    let source = read_source(file)?;
    info!(file = %file.display(), registers = options.registers, "compiling");
    let compilation = compiler::compile(&source, options);

    if listing {
        print!("{}", disasm::disassemble(&compilation.chunk, &compilation.processes));
        print!("{}", disasm::format_table(&compilation.table));
    }
    if symbols {
        let entries = compilation.table.entries();
        match serde_json::to_string_pretty(&entries) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: cannot serialize the global table: {e}"),
        }
    }

    if !compilation.succeeded() {
        let renderer = AnsiRenderer { use_color: io::stderr().is_terminal() };
        for error in &compilation.errors {
            let d = Diagnostic::from(error).with_source(source.as_str());
            if as_json {
                eprintln!("{}", json::render(&d));
            } else {
                eprint!("{}", renderer.render(&d));
            }
        }
        eprintln!("{} error(s); no output written", compilation.errors.len());
        return Err(ExitCode::from(EXIT_COMPILE));
    }

    let out = output.unwrap_or_else(|| file.with_extension("bin"));
    let written = fs::File::create(&out).and_then(|f| binary::write_words(io::BufWriter::new(f), compilation.chunk.words()));
    if let Err(e) = written {
        eprintln!("error: cannot write {}: {e}", out.display());
        return Err(ExitCode::from(EXIT_IO));
    }
    debug!(
        words = compilation.chunk.len(),
        processes = compilation.processes.len(),
        bytes = compilation.table.address_space(),
        "chunk written"
    );
    Ok(ExitCode::SUCCESS)
}

fn run_scan(file: &Path) -> Result<ExitCode, ExitCode> {
    let source = read_source(file)?;
    let mut failed = false;
    for token in lexer::lex(&source) {
        failed |= matches!(token.kind, TokenKind::Error(_));
        println!("{:>4} {:>5}..{:<5} {}", token.line, token.span.start, token.span.end, token.kind);
    }
    Ok(if failed { ExitCode::from(EXIT_COMPILE) } else { ExitCode::SUCCESS })
}

fn run_disasm(file: &Path) -> Result<ExitCode, ExitCode> {
    let words = fs::File::open(file).and_then(binary::read_words).map_err(|e| {
        eprintln!("error: cannot read {}: {e}", file.display());
        ExitCode::from(EXIT_IO)
    })?;
    print!("{}", disasm::disassemble(&Chunk::from_words(words), &[]));
    Ok(ExitCode::SUCCESS)
}

fn run_explain(code: &str) -> Result<ExitCode, ExitCode> {
    match registry::lookup(code) {
        Some(entry) => {
            print!("{}", entry.long);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("error: unknown error code '{code}'");
            Err(ExitCode::from(EXIT_USAGE))
        }
    }
}
