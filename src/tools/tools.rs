mod compile_ent;
use compile_ent::compile_ent;
mod dump_ast;
use dump_ast::dump_ast;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Build Ent type-descriptor images from parsed IDL trees
#[derive(Clone, Debug, Parser)]
struct Args {
    /// input filename with the parsed, name-resolved IDL tree (JSON)
    #[arg(short, long)]
    input: PathBuf,
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Build the reflection image and write it to a file
    CompileEnt(CompileEntArgs),
    /// Print the loaded tree
    DumpAst,
}

#[derive(Clone, Debug, Parser)]
struct CompileEntArgs {
    /// output filename
    output: PathBuf,
    /// print every record placed in the image
    #[arg(long)]
    listing: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = match &args.operation {
        Operation::CompileEnt(compile_args) => {
            compile_ent(&args, compile_args)
        }
        Operation::DumpAst => dump_ast(&args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}: {error:#}", args.input.display());
            let code = error
                .downcast_ref::<ent_rs::Error>()
                .map(|e| e.kind.exit_code())
                .unwrap_or(3);
            ExitCode::from(code)
        }
    }
}
