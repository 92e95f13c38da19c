use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};

use ent_rs::ast::tree::{self, Specification};
use ent_rs::emit::{self, listing};

use crate::{Args, CompileEntArgs};

pub fn compile_ent(args: &Args, compile_args: &CompileEntArgs) -> Result<()> {
    let input = BufReader::new(
        File::open(&args.input).context("opening input tree")?,
    );
    let spec: Specification =
        serde_json::from_reader(input).context("decoding input tree")?;

    let mut ast = tree::lower(&spec);
    let image = emit::compile(&mut ast)?;
    if compile_args.listing {
        print!("# {}\n{}", args.input.display(), listing(&ast, &image.layout)?);
    }
    emit::write_image(&compile_args.output, &image.bytes)?;
    Ok(())
}
