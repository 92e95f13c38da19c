use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};

use ent_rs::ast::tree::Specification;

use crate::Args;

pub fn dump_ast(args: &Args) -> Result<()> {
    let input = BufReader::new(
        File::open(&args.input).context("opening input tree")?,
    );
    let spec: Specification =
        serde_json::from_reader(input).context("decoding input tree")?;
    println!("source: {}", spec.source);
    for decl in &spec.declarations {
        println!("{decl:#?}");
    }
    Ok(())
}
