//! # protoc-gen-fastproto
//!
//! protoc compiler plugin: reads a serialized `CodeGeneratorRequest` on
//! stdin and writes a `CodeGeneratorResponse` on stdout. protoc invokes it
//! as `protoc --fastproto_out=DIR schema.proto` with the binary on PATH.
//!
//! stdout is the protocol channel, so all diagnostics go to stderr.

use std::io::{Read, Write};
use std::process;

use anyhow::Context;
use clap::Parser;
use prost::Message;
use prost_types::compiler::CodeGeneratorRequest;
use tracing_subscriber::EnvFilter;

/// protoc never passes positional arguments; anything present means the
/// binary was invoked by hand, and a silent stdin read would just hang.
#[derive(Parser)]
#[command(name = "protoc-gen-fastproto")]
#[command(about = "protoc plugin emitting C++ sources for a Ruby protobuf native extension")]
#[command(version)]
struct Cli {}

fn main() {
    match Cli::try_parse() {
        Ok(Cli {}) => {}
        // --help / --version print to stdout and exit 0
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("protoc-gen-fastproto: {:#}", err);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .context("reading request from stdin")?;

    let request =
        CodeGeneratorRequest::decode(input.as_slice()).context("decoding CodeGeneratorRequest")?;
    tracing::debug!(files = request.file_to_generate.len(), "request decoded");

    let response = fastproto_codegen::generate(&request).context("generating response")?;

    let mut output = Vec::new();
    response
        .encode(&mut output)
        .context("encoding CodeGeneratorResponse")?;
    std::io::stdout()
        .write_all(&output)
        .context("writing response to stdout")?;
    Ok(())
}
