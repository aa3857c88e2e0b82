use anyhow::{bail, Context};
use clap::Parser;
use defect_bench::core::corpus::to_toml_corpus;
use defect_bench::core::Storage;
use defect_bench::utils::logger;
use defect_bench::{extract_fragments, Fragment, LocalStorage};
use std::collections::HashSet;

#[derive(Debug, Parser)]
#[command(name = "extract_corpus")]
#[command(about = "Turn C fixtures with *_safe / *_unsafe functions into a TOML corpus")]
struct ExtractArgs {
    /// C fixture files
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,

    /// Output corpus file; stdout when omitted
    #[arg(long, short)]
    output: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ExtractArgs::parse();
    logger::init_cli_logger(args.verbose);

    let storage = LocalStorage::default();
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut seen = HashSet::new();

    for file in &args.files {
        let bytes = storage
            .read_file(file)
            .await
            .with_context(|| format!("reading {}", file))?;
        let source = String::from_utf8_lossy(&bytes);
        let extracted = extract_fragments(&source, file).with_context(|| format!("extracting {}", file))?;

        if extracted.is_empty() {
            tracing::warn!("⚠️ {} has no *_safe / *_unsafe functions", file);
        } else {
            tracing::info!("🧩 {}: {} fragments", file, extracted.len());
        }

        for fragment in extracted {
            if !seen.insert(fragment.id().to_string()) {
                bail!("fragment id {} appears in more than one file", fragment.id());
            }
            fragments.push(fragment);
        }
    }

    let corpus = to_toml_corpus(&fragments)?;
    match &args.output {
        Some(path) => {
            storage
                .write_file(path, corpus.as_bytes())
                .await
                .with_context(|| format!("writing {}", path))?;
            tracing::info!("📁 Wrote {} fragments to {}", fragments.len(), path);
        }
        None => print!("{}", corpus),
    }

    Ok(())
}
