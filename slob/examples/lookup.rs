//! Looks up a key across one or more slob archives and prints the matches.
//!
//! Pass several archives to see merged, deduplicated results; the first
//! archive given is treated as the preferred one.

use clap::Parser;
use slob::Slob;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "lookup")]
struct Cli {
    /// Archives to search, in preference order.
    #[clap(long, required = true)]
    pub archive: Vec<PathBuf>,

    /// The key to look up.
    pub key: String,

    /// Print the content of each match instead of just its metadata.
    #[clap(long)]
    pub content: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Cli::parse();

    let mut archives = Vec::new();
    for path in &args.archive {
        let archive = Slob::open(path)?;
        info!(
            "{}: {} entries, {} blobs, tags {:?}",
            archive.uri(),
            archive.size(),
            archive.blob_count(),
            archive.tags(),
        );
        archives.push(archive);
    }

    let preferred = archives.first().cloned();
    for blob in slob::find_with(&args.key, &archives, preferred.as_ref(), None) {
        println!(
            "{} {} {}#{}",
            blob.owner().uri(),
            blob.id(),
            blob.key(),
            blob.fragment(),
        );
        if args.content {
            let content = blob.content()?;
            println!("  [{}] {} bytes", content.content_type, content.data.len());
            if content.content_type.starts_with("text/") {
                println!("  {}", String::from_utf8_lossy(&content.data));
            }
        }
    }

    Ok(())
}
